// signal_monitor_main.rs
use clap::Parser;
use std::path::PathBuf;
use traffic_signal_engine::global_variables::AMQP_URL;
use traffic_signal_engine::monitoring::signal_log::{listen_signal_states, CsvSignalLog, SignalSink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Listen to signal states published by the engine")]
struct Args {
    /// AMQP broker URL
    #[arg(short, long, default_value = AMQP_URL)]
    url: String,

    /// Stop after this many records
    #[arg(short, long)]
    limit: Option<usize>,

    /// Also append received records to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut csv_log = match args.csv.as_ref().map(|p| CsvSignalLog::append(p)).transpose() {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Cannot open CSV log: {}", e);
            std::process::exit(1);
        }
    };

    let listener = listen_signal_states(args.url, args.limit, move |record| {
        println!(
            "[{:>7.1}s] {} {:?}/{:?} mode={:?} emergency={:?} queue={:.1}m",
            record.sim_time,
            record.signal_state,
            record.phase,
            record.stage,
            record.mode,
            record.emergency_state,
            record.max_queue_length
        );
        if let Some(writer) = csv_log.as_mut() {
            if let Err(e) = writer.set_signal_state(&record).and_then(|_| writer.flush()) {
                log::warn!("Failed to log signal record: {}", e);
            }
        }
    });

    match listener.await {
        Ok(count) => println!("Signal monitor stopped after {} records", count),
        Err(e) => eprintln!("Error in signal state listener: {}", e),
    }
}
