// signal_engine_main.rs
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use traffic_signal_engine::config::{ControllerKind, EngineConfig};
use traffic_signal_engine::monitoring::signal_log::{AmqpSignalPublisher, CsvSignalLog, SignalSink};
use traffic_signal_engine::simulation_engine::scenarios::{ScenarioKind, TrafficScenario};
use traffic_signal_engine::simulation_engine::simulation::{run_simulation, SimulationOptions};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run the traffic signal engine against a synthetic intersection scenario"
)]
struct Args {
    /// JSON engine configuration; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Normal controller: fixed or adaptive (overrides the config file)
    #[arg(long, value_parser = parse_controller)]
    controller: Option<ControllerKind>,

    /// baseline, single-emergency, multiple-emergencies, peak or imbalanced
    #[arg(short, long, default_value = "baseline")]
    scenario: ScenarioKind,

    /// Run every scenario in turn
    #[arg(long)]
    all: bool,

    /// Simulated seconds (defaults to the scenario's duration)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Seed for the synthetic traffic feed
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Append every tick to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Publish every tick to the signal_states queue
    #[arg(long)]
    amqp: bool,

    /// Pace ticks in wall-clock time
    #[arg(long)]
    realtime: bool,
}

fn parse_controller(s: &str) -> Result<ControllerKind, String> {
    match s {
        "fixed" => Ok(ControllerKind::Fixed),
        "adaptive" => Ok(ControllerKind::Adaptive),
        other => Err(format!("unknown controller '{}' (expected fixed or adaptive)", other)),
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(kind) = args.controller {
        config.controller = kind;
    }
    config.validate()?;

    let mut sinks: Vec<Box<dyn SignalSink>> = Vec::new();
    if let Some(path) = &args.csv {
        sinks.push(Box::new(CsvSignalLog::append(path)?));
    }
    if args.amqp {
        match AmqpSignalPublisher::connect() {
            Ok(publisher) => sinks.push(Box::new(publisher)),
            Err(e) => log::warn!("AMQP publishing disabled: {}", e),
        }
    }

    let scenarios = if args.all {
        TrafficScenario::all()
    } else {
        vec![TrafficScenario::new(args.scenario)]
    };
    let options = SimulationOptions {
        seed: args.seed,
        duration: args.duration,
        realtime: args.realtime,
    };

    for scenario in &scenarios {
        let summary = run_simulation(&config, scenario, &options, &mut sinks).await?;
        println!("{}\n", summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    println!("Starting traffic signal engine...");
    if let Err(e) = run(args).await {
        eprintln!("Engine error: {}", e);
        std::process::exit(1);
    }
}
