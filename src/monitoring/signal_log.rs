use crate::global_variables::{AMQP_URL, QUEUE_SIGNAL_STATES};
use crate::shared_data::TickRecord;
use amiquip::{
    Channel, Connection, ConsumerMessage, ConsumerOptions, Exchange, Publish, QueueDeclareOptions,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("AMQP error: {0}")]
    Amqp(#[from] amiquip::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Listener task failed: {0}")]
    Listener(String),
}

/// Destination for the per-tick signal output.
pub trait SignalSink {
    fn set_signal_state(&mut self, record: &TickRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Appends tick records to a CSV file.
pub struct CsvSignalLog<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSignalLog<File> {
    /// Opens `path` for appending; the header row is written only for a new file.
    pub fn append(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file_exists = path.as_ref().exists();
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);
        Ok(Self { writer })
    }
}

impl<W: Write> CsvSignalLog<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().has_headers(true).from_writer(inner),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> SignalSink for CsvSignalLog<W> {
    fn set_signal_state(&mut self, record: &TickRecord) -> Result<(), SinkError> {
        self.writer.serialize(record)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads back a signal log written by [`CsvSignalLog`].
pub fn read_signal_log(path: impl AsRef<Path>) -> Result<Vec<TickRecord>, SinkError> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

/// Publishes tick records as JSON to the "signal_states" queue.
pub struct AmqpSignalPublisher {
    connection: Connection,
    channel: Channel,
}

impl AmqpSignalPublisher {
    pub fn connect() -> Result<Self, SinkError> {
        Self::connect_to(AMQP_URL)
    }

    pub fn connect_to(url: &str) -> Result<Self, SinkError> {
        let mut connection = Connection::insecure_open(url)?;
        let channel = connection.open_channel(None)?;
        channel.queue_declare(QUEUE_SIGNAL_STATES, QueueDeclareOptions::default())?;
        log::info!("Publishing signal states to queue '{}'", QUEUE_SIGNAL_STATES);
        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn close(self) -> Result<(), SinkError> {
        self.connection.close()?;
        Ok(())
    }
}

impl SignalSink for AmqpSignalPublisher {
    fn set_signal_state(&mut self, record: &TickRecord) -> Result<(), SinkError> {
        let payload = serde_json::to_string(record)?;
        let exchange = Exchange::direct(&self.channel);
        exchange.publish(Publish::new(payload.as_bytes(), QUEUE_SIGNAL_STATES))?;
        Ok(())
    }
}

/// Listens to the "signal_states" queue and hands each record to `on_record`.
/// Stops after `limit` records when given.
pub async fn listen_signal_states<F>(
    url: String,
    limit: Option<usize>,
    mut on_record: F,
) -> Result<usize, SinkError>
where
    F: FnMut(TickRecord) + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<usize, SinkError> {
        let mut connection = Connection::insecure_open(&url)?;
        let channel = connection.open_channel(None)?;
        let queue = channel.queue_declare(QUEUE_SIGNAL_STATES, QueueDeclareOptions::default())?;
        let consumer = queue.consume(ConsumerOptions::default())?;
        log::info!("Listening for signal states on '{}'...", QUEUE_SIGNAL_STATES);

        let mut received = 0;
        for message in consumer.receiver() {
            match message {
                ConsumerMessage::Delivery(delivery) => {
                    match serde_json::from_slice::<TickRecord>(&delivery.body) {
                        Ok(record) => {
                            received += 1;
                            on_record(record);
                        }
                        Err(e) => log::warn!("Skipping malformed signal record: {}", e),
                    }
                    consumer.ack(delivery)?;
                    if limit.map_or(false, |n| received >= n) {
                        break;
                    }
                }
                other => {
                    log::info!("Signal state consumer ended: {:?}", other);
                    break;
                }
            }
        }
        connection.close()?;
        Ok(received)
    })
    .await
    .map_err(|e| SinkError::Listener(e.to_string()))?
}
