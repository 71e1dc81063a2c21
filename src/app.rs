//! Core application runner (feed driver) for `cr1000-relay`.
//!
//! This module is decoupled from process exit codes and logging setup so it
//! can be tested with injected input streams and sinks.

use crate::config::{ConfigError, Station, StationConfig};
use crate::output::console::ConsoleSink;
use crate::output::file::FileSink;
use crate::output::mqtt::{
    ConnectError, DEFAULT_CLIENT_ID, DEFAULT_HOST, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT,
    MqttSettings, MqttSink,
};
use crate::output::{EmitError, Sink};
use crate::parser::{HEADER_LINE, ParseError, RecordParser};
use crate::throttle::Throttle;
use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Station configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: PathBuf,

    /// Logger export to relay. Reads standard input when omitted or "-"
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Do not echo each record sent to the CSV file or MQTT broker
    #[arg(long)]
    pub silent: bool,

    /// Publish readings to this MQTT topic
    #[arg(long, value_name = "TOPIC", conflicts_with = "output_file")]
    pub mqtt_topic: Option<String>,

    /// MQTT broker hostname
    #[arg(long, default_value = DEFAULT_HOST)]
    pub mqtt_hostname: String,

    /// MQTT broker port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub mqtt_port: u16,

    /// MQTT client identifier
    #[arg(long, default_value = DEFAULT_CLIENT_ID)]
    pub mqtt_client_id: String,

    /// Largest MQTT packet in bytes. A reading set that does not fit fails the run
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    pub mqtt_max_packet_size: usize,

    /// Write readings to this CSV file
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Pause this long after every 1000 readings.
    /// Accepts 30, 30s, 500ms, 2m or 1h; without suffix the value is seconds.
    #[arg(long, alias = "sleep-for", value_parser = crate::throttle::parse_duration)]
    pub throttle: Option<Duration>,

    /// Verbose output, log at debug level
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Where reading sets are sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Console,
    File(PathBuf),
    Mqtt(MqttSettings),
}

impl Options {
    /// The destination selected by the options; console when none is given.
    pub fn destination(&self) -> Destination {
        if let Some(topic) = &self.mqtt_topic {
            let mut settings = MqttSettings::new(&self.mqtt_hostname, self.mqtt_port, topic);
            settings.client_id = self.mqtt_client_id.clone();
            settings.max_packet_size = self.mqtt_max_packet_size;
            Destination::Mqtt(settings)
        } else if let Some(path) = &self.output_file {
            Destination::File(path.clone())
        } else {
            Destination::Console
        }
    }
}

/// Errors returned by the feed driver.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot open input {path}: {source}")]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot read input: {0}")]
    Read(#[source] io::Error),
    #[error("cannot create output file {path}: {source}")]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Counters for a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    /// Lines read, preamble included
    pub lines: usize,
    /// Reading sets delivered to the sink
    pub readings: u64,
    /// Throttle pauses taken
    pub pauses: u64,
}

/// Input stream handed to [`relay`].
pub type Input = Box<dyn AsyncBufRead + Unpin + Send>;

/// Open the export at `path`, or standard input for `None` and `-`.
pub async fn open_input(path: Option<&Path>) -> Result<Input, RunError> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|source| RunError::InputUnavailable {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

/// Build the sink for `destination`.
///
/// # Arguments
/// * `destination` - Console, CSV file path or MQTT settings
/// * `silent` - Suppress the per-record echo of the file and MQTT sinks
///
/// # Returns
/// A boxed sink ready for [`relay`]. The MQTT sink is already connected.
///
/// # Errors
/// Returns `RunError::OutputUnavailable` if the CSV file cannot be created and
/// `RunError::Connect` if the broker is unreachable or refuses the client.
pub async fn open_sink(destination: &Destination, silent: bool) -> Result<Box<dyn Sink>, RunError> {
    match destination {
        Destination::Console => Ok(Box::new(ConsoleSink::stdout())),
        Destination::File(path) => {
            info!("Writing output to CSV file {}", path.display());
            let sink = FileSink::create(path, silent).map_err(|source| {
                RunError::OutputUnavailable {
                    path: path.clone(),
                    source,
                }
            })?;
            Ok(Box::new(sink))
        }
        Destination::Mqtt(settings) => {
            info!(
                "Sending output to MQTT {}:{} on {}",
                settings.host, settings.port, settings.topic
            );
            Ok(Box::new(MqttSink::connect(settings, silent).await?))
        }
    }
}

async fn feed<R>(input: R, sink: &mut dyn Sink, throttle: &mut Throttle) -> Result<Summary, RunError>
where
    R: AsyncBufRead + Unpin,
{
    info!("Reading lines from input...");
    let mut parser = RecordParser::new();
    let mut lines = input.lines();
    let mut readings = 0u64;

    while let Some(line) = lines.next_line().await.map_err(RunError::Read)? {
        let Some(set) = parser.push_line(&line)? else {
            if parser.lines_seen() == HEADER_LINE {
                info!("Header: {:?}", parser.header());
            }
            continue;
        };

        sink.emit(&set).await?;
        readings += 1;

        if throttle.is_due(readings) {
            info!("{readings} readings sent to queue");
            if let Some(interval) = throttle.interval() {
                debug!(?interval, "throttling");
            }
            throttle.pause().await;
        }
    }

    info!("Done! {readings} readings sent to queue");
    Ok(Summary {
        lines: parser.lines_seen(),
        readings,
        pauses: throttle.pauses(),
    })
}

/// Relay every reading set in `input` to `sink`.
///
/// # Arguments
/// * `input` - Logger export, read line by line
/// * `sink` - Destination for each reading set
/// * `throttle` - Pause policy applied every 1000 delivered readings
///
/// # Returns
/// Line, reading and pause counts for the run.
///
/// # Errors
/// Returns `RunError::Read` on an I/O error, `RunError::Parse` on the first
/// bad data line and `RunError::Emit` when the sink rejects a reading set or
/// fails to close (for MQTT, when the broker has not acknowledged every
/// publish). The sink is closed before returning, on success and on error. An
/// error from the feed takes precedence over an error from closing.
pub async fn relay<R>(input: R, sink: &mut dyn Sink, mut throttle: Throttle) -> Result<Summary, RunError>
where
    R: AsyncBufRead + Unpin,
{
    let fed = feed(input, sink, &mut throttle).await;
    let closed = sink.close().await;

    if let (Err(_), Err(error)) = (&fed, &closed) {
        warn!(%error, "failed to close sink");
    }
    let summary = fed?;
    closed?;
    Ok(summary)
}

/// Load the station config, open input and sink, and relay until end of input.
pub async fn run(options: Options) -> Result<Summary, RunError> {
    let station = Station::from_config(StationConfig::from_file(&options.config)?);
    info!(
        station = station.name(),
        sensors = station.sensors().len(),
        "loaded station config"
    );

    let input = open_input(options.input.as_deref()).await?;
    let mut sink = open_sink(&options.destination(), options.silent).await?;
    if options.silent {
        info!("SILENT mode");
    }

    relay(input, sink.as_mut(), Throttle::new(options.throttle)).await
}
