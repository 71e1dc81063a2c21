//! `cr1000-relay` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The feed driver lives in [`crate::app`] where it can be
//! tested with injected input streams and sinks.

pub mod app;
pub mod config;
pub mod output;
pub mod parser;
pub mod reading;
pub mod throttle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{Destination, Options, RunError, Summary, relay, run};
pub use config::{ConfigError, SensorConfig, Station, StationConfig};
pub use output::console::ConsoleSink;
pub use output::file::FileSink;
pub use output::mqtt::{ConnectError, MqttSettings, MqttSink};
pub use output::{EmitError, Sink, to_json};
pub use parser::{ParseError, RecordParser, parse_header, parse_record};
pub use reading::{ReadingSet, Value};
pub use throttle::{Throttle, parse_duration};
