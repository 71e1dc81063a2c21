//! Output sinks for reading sets.
//!
//! A sink accepts one reading set at a time. The console and MQTT sinks both
//! publish the JSON payload built by [`to_json`], so the same reading set
//! produces the same bytes regardless of destination.

pub mod console;
pub mod file;
pub mod mqtt;

use crate::reading::ReadingSet;
use serde::Serialize;
use std::future::Future;
use std::io;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised when a sink cannot accept a reading set.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("failed to write readings: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize readings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write CSV row: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to publish readings: {0}")]
    Publish(#[from] rumqttc::ClientError),
    #[error("MQTT connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("MQTT connection closed")]
    Disconnected,
    #[error("MQTT broker acknowledged {acked} of {published} readings")]
    Unacknowledged { published: u64, acked: u64 },
    #[error("readings need a {size} byte packet, limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// Future returned by [`Sink`] operations.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EmitError>> + Send + 'a>>;

/// Destination for reading sets.
///
/// Sinks own their destination (stream, file or broker connection). The feed
/// driver calls [`Sink::close`] exactly once when it is done, whether the run
/// succeeded or not.
pub trait Sink: Send {
    /// Deliver one reading set.
    fn emit<'a>(&'a mut self, readings: &'a ReadingSet) -> SinkFuture<'a>;

    /// Flush buffered output and release the destination.
    fn close(&mut self) -> SinkFuture<'_>;
}

/// `serde_json` formatter that puts a space after `,` and `:` in objects.
#[derive(Debug, Default, Clone, Copy)]
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serialize a reading set to its single-line JSON payload.
///
/// Keys follow the reading set's order, e.g.
/// `{"Timestamp": "2024-01-01 00:00", "Temp": 23.5}`.
pub fn to_json(readings: &ReadingSet) -> Result<Vec<u8>, serde_json::Error> {
    let mut payload = Vec::with_capacity(32 * readings.len().max(1));
    let mut serializer = serde_json::Serializer::with_formatter(&mut payload, SpacedFormatter);
    readings.serialize(&mut serializer)?;
    Ok(payload)
}

/// Label used in progress echoes: the first value of the set.
pub(crate) fn echo_label(readings: &ReadingSet) -> String {
    readings.first().map(ToString::to_string).unwrap_or_default()
}
