//! Console sink: one JSON line per reading set.

use super::{EmitError, Sink, SinkFuture, to_json};
use crate::reading::ReadingSet;
use std::io::{self, Write};

/// Writes each reading set as a JSON line to a stream, stdout by default.
#[derive(Debug)]
pub struct ConsoleSink<W: Write + Send> {
    out: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_readings(&mut self, readings: &ReadingSet) -> Result<(), EmitError> {
        let mut line = to_json(readings)?;
        line.push(b'\n');
        self.out.write_all(&line)?;
        Ok(())
    }
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn emit<'a>(&'a mut self, readings: &'a ReadingSet) -> SinkFuture<'a> {
        Box::pin(async move { self.write_readings(readings) })
    }

    fn close(&mut self) -> SinkFuture<'_> {
        Box::pin(async move { Ok(self.out.flush()?) })
    }
}
