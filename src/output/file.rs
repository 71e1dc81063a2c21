//! Delimited-file sink.
//!
//! The column layout is taken from the first reading set written. Later
//! reading sets are written in their own field order without reconciling
//! against that header, so a set with a different field list (for example a
//! record with a `NAN` column dropped) ends up misaligned. Rows are buffered
//! and only guaranteed on disk after [`Sink::close`].

use super::{EmitError, Sink, SinkFuture, echo_label};
use crate::reading::ReadingSet;
use csv::{QuoteStyle, WriterBuilder};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// Writes reading sets as quoted CSV rows.
pub struct FileSink<W: Write + Send> {
    writer: csv::Writer<W>,
    header_written: bool,
    silent: bool,
}

impl FileSink<File> {
    /// Create (or truncate) `path` and write rows to it.
    pub fn create(path: &Path, silent: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(file, silent))
    }
}

impl<W: Write + Send> FileSink<W> {
    pub fn from_writer(out: W, silent: bool) -> Self {
        let writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .flexible(true)
            .from_writer(out);
        Self {
            writer,
            header_written: false,
            silent,
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, EmitError> {
        self.writer
            .into_inner()
            .map_err(|e| EmitError::Io(e.into_error()))
    }

    fn write_row(&mut self, readings: &ReadingSet) -> Result<(), EmitError> {
        if !self.silent {
            info!("Writing line to CSV file...{}", echo_label(readings));
        }
        if !self.header_written {
            self.writer.write_record(readings.names())?;
            self.header_written = true;
        }
        self.writer
            .write_record(readings.values().map(ToString::to_string))?;
        Ok(())
    }
}

impl<W: Write + Send> Sink for FileSink<W> {
    fn emit<'a>(&'a mut self, readings: &'a ReadingSet) -> SinkFuture<'a> {
        Box::pin(async move { self.write_row(readings) })
    }

    fn close(&mut self) -> SinkFuture<'_> {
        Box::pin(async move { Ok(self.writer.flush()?) })
    }
}
