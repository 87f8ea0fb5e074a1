//! Frame and message writers.

use std::io::Write;

use tracing::debug;

use super::StreamConfig;
use crate::codec::MessageCodec;
use crate::error::{FramingError, Result};
use crate::value::Value;

/// Writes raw frames to a byte sink.
///
/// Each frame is assembled in memory and handed to the sink with a single
/// `write_all`, so the sink never sees a prefix without its payload unless
/// the sink itself fails part way.
pub struct RecordWriter<W> {
    sink: W,
    config: StreamConfig,
    offset: u64,
    count: u64,
    frame: Vec<u8>,
}

impl<W: Write> RecordWriter<W> {
    /// Create a writer with default configuration
    pub fn new(sink: W) -> Self {
        Self::with_config(sink, StreamConfig::default())
    }

    /// Create a writer with custom configuration
    pub fn with_config(sink: W, config: StreamConfig) -> Self {
        Self {
            sink,
            config,
            offset: 0,
            count: 0,
            frame: Vec::new(),
        }
    }

    /// Create a writer for a sink that already holds `offset` bytes, such as
    /// a file opened for append
    pub fn at_offset(sink: W, config: StreamConfig, offset: u64) -> Self {
        Self {
            offset,
            ..Self::with_config(sink, config)
        }
    }

    /// Writes one frame and returns its stream offset
    pub fn write_raw(&mut self, payload: &[u8]) -> Result<u64> {
        let limit = self.config.payload_limit();
        if payload.len() > limit {
            return Err(FramingError::RecordTooLarge {
                offset: self.offset,
                declared: payload.len() as u64,
                limit,
            }
            .into());
        }

        let prefix = self.config.length_prefix;
        self.frame.clear();
        self.frame.reserve(prefix.encoded_len(payload.len()) + payload.len());
        prefix.encode(payload.len(), &mut self.frame);
        self.frame.extend_from_slice(payload);
        self.sink.write_all(&self.frame)?;

        let offset = self.offset;
        self.offset += self.frame.len() as u64;
        self.count += 1;
        Ok(offset)
    }

    /// Stream offset the next frame will be written at
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Number of frames written
    pub fn records_written(&self) -> u64 {
        self.count
    }

    /// Flush the sink
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        debug!(records = self.count, bytes = self.offset, "Flushed record stream");
        Ok(())
    }

    /// Borrow the underlying sink
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Unwrap the underlying sink without flushing
    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Encodes and writes messages to a byte sink
pub struct MessageWriter<W> {
    records: RecordWriter<W>,
    codec: MessageCodec,
}

impl<W: Write> MessageWriter<W> {
    /// Create a writer with default configuration
    pub fn new(sink: W, codec: MessageCodec) -> Self {
        Self::from_records(RecordWriter::new(sink), codec)
    }

    /// Create a writer with custom configuration
    pub fn with_config(sink: W, codec: MessageCodec, config: StreamConfig) -> Self {
        Self::from_records(RecordWriter::with_config(sink, config), codec)
    }

    /// Wrap an existing frame writer
    pub fn from_records(records: RecordWriter<W>, codec: MessageCodec) -> Self {
        Self { records, codec }
    }

    /// Encodes `value` and writes it as one frame, returning its offset.
    ///
    /// Nothing is written if encoding fails.
    pub fn write(&mut self, value: &Value) -> Result<u64> {
        let payload = self.codec.encode(value)?;
        self.records.write_raw(&payload)
    }

    /// The frame writer
    pub fn records(&self) -> &RecordWriter<W> {
        &self.records
    }

    /// Flush the sink
    pub fn flush(&mut self) -> Result<()> {
        self.records.flush()
    }

    /// Unwrap the frame writer
    pub fn into_inner(self) -> RecordWriter<W> {
        self.records
    }
}
