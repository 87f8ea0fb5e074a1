//! Frame and message readers.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use super::{RecordCursor, StreamConfig};
use crate::codec::MessageCodec;
use crate::error::{FramingError, Result};
use crate::value::Value;

/// Reads raw frames from a byte source.
///
/// The reader pulls `block_size` bytes at a time into an internal buffer
/// and hands out each payload as a [`Bytes`] slice of it. Iterating yields a
/// [`RecordCursor`] per frame and stops after the first error.
pub struct RecordReader<R> {
    source: R,
    config: StreamConfig,
    buf: BytesMut,
    /// Stream offset of `buf[0]`
    base: u64,
    next_number: u64,
    cursor: Option<RecordCursor>,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    /// Create a reader with default configuration
    pub fn new(source: R) -> Self {
        Self::with_config(source, StreamConfig::default())
    }

    /// Create a reader with custom configuration
    pub fn with_config(source: R, config: StreamConfig) -> Self {
        Self {
            source,
            buf: BytesMut::with_capacity(config.block_size),
            config,
            base: 0,
            next_number: 0,
            cursor: None,
            failed: false,
        }
    }

    /// The reader's configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The most recently read frame
    pub fn cursor(&self) -> Option<&RecordCursor> {
        self.cursor.as_ref()
    }

    /// Stream offset of the next frame
    pub fn position(&self) -> u64 {
        self.base
    }

    /// Borrow the underlying source
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    /// Unwrap the underlying source; buffered bytes are discarded
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Reads the next frame's payload, or `None` at a clean end of stream.
    ///
    /// A source that ends inside a frame fails with
    /// [`FramingError::TruncatedRecord`].
    pub fn read_raw(&mut self) -> Result<Option<Bytes>> {
        let prefix = self.config.length_prefix;

        let (declared, prefix_len) = loop {
            match prefix.decode(&self.buf) {
                Ok(Some(decoded)) => break decoded,
                Ok(None) => {
                    if self.fill()? > 0 {
                        continue;
                    }
                    if self.buf.is_empty() {
                        debug!(offset = self.base, records = self.next_number, "End of stream");
                        return Ok(None);
                    }
                    return Err(FramingError::TruncatedRecord {
                        offset: self.base,
                        declared: None,
                        available: self.buf.len(),
                    }
                    .into());
                }
                Err(()) => return Err(FramingError::MalformedPrefix { offset: self.base }.into()),
            }
        };

        let length = usize::try_from(declared)
            .ok()
            .filter(|&len| len <= self.config.max_record_size)
            .ok_or(FramingError::RecordTooLarge {
                offset: self.base,
                declared,
                limit: self.config.max_record_size,
            })?;

        let total = prefix_len + length;
        while self.buf.len() < total {
            if self.fill()? == 0 {
                return Err(FramingError::TruncatedRecord {
                    offset: self.base,
                    declared: Some(length),
                    available: self.buf.len() - prefix_len,
                }
                .into());
            }
        }

        let mut frame = self.buf.split_to(total);
        frame.advance(prefix_len);
        let raw = frame.freeze();

        self.cursor = Some(RecordCursor {
            number: self.next_number,
            offset: self.base,
            length,
            prefix_len,
            raw: raw.clone(),
        });
        self.next_number += 1;
        self.base += total as u64;
        Ok(Some(raw))
    }

    /// Appends up to one block from the source, returning the bytes read
    fn fill(&mut self) -> Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + self.config.block_size, 0);

        let read = loop {
            match self.source.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e.into());
                }
            }
        };

        self.buf.truncate(start + read);
        trace!(offset = self.base + start as u64, bytes = read, "Filled block");
        Ok(read)
    }
}

impl<R: Read + Seek> RecordReader<R> {
    /// Repositions the reader at `offset`, which must be a frame boundary.
    ///
    /// Frame numbering continues from where it was.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.source.seek(SeekFrom::Start(offset))?;
        self.buf.clear();
        self.base = offset;
        self.failed = false;
        trace!(offset, "Seeked");
        Ok(())
    }

    /// Reads exactly one frame starting at `offset`
    pub fn read_raw_at(&mut self, offset: u64) -> Result<Option<Bytes>> {
        self.seek_to(offset)?;
        self.read_raw()
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<RecordCursor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_raw() {
            Ok(Some(_)) => self.cursor.clone().map(Ok),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads and decodes messages from a byte source.
///
/// [`read`](Self::read) leaves the reader at the next frame even when the
/// payload fails to decode, so a caller may skip bad records. Iteration
/// stops after the first error instead.
pub struct MessageReader<R> {
    records: RecordReader<R>,
    codec: MessageCodec,
    failed: bool,
}

impl<R: Read> MessageReader<R> {
    /// Create a reader with default configuration
    pub fn new(source: R, codec: MessageCodec) -> Self {
        Self::from_records(RecordReader::new(source), codec)
    }

    /// Create a reader with custom configuration
    pub fn with_config(source: R, codec: MessageCodec, config: StreamConfig) -> Self {
        Self::from_records(RecordReader::with_config(source, config), codec)
    }

    /// Wrap an existing frame reader
    pub fn from_records(records: RecordReader<R>, codec: MessageCodec) -> Self {
        Self {
            records,
            codec,
            failed: false,
        }
    }

    /// The codec records are decoded with
    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    /// The most recently read frame
    pub fn cursor(&self) -> Option<&RecordCursor> {
        self.records.cursor()
    }

    /// Unwrap the frame reader
    pub fn into_inner(self) -> RecordReader<R> {
        self.records
    }

    /// Reads and decodes the next record, or `None` at end of stream
    pub fn read(&mut self) -> Result<Option<Value>> {
        match self.records.read_raw()? {
            Some(raw) => Ok(Some(self.codec.decode(&raw)?)),
            None => Ok(None),
        }
    }
}

impl<R: Read + Seek> MessageReader<R> {
    /// Reads and decodes exactly one record starting at `offset`
    pub fn read_at(&mut self, offset: u64) -> Result<Option<Value>> {
        self.records.seek_to(offset)?;
        self.failed = false;
        self.read()
    }
}

impl<R: Read> Iterator for MessageReader<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.read().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}
