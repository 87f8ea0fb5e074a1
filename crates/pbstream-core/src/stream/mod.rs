//! Length-prefixed record streams.
//!
//! ## File format
//!
//! A record stream is a plain concatenation of frames with no header or
//! trailer:
//!
//! ```text
//! frame   = prefix payload
//! prefix  = varint(len(payload))            LengthPrefix::Varint (default)
//!         | u32-little-endian(len(payload)) LengthPrefix::Fixed32Le
//! payload = one encoded message of the stream's message type
//! ```
//!
//! A frame's *offset* is the stream position of its prefix. Offsets are
//! stable and may be stored in an external index to read a single record
//! later with [`RecordReader::read_raw_at`] or [`MessageReader::read_at`].
//! A stream ends cleanly only between frames.
//!
//! ## Example
//!
//! ```
//! use pbstream_core::stream::{RecordReader, RecordWriter};
//!
//! let mut writer = RecordWriter::new(Vec::new());
//! writer.write_raw(b"ab")?;
//! writer.write_raw(b"cde")?;
//!
//! let data = writer.into_inner();
//! let mut reader = RecordReader::new(data.as_slice());
//! assert_eq!(reader.read_raw()?.as_deref(), Some(&b"ab"[..]));
//! assert_eq!(reader.read_raw()?.as_deref(), Some(&b"cde"[..]));
//! assert_eq!(reader.cursor().map(|c| c.offset), Some(3));
//! assert_eq!(reader.read_raw()?, None);
//! # Ok::<(), pbstream_core::Error>(())
//! ```

mod reader;
mod writer;

pub use reader::{MessageReader, RecordReader};
pub use writer::{MessageWriter, RecordWriter};

use bytes::{BufMut, Bytes};

use crate::codec::wire::{decode_varint, encode_varint, varint_len, MAX_VARINT_LEN};
use crate::error::DecodeError;

/// Default number of bytes requested from the source per read
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default upper bound on a single payload
pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// How a frame's payload length is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthPrefix {
    /// Base-128 varint, as used for integers on the wire
    #[default]
    Varint,
    /// Four bytes, little-endian
    Fixed32Le,
}

impl LengthPrefix {
    /// Bytes the prefix for a payload of `len` bytes occupies
    pub fn encoded_len(self, len: usize) -> usize {
        match self {
            LengthPrefix::Varint => varint_len(len as u64),
            LengthPrefix::Fixed32Le => 4,
        }
    }

    /// Writes the prefix for a payload of `len` bytes
    pub fn encode(self, len: usize, buf: &mut impl BufMut) {
        match self {
            LengthPrefix::Varint => encode_varint(len as u64, buf),
            LengthPrefix::Fixed32Le => buf.put_u32_le(len as u32),
        }
    }

    /// Reads a prefix from the start of `data`.
    ///
    /// Returns the declared length and the prefix size, `Ok(None)` when
    /// `data` is too short to tell, or `Err(())` when the bytes cannot be
    /// a prefix.
    pub(crate) fn decode(self, data: &[u8]) -> Result<Option<(u64, usize)>, ()> {
        match self {
            LengthPrefix::Varint => match decode_varint(data) {
                Ok(decoded) => Ok(Some(decoded)),
                Err(DecodeError::Truncated { .. }) if data.len() < MAX_VARINT_LEN => Ok(None),
                Err(_) => Err(()),
            },
            LengthPrefix::Fixed32Le => Ok(data
                .get(..4)
                .and_then(|b| <[u8; 4]>::try_from(b).ok())
                .map(|b| (u64::from(u32::from_le_bytes(b)), 4))),
        }
    }
}

/// Configuration for record readers and writers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Bytes requested from the source per read
    pub block_size: usize,
    /// Frame length encoding
    pub length_prefix: LengthPrefix,
    /// Largest payload accepted when reading or writing
    pub max_record_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            length_prefix: LengthPrefix::default(),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read block size; zero is treated as one
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    /// Set the length prefix encoding
    pub fn length_prefix(mut self, prefix: LengthPrefix) -> Self {
        self.length_prefix = prefix;
        self
    }

    /// Set the payload size limit
    pub fn max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Largest payload the configured prefix can frame, capped by
    /// `max_record_size`
    pub fn payload_limit(&self) -> usize {
        match self.length_prefix {
            LengthPrefix::Varint => self.max_record_size,
            LengthPrefix::Fixed32Le => self
                .max_record_size
                .min(usize::try_from(u32::MAX).unwrap_or(usize::MAX)),
        }
    }
}

/// Position and contents of the most recently read frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCursor {
    /// Zero-based count of frames read by this reader, seeks included
    pub number: u64,
    /// Stream offset of the frame's length prefix
    pub offset: u64,
    /// Payload length in bytes
    pub length: usize,
    /// Length prefix size in bytes
    pub prefix_len: usize,
    /// The payload
    pub raw: Bytes,
}

impl RecordCursor {
    /// Stream offset of the first payload byte
    pub fn payload_offset(&self) -> u64 {
        self.offset + self.prefix_len as u64
    }

    /// Stream offset just past the frame
    pub fn end_offset(&self) -> u64 {
        self.payload_offset() + self.length as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_prefix() {
        let prefix = LengthPrefix::Varint;
        let mut buf = Vec::new();
        prefix.encode(300, &mut buf);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(prefix.encoded_len(300), 2);
        assert_eq!(prefix.decode(&buf), Ok(Some((300, 2))));
        assert_eq!(prefix.decode(&buf[..1]), Ok(None));
        assert_eq!(prefix.decode(&[]), Ok(None));
        assert_eq!(prefix.decode(&[0xFF; 10]), Err(()));
    }

    #[test]
    fn test_payload_limit() {
        let config = StreamConfig::new().max_record_size(usize::MAX);
        assert_eq!(config.payload_limit(), usize::MAX);

        let config = config.length_prefix(LengthPrefix::Fixed32Le);
        assert_eq!(config.payload_limit() as u64, u64::from(u32::MAX));

        let config = config.max_record_size(10);
        assert_eq!(config.payload_limit(), 10);
    }

    #[test]
    fn test_fixed_prefix() {
        let prefix = LengthPrefix::Fixed32Le;
        let mut buf = Vec::new();
        prefix.encode(258, &mut buf);
        assert_eq!(buf, vec![0x02, 0x01, 0x00, 0x00]);
        assert_eq!(prefix.encoded_len(0), 4);
        assert_eq!(prefix.decode(&buf), Ok(Some((258, 4))));
        assert_eq!(prefix.decode(&buf[..3]), Ok(None));
    }

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::new()
            .block_size(0)
            .length_prefix(LengthPrefix::Fixed32Le)
            .max_record_size(16);
        assert_eq!(config.block_size, 1);
        assert_eq!(config.length_prefix, LengthPrefix::Fixed32Le);
        assert_eq!(config.max_record_size, 16);
        assert_eq!(StreamConfig::default().block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_cursor_offsets() {
        let cursor = RecordCursor {
            number: 1,
            offset: 3,
            length: 3,
            prefix_len: 1,
            raw: Bytes::from_static(b"cde"),
        };
        assert_eq!(cursor.payload_offset(), 4);
        assert_eq!(cursor.end_offset(), 7);
    }
}
