//! Error types for the pbstream-core library.
//!
//! Each layer of the library has its own error enum so callers can match on
//! exactly the failures a given operation can produce:
//!
//! - [`SchemaError`]: building a [`Registry`](crate::Registry) from definitions
//! - [`DecodeError`]: interpreting wire-format bytes
//! - [`EncodeError`]: turning a [`Value`](crate::Value) tree into bytes
//! - [`FramingError`]: splitting a record stream into frames
//!
//! The crate-level [`Error`] wraps all of them together with I/O failures.

use crate::codec::WireType;
use crate::schema::FieldKind;
use thiserror::Error;

/// Result type alias for pbstream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all pbstream operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Schema construction failed
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A message failed to decode
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A value tree failed to encode
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The record stream is corrupt or truncated
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Underlying I/O failure on the byte source or sink
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested message type is not in the registry
    #[error("unknown message type '{name}'")]
    UnknownMessage {
        /// The name that failed to resolve
        name: String,
    },

    /// Flattened paths disagree about the shape at a path
    #[error("conflicting value at path '{path}'")]
    PathConflict {
        /// The path where a scalar and a container collide
        path: String,
    },
}

impl Error {
    /// Creates a new unknown message error
    pub fn unknown_message(name: impl Into<String>) -> Self {
        Self::UnknownMessage { name: name.into() }
    }

    /// Returns true if a stream consumer may skip the offending record and
    /// continue with the next frame.
    ///
    /// Frame boundaries are read before payloads are interpreted, so a
    /// payload that fails to decode never desynchronises the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Errors raised while building a schema registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    /// Two types share a fully-qualified name
    #[error("duplicate type name '{name}'")]
    DuplicateType {
        /// The fully-qualified name
        name: String,
    },

    /// Two fields of one message share a number
    #[error("duplicate field number {number} in message '{message}'")]
    DuplicateFieldNumber {
        /// Fully-qualified message name
        message: String,
        /// The repeated field number
        number: u32,
    },

    /// Two fields of one message share a name
    #[error("duplicate field name '{field}' in message '{message}'")]
    DuplicateFieldName {
        /// Fully-qualified message name
        message: String,
        /// The repeated field name
        field: String,
    },

    /// A field's type reference matched no registered type
    #[error("could not resolve type '{type_name}' for field '{message}.{field}'")]
    UnresolvedType {
        /// Fully-qualified message name
        message: String,
        /// Field name
        field: String,
        /// The reference as written in the definition
        type_name: String,
    },

    /// A field definition is structurally invalid
    #[error("invalid field '{message}.{field}': {reason}")]
    InvalidField {
        /// Fully-qualified message name
        message: String,
        /// Field name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// A default value could not be parsed for the field's kind
    #[error("invalid default '{value}' for field '{message}.{field}'")]
    InvalidDefault {
        /// Fully-qualified message name
        message: String,
        /// Field name
        field: String,
        /// The default as written in the definition
        value: String,
    },

    /// A decoded descriptor tree does not have the expected shape
    #[error("malformed schema definition: {0}")]
    MalformedDefinition(String),
}

impl SchemaError {
    /// Creates a new invalid field error
    pub fn invalid_field(
        message: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            message: message.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new malformed definition error
    pub fn malformed(details: impl Into<String>) -> Self {
        Self::MalformedDefinition(details.into())
    }
}

/// Errors raised while decoding wire-format bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The buffer ended in the middle of a key or value
    #[error("truncated input at offset {offset}")]
    Truncated {
        /// Byte offset where more input was needed
        offset: usize,
    },

    /// The input is not valid wire format
    #[error("malformed input at offset {offset}: {details}")]
    Malformed {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// The wire type on the wire cannot carry the field's declared kind
    #[error("field '{field}' declared {kind:?} but arrived as {wire_type:?}")]
    WireTypeMismatch {
        /// Field name
        field: String,
        /// Declared kind
        kind: FieldKind,
        /// Wire type seen in the key
        wire_type: WireType,
    },

    /// Group-delimited fields are not supported
    #[error("unsupported wire type {wire_type:?} at offset {offset}")]
    UnsupportedWireType {
        /// The group wire type
        wire_type: WireType,
        /// Byte offset of the key
        offset: usize,
    },

    /// Embedded messages are nested deeper than the configured limit
    #[error("message nesting exceeds the limit of {limit}")]
    RecursionLimit {
        /// The configured limit
        limit: usize,
    },
}

impl DecodeError {
    /// Creates a new truncation error
    pub fn truncated(offset: usize) -> Self {
        Self::Truncated { offset }
    }

    /// Creates a new malformed input error
    pub fn malformed(offset: usize, details: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            details: details.into(),
        }
    }

    /// Shifts the reported offset by `base`, for errors raised while
    /// decoding a sub-slice of a larger buffer.
    pub(crate) fn offset_by(self, base: usize) -> Self {
        match self {
            Self::Truncated { offset } => Self::Truncated {
                offset: offset + base,
            },
            Self::Malformed { offset, details } => Self::Malformed {
                offset: offset + base,
                details,
            },
            Self::UnsupportedWireType { wire_type, offset } => Self::UnsupportedWireType {
                wire_type,
                offset: offset + base,
            },
            other => other,
        }
    }
}

/// Errors raised while encoding a value tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EncodeError {
    /// The value's variant cannot represent the field's declared kind
    #[error("field '{field}' expects {expected} but the value is {found}")]
    KindMismatch {
        /// Field name
        field: String,
        /// What the descriptor requires
        expected: String,
        /// What the value tree supplied
        found: &'static str,
    },

    /// The value tree names a field the descriptor does not declare
    #[error("message '{message}' has no field named '{field}'")]
    UnknownField {
        /// Fully-qualified message name
        message: String,
        /// The unrecognised field name
        field: String,
    },

    /// A numeric value does not fit the declared kind
    #[error("value {value} is out of range for field '{field}' ({kind:?})")]
    OutOfRange {
        /// Field name
        field: String,
        /// Declared kind
        kind: FieldKind,
        /// The offending value, rendered
        value: String,
    },

    /// An enum symbol is not declared by the field's enum type
    #[error("enum '{enum_name}' has no symbol '{symbol}' (field '{field}')")]
    UnknownEnumSymbol {
        /// Field name
        field: String,
        /// Fully-qualified enum name
        enum_name: String,
        /// The unrecognised symbol
        symbol: String,
    },

    /// The top-level value is not a message
    #[error("expected a message value at the top level, found {found}")]
    NotAMessage {
        /// What was supplied instead
        found: &'static str,
    },

    /// Embedded messages are nested deeper than the configured limit
    #[error("message nesting exceeds the limit of {limit}")]
    RecursionLimit {
        /// The configured limit
        limit: usize,
    },
}

impl EncodeError {
    /// Creates a new kind mismatch error
    pub fn kind_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: &'static str,
    ) -> Self {
        Self::KindMismatch {
            field: field.into(),
            expected: expected.into(),
            found,
        }
    }
}

/// Errors raised while splitting a byte stream into frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FramingError {
    /// The source ended inside a frame
    #[error(
        "truncated record at offset {offset}: {available} byte(s) available{}",
        .declared.as_ref().map(|len| format!(", {len} declared")).unwrap_or_default()
    )]
    TruncatedRecord {
        /// Stream offset of the frame's length prefix
        offset: u64,
        /// Declared payload length, if the prefix itself was complete
        declared: Option<usize>,
        /// Bytes present after the offset when the source ran dry
        available: usize,
    },

    /// The length prefix is not a valid varint
    #[error("malformed length prefix at offset {offset}")]
    MalformedPrefix {
        /// Stream offset of the frame's length prefix
        offset: u64,
    },

    /// A frame declares a payload larger than the configured maximum
    #[error("record at offset {offset} declares {declared} bytes, limit is {limit}")]
    RecordTooLarge {
        /// Stream offset of the frame's length prefix
        offset: u64,
        /// Declared payload length
        declared: u64,
        /// Configured maximum
        limit: usize,
    },
}
