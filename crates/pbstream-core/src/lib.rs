//! # pbstream-core
//!
//! A reflective Protocol Buffers codec and a length-prefixed record stream.
//!
//! This crate provides the core functionality for:
//! - Loading message schemas from serialized `FileDescriptorSet` blobs
//! - Decoding and encoding messages against those schemas at runtime, with
//!   no generated code
//! - Reading and writing streams of length-prefixed records, sequentially
//!   or by byte offset
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`schema`]: Definitions, resolved descriptors and the [`Registry`]
//! - [`codec`]: Wire primitives, the visitor-driven decoder and the encoder
//! - [`value`]: The dynamically typed [`Value`] tree
//! - [`stream`]: Record readers and writers
//! - [`flat`]: Dotted-path flattening of value trees
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use pbstream_core::{MessageCodec, MessageReader};
//! use std::fs::{self, File};
//! use std::io::BufReader;
//!
//! // Bind a message type from a descriptor set
//! let schema = fs::read("./schema.pb")?;
//! let codec = MessageCodec::from_descriptor_set(&schema, "shop.Order")?;
//!
//! // Read every record of a stream
//! let input = BufReader::new(File::open("./orders.pbs")?);
//! for record in MessageReader::new(input, codec) {
//!     println!("{}", record?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! Implement [`DecodeVisitor`] to consume decode events directly instead of
//! building a [`Value`] tree.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod codec;
pub mod error;
pub mod flat;
pub mod schema;
pub mod stream;
pub mod value;

// Re-export primary types for convenience
pub use codec::{CodecOptions, DecodeVisitor, Decoder, Encoder, MessageCodec};
pub use error::{DecodeError, EncodeError, Error, FramingError, Result, SchemaError};
pub use schema::Registry;
pub use stream::{
    LengthPrefix, MessageReader, MessageWriter, RecordCursor, RecordReader, RecordWriter,
    StreamConfig,
};
pub use value::{Message, Value};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;
