//! Reflective encoding and decoding of protobuf messages.
//!
//! This module converts between wire-format bytes and [`Value`] trees using
//! the descriptors of a [`Registry`]; no generated code is involved.
//!
//! ## Architecture
//!
//! - [`wire`]: varints, zig-zag, fixed-width values and field keys
//! - [`Decoder`]: walks bytes and reports what it finds to a [`DecodeVisitor`]
//! - [`ValueBuilder`]: the visitor that assembles a [`Value`] tree
//! - [`Encoder`]: serializes a [`Value`] tree in field-number order
//! - [`MessageCodec`]: a registry and message type bundled together
//!
//! ## Example
//!
//! ```
//! use pbstream_core::codec::MessageCodec;
//! use pbstream_core::schema::{
//!     FieldDefinition, FieldKind, FileDefinition, MessageDefinition, Registry,
//! };
//! use pbstream_core::Value;
//! use std::sync::Arc;
//!
//! let file = FileDefinition::new("hello.proto", "demo").message(
//!     MessageDefinition::new("Hello").field(FieldDefinition::new("name", 1, FieldKind::String)),
//! );
//! let registry = Arc::new(Registry::build(&file)?);
//! let codec = MessageCodec::new(registry, "demo.Hello")?;
//!
//! let bytes = codec.encode(&Value::message([("name", Value::from("hi"))]))?;
//! assert_eq!(bytes, [0x0A, 0x02, b'h', b'i']);
//! assert_eq!(codec.decode(&bytes)?.get("name"), Some(&Value::from("hi")));
//! # Ok::<(), pbstream_core::Error>(())
//! ```

mod decoder;
mod encoder;
mod visitor;
pub mod wire;

use std::sync::Arc;

use crate::error::{DecodeError, EncodeError, Error, Result};
use crate::schema::{bootstrap, MessageDescriptor, MessageId, Registry};
use crate::value::Value;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use visitor::{DecodeVisitor, NullVisitor, StatsVisitor, ValueBuilder};
pub use wire::WireType;

/// Default limit on message nesting
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Options shared by [`Decoder`] and [`Encoder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Deepest message nesting accepted, the outermost message counting as 1
    pub max_depth: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CodecOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the nesting limit
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Decodes `bytes` as the message named `message_name`
pub fn decode(bytes: &[u8], registry: &Registry, message_name: &str) -> Result<Value> {
    let id = registry
        .message_id(message_name)
        .ok_or_else(|| Error::unknown_message(message_name))?;
    Ok(Decoder::new(registry).decode(bytes, id)?)
}

/// Encodes `value` as the message named `message_name`
pub fn encode(value: &Value, registry: &Registry, message_name: &str) -> Result<Vec<u8>> {
    let id = registry
        .message_id(message_name)
        .ok_or_else(|| Error::unknown_message(message_name))?;
    Ok(Encoder::new(registry).encode(value, id)?)
}

/// A shared registry bound to one message type.
///
/// Cloning is cheap; clones share the registry.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    registry: Arc<Registry>,
    message: MessageId,
    options: CodecOptions,
}

impl MessageCodec {
    /// Binds `registry` to the message named `message_name`
    pub fn new(registry: Arc<Registry>, message_name: &str) -> Result<Self> {
        let message = registry
            .message_id(message_name)
            .ok_or_else(|| Error::unknown_message(message_name))?;
        Ok(Self {
            registry,
            message,
            options: CodecOptions::default(),
        })
    }

    /// Builds a codec from a serialized `FileDescriptorSet`.
    ///
    /// All files in the set are registered together, so `message_name` may
    /// refer to types declared in any of them.
    pub fn from_descriptor_set(descriptor_set: &[u8], message_name: &str) -> Result<Self> {
        let bootstrap = bootstrap::descriptor_registry()?;
        let files = bootstrap::load_descriptor_set(descriptor_set, &bootstrap)?;
        let registry = Registry::build_all(&files)?;
        Self::new(Arc::new(registry), message_name)
    }

    /// Replaces the codec options
    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// The shared registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The bound message type
    pub fn descriptor(&self) -> &MessageDescriptor {
        self.registry.message_at(self.message)
    }

    /// Decodes one message
    pub fn decode(&self, bytes: &[u8]) -> std::result::Result<Value, DecodeError> {
        Decoder::with_options(&self.registry, self.options).decode(bytes, self.message)
    }

    /// Feeds the decode events of one message to `visitor`
    pub fn walk<V: DecodeVisitor + ?Sized>(
        &self,
        bytes: &[u8],
        visitor: &mut V,
    ) -> std::result::Result<(), DecodeError> {
        Decoder::with_options(&self.registry, self.options).walk(bytes, self.message, visitor)
    }

    /// Checks that `bytes` decode without building a value tree
    pub fn validate(&self, bytes: &[u8]) -> std::result::Result<(), DecodeError> {
        self.walk(bytes, &mut NullVisitor)
    }

    /// Encodes one message
    pub fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, EncodeError> {
        Encoder::with_options(&self.registry, self.options).encode(value, self.message)
    }
}
