//! Message descriptors and the registry that resolves them.
//!
//! ## Architecture
//!
//! Schemas arrive as *definitions* ([`FileDefinition`] and friends): plain
//! data mirroring the descriptor-set format, with type references kept as
//! strings. [`Registry::build`] turns them into resolved, immutable
//! descriptors:
//!
//! 1. Every message and enum, nested ones included, is registered under its
//!    fully-qualified name (`package.Outer.Inner`)
//! 2. Every field's `type_name` is resolved against the completed name table
//!
//! Descriptors live in arenas inside the registry and refer to each other by
//! [`MessageId`]/[`EnumId`], so self-referencing and mutually recursive
//! messages need no shared ownership.
//!
//! The descriptor-set format is itself described by a hand-built registry,
//! see [`bootstrap`].

pub mod bootstrap;
mod definition;
mod registry;

use crate::codec::WireType;
use crate::value::Value;
use std::collections::HashMap;

pub use definition::{EnumDefinition, FieldDefinition, FileDefinition, MessageDefinition};
pub use registry::{FileInfo, Registry};

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// 64-bit IEEE float
    Double,
    /// 32-bit IEEE float
    Float,
    /// Signed 64-bit, plain varint
    Int64,
    /// Unsigned 64-bit varint
    UInt64,
    /// Signed 32-bit, plain varint
    Int32,
    /// Unsigned 64-bit, fixed width
    Fixed64,
    /// Unsigned 32-bit, fixed width
    Fixed32,
    /// Boolean varint
    Bool,
    /// UTF-8 text, length-delimited
    String,
    /// Embedded message
    Message,
    /// Raw bytes, length-delimited
    Bytes,
    /// Unsigned 32-bit varint
    UInt32,
    /// Enumeration, plain varint
    Enum,
    /// Signed 32-bit, fixed width
    SFixed32,
    /// Signed 64-bit, fixed width
    SFixed64,
    /// Signed 32-bit, zig-zag varint
    SInt32,
    /// Signed 64-bit, zig-zag varint
    SInt64,
}

/// `FieldDescriptorProto.Type` code for groups, which are not supported
pub(crate) const GROUP_CODE: i64 = 10;

impl FieldKind {
    /// All kinds, in descriptor code order
    pub const ALL: [FieldKind; 17] = [
        FieldKind::Double,
        FieldKind::Float,
        FieldKind::Int64,
        FieldKind::UInt64,
        FieldKind::Int32,
        FieldKind::Fixed64,
        FieldKind::Fixed32,
        FieldKind::Bool,
        FieldKind::String,
        FieldKind::Message,
        FieldKind::Bytes,
        FieldKind::UInt32,
        FieldKind::Enum,
        FieldKind::SFixed32,
        FieldKind::SFixed64,
        FieldKind::SInt32,
        FieldKind::SInt64,
    ];

    /// Maps a `FieldDescriptorProto.Type` code to a kind
    pub fn from_code(code: i64) -> Option<Self> {
        let kind = match code {
            1 => FieldKind::Double,
            2 => FieldKind::Float,
            3 => FieldKind::Int64,
            4 => FieldKind::UInt64,
            5 => FieldKind::Int32,
            6 => FieldKind::Fixed64,
            7 => FieldKind::Fixed32,
            8 => FieldKind::Bool,
            9 => FieldKind::String,
            11 => FieldKind::Message,
            12 => FieldKind::Bytes,
            13 => FieldKind::UInt32,
            14 => FieldKind::Enum,
            15 => FieldKind::SFixed32,
            16 => FieldKind::SFixed64,
            17 => FieldKind::SInt32,
            18 => FieldKind::SInt64,
            _ => return None,
        };
        Some(kind)
    }

    /// The `FieldDescriptorProto.Type` code of this kind
    pub fn code(self) -> i32 {
        match self {
            FieldKind::Double => 1,
            FieldKind::Float => 2,
            FieldKind::Int64 => 3,
            FieldKind::UInt64 => 4,
            FieldKind::Int32 => 5,
            FieldKind::Fixed64 => 6,
            FieldKind::Fixed32 => 7,
            FieldKind::Bool => 8,
            FieldKind::String => 9,
            FieldKind::Message => 11,
            FieldKind::Bytes => 12,
            FieldKind::UInt32 => 13,
            FieldKind::Enum => 14,
            FieldKind::SFixed32 => 15,
            FieldKind::SFixed64 => 16,
            FieldKind::SInt32 => 17,
            FieldKind::SInt64 => 18,
        }
    }

    /// The wire type a single value of this kind is encoded with
    pub fn wire_type(self) -> WireType {
        match self {
            FieldKind::Int32
            | FieldKind::Int64
            | FieldKind::UInt32
            | FieldKind::UInt64
            | FieldKind::SInt32
            | FieldKind::SInt64
            | FieldKind::Bool
            | FieldKind::Enum => WireType::Varint,
            FieldKind::Fixed64 | FieldKind::SFixed64 | FieldKind::Double => WireType::I64,
            FieldKind::Fixed32 | FieldKind::SFixed32 | FieldKind::Float => WireType::I32,
            FieldKind::String | FieldKind::Bytes | FieldKind::Message => WireType::Len,
        }
    }

    /// Returns true for kinds that may be encoded as a packed run
    pub fn is_packable(self) -> bool {
        self.wire_type() != WireType::Len
    }

    /// The kind's name as written in `.proto` source
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Int64 => "int64",
            FieldKind::UInt64 => "uint64",
            FieldKind::Int32 => "int32",
            FieldKind::Fixed64 => "fixed64",
            FieldKind::Fixed32 => "fixed32",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Message => "message",
            FieldKind::Bytes => "bytes",
            FieldKind::UInt32 => "uint32",
            FieldKind::Enum => "enum",
            FieldKind::SFixed32 => "sfixed32",
            FieldKind::SFixed64 => "sfixed64",
            FieldKind::SInt32 => "sint32",
            FieldKind::SInt64 => "sint64",
        }
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Label {
    /// Zero or one occurrence
    #[default]
    Optional,
    /// Exactly one occurrence (not enforced on decode)
    Required,
    /// Any number of occurrences, decoded as a sequence
    Repeated,
}

impl Label {
    /// Maps a `FieldDescriptorProto.Label` code to a label
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Label::Optional),
            2 => Some(Label::Required),
            3 => Some(Label::Repeated),
            _ => None,
        }
    }

    /// The `FieldDescriptorProto.Label` code of this label
    pub fn code(self) -> i32 {
        match self {
            Label::Optional => 1,
            Label::Required => 2,
            Label::Repeated => 3,
        }
    }
}

/// Handle to a message descriptor inside the [`Registry`] that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub(crate) usize);

/// Handle to an enum descriptor inside the [`Registry`] that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub(crate) usize);

/// What a resolved `type_name` points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A message type
    Message(MessageId),
    /// An enum type
    Enum(EnumId),
}

/// A resolved field
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) number: u32,
    pub(crate) label: Label,
    pub(crate) kind: FieldKind,
    pub(crate) type_name: Option<String>,
    pub(crate) target: Option<TypeRef>,
    pub(crate) default_value: Option<Value>,
    pub(crate) packed: bool,
    pub(crate) deprecated: bool,
}

impl FieldDescriptor {
    /// Field name, unique within its message
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field number, unique within its message
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Cardinality
    pub fn label(&self) -> Label {
        self.label
    }

    /// Declared kind
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Returns true for REPEATED fields
    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    /// Returns true if the field is encoded as a packed run
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Informational deprecation flag
    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    /// The type reference as written in the definition
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// The embedded message type, for MESSAGE fields
    pub fn message_type(&self) -> Option<MessageId> {
        match self.target {
            Some(TypeRef::Message(id)) => Some(id),
            _ => None,
        }
    }

    /// The enum type, for ENUM fields that name one
    pub fn enum_type(&self) -> Option<EnumId> {
        match self.target {
            Some(TypeRef::Enum(id)) => Some(id),
            _ => None,
        }
    }

    /// Value synthesised when the field is absent from the wire
    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }
}

/// A resolved message type
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub(crate) id: MessageId,
    pub(crate) full_name: String,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) by_number: HashMap<u32, usize>,
    pub(crate) by_name: HashMap<String, usize>,
    /// Indices into `fields`, ascending by field number
    pub(crate) number_order: Vec<usize>,
}

impl MessageDescriptor {
    /// Handle of this descriptor in its registry
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Unqualified name
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map_or(self.full_name.as_str(), |(_, name)| name)
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Fields in ascending field-number order
    pub fn fields_by_number(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.number_order.iter().map(move |&i| &self.fields[i])
    }

    /// Looks up a field by number
    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Looks up a field by name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }
}

/// A resolved enum type
#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub(crate) id: EnumId,
    pub(crate) full_name: String,
    pub(crate) values: Vec<(String, i32)>,
}

impl EnumDescriptor {
    /// Handle of this descriptor in its registry
    pub fn id(&self) -> EnumId {
        self.id
    }

    /// Fully-qualified name, without a leading dot
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// `(symbol, number)` pairs in declaration order
    pub fn values(&self) -> &[(String, i32)] {
        &self.values
    }

    /// Number of a symbol
    pub fn value_of(&self, symbol: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|&(_, number)| number)
    }

    /// First symbol declared with a number
    pub fn symbol_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|&&(_, n)| n == number)
            .map(|(name, _)| name.as_str())
    }
}
