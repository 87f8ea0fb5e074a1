//! The self-describing descriptor schema.
//!
//! Schemas are shipped as serialized `google.protobuf.FileDescriptorSet`
//! messages. Reading one needs a registry that already knows the descriptor
//! types, so this module builds that registry by hand from the subset of
//! `descriptor.proto` the codec relies on. Everything else in a descriptor
//! set (options other than `packed`/`deprecated`, oneofs, extensions,
//! source info) is skipped as unknown fields.

use super::{
    EnumDefinition, FieldDefinition, FieldKind, FileDefinition, MessageDefinition, Registry,
    GROUP_CODE,
};
use crate::codec::{Decoder, Encoder};
use crate::error::{Result, SchemaError};
use crate::value::Value;
use tracing::debug;

/// Package of the descriptor types
pub const DESCRIPTOR_PACKAGE: &str = "google.protobuf";

/// Fully-qualified name of the descriptor set message
pub const FILE_DESCRIPTOR_SET: &str = "google.protobuf.FileDescriptorSet";

/// The descriptor types as a [`FileDefinition`]
pub fn descriptor_definition() -> FileDefinition {
    let repeated = |name: &str, number: u32, type_name: &str| {
        FieldDefinition::new(name, number, FieldKind::Message)
            .repeated()
            .type_name(type_name)
    };
    let string = |name: &str, number: u32| FieldDefinition::new(name, number, FieldKind::String);

    let kinds = FieldKind::ALL.iter().fold(
        EnumDefinition::new("Type").value("TYPE_GROUP", GROUP_CODE as i32),
        |e, kind| e.value(format!("TYPE_{}", kind.as_str().to_uppercase()), kind.code()),
    );
    let labels = EnumDefinition::new("Label")
        .value("LABEL_OPTIONAL", 1)
        .value("LABEL_REQUIRED", 2)
        .value("LABEL_REPEATED", 3);

    FileDefinition::new("google/protobuf/descriptor.proto", DESCRIPTOR_PACKAGE)
        .message(
            MessageDefinition::new("FileDescriptorSet")
                .field(repeated("file", 1, "FileDescriptorProto")),
        )
        .message(
            MessageDefinition::new("FileDescriptorProto")
                .field(string("name", 1))
                .field(string("package", 2))
                .field(string("dependency", 3).repeated())
                .field(repeated("message_type", 4, "DescriptorProto"))
                .field(repeated("enum_type", 5, "EnumDescriptorProto"))
                .field(string("syntax", 12)),
        )
        .message(
            MessageDefinition::new("DescriptorProto")
                .field(string("name", 1))
                .field(repeated("field", 2, "FieldDescriptorProto"))
                .field(repeated("nested_type", 3, "DescriptorProto"))
                .field(repeated("enum_type", 4, "EnumDescriptorProto")),
        )
        .message(
            MessageDefinition::new("FieldDescriptorProto")
                .enumeration(kinds)
                .enumeration(labels)
                .field(string("name", 1))
                .field(FieldDefinition::new("number", 3, FieldKind::Int32))
                .field(FieldDefinition::new("label", 4, FieldKind::Enum).type_name("Label"))
                .field(FieldDefinition::new("type", 5, FieldKind::Enum).type_name("Type"))
                .field(string("type_name", 6))
                .field(string("default_value", 7))
                .field(
                    FieldDefinition::new("options", 8, FieldKind::Message)
                        .type_name(".google.protobuf.FieldOptions"),
                ),
        )
        .message(
            MessageDefinition::new("FieldOptions")
                .field(FieldDefinition::new("packed", 2, FieldKind::Bool))
                .field(
                    FieldDefinition::new("deprecated", 3, FieldKind::Bool).default_value("false"),
                ),
        )
        .message(
            MessageDefinition::new("EnumDescriptorProto")
                .field(string("name", 1))
                .field(repeated("value", 2, "EnumValueDescriptorProto")),
        )
        .message(
            MessageDefinition::new("EnumValueDescriptorProto")
                .field(string("name", 1))
                .field(FieldDefinition::new("number", 2, FieldKind::Int32)),
        )
}

/// Builds the registry of descriptor types
pub fn descriptor_registry() -> std::result::Result<Registry, SchemaError> {
    Registry::build(&descriptor_definition())
}

/// Decodes a serialized `FileDescriptorSet` into file definitions.
///
/// `bootstrap` must be the registry returned by [`descriptor_registry`].
pub fn load_descriptor_set(bytes: &[u8], bootstrap: &Registry) -> Result<Vec<FileDefinition>> {
    let set = crate::codec::decode(bytes, bootstrap, FILE_DESCRIPTOR_SET)?;
    let files = match set.get("file") {
        None | Some(Value::Absent) => &[][..],
        Some(Value::List(files)) => files.as_slice(),
        Some(other) => {
            return Err(SchemaError::malformed(format!(
                "FileDescriptorSet.file is a {}",
                other.kind_name()
            ))
            .into())
        }
    };

    let files = files
        .iter()
        .map(FileDefinition::from_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(files = files.len(), "Loaded descriptor set");
    Ok(files)
}

/// Serializes file definitions as a `FileDescriptorSet`
pub fn encode_descriptor_set(files: &[FileDefinition], bootstrap: &Registry) -> Result<Vec<u8>> {
    let id = bootstrap
        .message_id(FILE_DESCRIPTOR_SET)
        .ok_or_else(|| crate::Error::unknown_message(FILE_DESCRIPTOR_SET))?;
    let set = Value::message([(
        "file",
        Value::List(files.iter().map(FileDefinition::to_value).collect()),
    )]);
    Ok(Encoder::new(bootstrap).encode(&set, id)?)
}

/// Decodes a single serialized `FileDescriptorProto`
pub fn load_file_descriptor(bytes: &[u8], bootstrap: &Registry) -> Result<FileDefinition> {
    let id = bootstrap
        .message_id("google.protobuf.FileDescriptorProto")
        .ok_or_else(|| crate::Error::unknown_message("google.protobuf.FileDescriptorProto"))?;
    let value = Decoder::new(bootstrap).decode(bytes, id)?;
    Ok(FileDefinition::from_value(&value)?)
}
