//! Unresolved schema definitions.
//!
//! These mirror `FileDescriptorProto` and its children field for field, so
//! they can be read from a decoded descriptor set ([`FileDefinition::from_value`]),
//! written back out ([`FileDefinition::to_value`]), converted from
//! `prost_types`, or assembled by hand with the builder methods.

use super::{FieldKind, Label, GROUP_CODE};
use crate::error::SchemaError;
use crate::value::{Message, Value};

/// A schema file: the unit a [`Registry`](super::Registry) is built from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDefinition {
    /// File name, e.g. `people.proto`
    pub name: String,
    /// Package prefix for every type in the file
    pub package: String,
    /// Names of imported files (recorded, not resolved)
    pub dependency: Vec<String>,
    /// Top-level messages
    pub message_type: Vec<MessageDefinition>,
    /// Top-level enums
    pub enum_type: Vec<EnumDefinition>,
}

/// A message type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDefinition {
    /// Unqualified name
    pub name: String,
    /// Fields in declaration order
    pub field: Vec<FieldDefinition>,
    /// Messages declared inside this one
    pub nested_type: Vec<MessageDefinition>,
    /// Enums declared inside this one
    pub enum_type: Vec<EnumDefinition>,
}

/// A field of a message type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    /// Field name
    pub name: String,
    /// Field number
    pub number: u32,
    /// Cardinality
    pub label: Label,
    /// Declared kind
    pub kind: FieldKind,
    /// Type reference for ENUM and MESSAGE fields
    pub type_name: Option<String>,
    /// Default in protobuf text form
    pub default_value: Option<String>,
    /// Packed encoding for repeated numeric fields
    pub packed: bool,
    /// Informational
    pub deprecated: bool,
}

/// An enum type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumDefinition {
    /// Unqualified name
    pub name: String,
    /// `(symbol, number)` pairs
    pub value: Vec<(String, i32)>,
}

impl FileDefinition {
    /// Creates an empty file definition
    pub fn new(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            ..Self::default()
        }
    }

    /// Adds a top-level message
    pub fn message(mut self, message: MessageDefinition) -> Self {
        self.message_type.push(message);
        self
    }

    /// Adds a top-level enum
    pub fn enumeration(mut self, enumeration: EnumDefinition) -> Self {
        self.enum_type.push(enumeration);
        self
    }

    /// Records an imported file name
    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        self.dependency.push(name.into());
        self
    }

    /// Reads a decoded `FileDescriptorProto` value tree
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let fields = expect_message(value, "FileDescriptorProto")?;
        Ok(Self {
            name: string_field(fields, "name")?.unwrap_or_default(),
            package: string_field(fields, "package")?.unwrap_or_default(),
            dependency: list_field(fields, "dependency")?
                .iter()
                .map(|v| as_string(v, "dependency"))
                .collect::<Result<_, _>>()?,
            message_type: list_field(fields, "message_type")?
                .iter()
                .map(MessageDefinition::from_value)
                .collect::<Result<_, _>>()?,
            enum_type: list_field(fields, "enum_type")?
                .iter()
                .map(EnumDefinition::from_value)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Writes the definition as a `FileDescriptorProto` value tree
    pub fn to_value(&self) -> Value {
        let mut fields = Message::new();
        fields.insert("name".into(), Value::from(self.name.as_str()));
        if !self.package.is_empty() {
            fields.insert("package".into(), Value::from(self.package.as_str()));
        }
        insert_list(
            &mut fields,
            "dependency",
            self.dependency.iter().map(|d| Value::from(d.as_str())),
        );
        insert_list(
            &mut fields,
            "message_type",
            self.message_type.iter().map(MessageDefinition::to_value),
        );
        insert_list(
            &mut fields,
            "enum_type",
            self.enum_type.iter().map(EnumDefinition::to_value),
        );
        Value::Message(fields)
    }
}

impl MessageDefinition {
    /// Creates an empty message definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a field
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.field.push(field);
        self
    }

    /// Adds a nested message
    pub fn nested(mut self, message: MessageDefinition) -> Self {
        self.nested_type.push(message);
        self
    }

    /// Adds a nested enum
    pub fn enumeration(mut self, enumeration: EnumDefinition) -> Self {
        self.enum_type.push(enumeration);
        self
    }

    /// Reads a decoded `DescriptorProto` value tree
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let fields = expect_message(value, "DescriptorProto")?;
        let name = string_field(fields, "name")?
            .ok_or_else(|| SchemaError::malformed("message without a name"))?;
        Ok(Self {
            field: list_field(fields, "field")?
                .iter()
                .map(|f| FieldDefinition::from_value(f, &name))
                .collect::<Result<_, _>>()?,
            nested_type: list_field(fields, "nested_type")?
                .iter()
                .map(MessageDefinition::from_value)
                .collect::<Result<_, _>>()?,
            enum_type: list_field(fields, "enum_type")?
                .iter()
                .map(EnumDefinition::from_value)
                .collect::<Result<_, _>>()?,
            name,
        })
    }

    /// Writes the definition as a `DescriptorProto` value tree
    pub fn to_value(&self) -> Value {
        let mut fields = Message::new();
        fields.insert("name".into(), Value::from(self.name.as_str()));
        insert_list(
            &mut fields,
            "field",
            self.field.iter().map(FieldDefinition::to_value),
        );
        insert_list(
            &mut fields,
            "nested_type",
            self.nested_type.iter().map(MessageDefinition::to_value),
        );
        insert_list(
            &mut fields,
            "enum_type",
            self.enum_type.iter().map(EnumDefinition::to_value),
        );
        Value::Message(fields)
    }
}

impl FieldDefinition {
    /// Creates an OPTIONAL field
    pub fn new(name: impl Into<String>, number: u32, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            number,
            label: Label::Optional,
            kind,
            type_name: None,
            default_value: None,
            packed: false,
            deprecated: false,
        }
    }

    /// Marks the field REPEATED
    pub fn repeated(mut self) -> Self {
        self.label = Label::Repeated;
        self
    }

    /// Marks the field REQUIRED
    pub fn required(mut self) -> Self {
        self.label = Label::Required;
        self
    }

    /// Sets the ENUM/MESSAGE type reference
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Sets the default, in protobuf text form
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sets packed encoding
    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = packed;
        self
    }

    /// Sets the deprecation flag
    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = deprecated;
        self
    }

    /// Builds a field from raw descriptor codes
    fn from_codes(
        message: &str,
        name: String,
        number: Option<i64>,
        label: Option<i64>,
        kind: Option<i64>,
    ) -> Result<Self, SchemaError> {
        let number = number
            .ok_or_else(|| SchemaError::invalid_field(message, &name, "missing field number"))?;
        let number = u32::try_from(number).map_err(|_| {
            SchemaError::invalid_field(message, &name, format!("invalid field number {}", number))
        })?;
        let label = match label {
            None => Label::Optional,
            Some(code) => Label::from_code(code).ok_or_else(|| {
                SchemaError::invalid_field(message, &name, format!("unknown label code {}", code))
            })?,
        };
        let kind = match kind {
            None => {
                return Err(SchemaError::invalid_field(message, &name, "missing field type"))
            }
            Some(GROUP_CODE) => {
                return Err(SchemaError::invalid_field(
                    message,
                    &name,
                    "group fields are not supported",
                ))
            }
            Some(code) => FieldKind::from_code(code).ok_or_else(|| {
                SchemaError::invalid_field(message, &name, format!("unknown type code {}", code))
            })?,
        };

        let mut field = Self::new(name, number, kind);
        field.label = label;
        Ok(field)
    }

    /// Reads a decoded `FieldDescriptorProto` value tree
    fn from_value(value: &Value, message: &str) -> Result<Self, SchemaError> {
        let fields = expect_message(value, "FieldDescriptorProto")?;
        let name = string_field(fields, "name")?.ok_or_else(|| {
            SchemaError::malformed(format!("field without a name in '{}'", message))
        })?;

        let mut field = Self::from_codes(
            message,
            name,
            int_field(fields, "number")?,
            int_field(fields, "label")?,
            int_field(fields, "type")?,
        )?;
        field.type_name = string_field(fields, "type_name")?.filter(|s| !s.is_empty());
        field.default_value = string_field(fields, "default_value")?;

        if let Some(options) = fields.get("options").filter(|v| !v.is_absent()) {
            let options = expect_message(options, "FieldOptions")?;
            field.packed = bool_field(options, "packed")?.unwrap_or(false);
            field.deprecated = bool_field(options, "deprecated")?.unwrap_or(false);
        }

        Ok(field)
    }

    /// Writes the definition as a `FieldDescriptorProto` value tree
    pub fn to_value(&self) -> Value {
        let mut fields = Message::new();
        fields.insert("name".into(), Value::from(self.name.as_str()));
        fields.insert("number".into(), Value::Int(self.number as i64));
        fields.insert("label".into(), Value::Int(self.label.code() as i64));
        fields.insert("type".into(), Value::Int(self.kind.code() as i64));
        if let Some(type_name) = &self.type_name {
            fields.insert("type_name".into(), Value::from(type_name.as_str()));
        }
        if let Some(default) = &self.default_value {
            fields.insert("default_value".into(), Value::from(default.as_str()));
        }
        if self.packed || self.deprecated {
            let mut options = Message::new();
            if self.packed {
                options.insert("packed".into(), Value::Bool(true));
            }
            if self.deprecated {
                options.insert("deprecated".into(), Value::Bool(true));
            }
            fields.insert("options".into(), Value::Message(options));
        }
        Value::Message(fields)
    }
}

impl EnumDefinition {
    /// Creates an enum with no symbols
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Vec::new(),
        }
    }

    /// Adds a symbol
    pub fn value(mut self, symbol: impl Into<String>, number: i32) -> Self {
        self.value.push((symbol.into(), number));
        self
    }

    /// Reads a decoded `EnumDescriptorProto` value tree
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let fields = expect_message(value, "EnumDescriptorProto")?;
        let name = string_field(fields, "name")?
            .ok_or_else(|| SchemaError::malformed("enum without a name"))?;
        let value = list_field(fields, "value")?
            .iter()
            .map(|v| {
                let entry = expect_message(v, "EnumValueDescriptorProto")?;
                let symbol = string_field(entry, "name")?.ok_or_else(|| {
                    SchemaError::malformed(format!("unnamed value in enum '{}'", name))
                })?;
                let number = int_field(entry, "number")?
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| {
                        SchemaError::malformed(format!(
                            "enum value '{}' has no valid number",
                            symbol
                        ))
                    })?;
                Ok((symbol, number))
            })
            .collect::<Result<_, SchemaError>>()?;
        Ok(Self { name, value })
    }

    /// Writes the definition as an `EnumDescriptorProto` value tree
    pub fn to_value(&self) -> Value {
        let mut fields = Message::new();
        fields.insert("name".into(), Value::from(self.name.as_str()));
        insert_list(
            &mut fields,
            "value",
            self.value.iter().map(|(symbol, number)| {
                Value::message([
                    ("name", Value::from(symbol.as_str())),
                    ("number", Value::Int(*number as i64)),
                ])
            }),
        );
        Value::Message(fields)
    }
}

impl TryFrom<&prost_types::FileDescriptorProto> for FileDefinition {
    type Error = SchemaError;

    fn try_from(proto: &prost_types::FileDescriptorProto) -> Result<Self, SchemaError> {
        Ok(Self {
            name: proto.name().to_string(),
            package: proto.package().to_string(),
            dependency: proto.dependency.clone(),
            message_type: proto
                .message_type
                .iter()
                .map(MessageDefinition::try_from)
                .collect::<Result<_, _>>()?,
            enum_type: proto.enum_type.iter().map(EnumDefinition::from).collect(),
        })
    }
}

impl TryFrom<&prost_types::DescriptorProto> for MessageDefinition {
    type Error = SchemaError;

    fn try_from(proto: &prost_types::DescriptorProto) -> Result<Self, SchemaError> {
        let name = proto.name().to_string();
        let field = proto
            .field
            .iter()
            .map(|f| {
                let mut field = FieldDefinition::from_codes(
                    &name,
                    f.name().to_string(),
                    f.number.map(i64::from),
                    f.label.map(i64::from),
                    f.r#type.map(i64::from),
                )?;
                field.type_name = f.type_name.clone().filter(|s| !s.is_empty());
                field.default_value = f.default_value.clone();
                if let Some(options) = &f.options {
                    field.packed = options.packed.unwrap_or(false);
                    field.deprecated = options.deprecated.unwrap_or(false);
                }
                Ok(field)
            })
            .collect::<Result<_, SchemaError>>()?;

        Ok(Self {
            field,
            nested_type: proto
                .nested_type
                .iter()
                .map(MessageDefinition::try_from)
                .collect::<Result<_, _>>()?,
            enum_type: proto.enum_type.iter().map(EnumDefinition::from).collect(),
            name,
        })
    }
}

impl From<&prost_types::EnumDescriptorProto> for EnumDefinition {
    fn from(proto: &prost_types::EnumDescriptorProto) -> Self {
        Self {
            name: proto.name().to_string(),
            value: proto
                .value
                .iter()
                .map(|v| (v.name().to_string(), v.number()))
                .collect(),
        }
    }
}

fn expect_message<'a>(value: &'a Value, what: &str) -> Result<&'a Message, SchemaError> {
    value.as_message().ok_or_else(|| {
        SchemaError::malformed(format!(
            "{} must be a message, found {}",
            what,
            value.kind_name()
        ))
    })
}

fn present<'a>(fields: &'a Message, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|v| !v.is_absent())
}

fn as_string(value: &Value, name: &str) -> Result<String, SchemaError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SchemaError::malformed(format!("'{}' must be a UTF-8 string", name)))
}

fn string_field(fields: &Message, name: &str) -> Result<Option<String>, SchemaError> {
    present(fields, name).map(|v| as_string(v, name)).transpose()
}

fn int_field(fields: &Message, name: &str) -> Result<Option<i64>, SchemaError> {
    present(fields, name)
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| SchemaError::malformed(format!("'{}' must be an integer", name)))
        })
        .transpose()
}

fn bool_field(fields: &Message, name: &str) -> Result<Option<bool>, SchemaError> {
    present(fields, name)
        .map(|v| {
            v.as_bool()
                .ok_or_else(|| SchemaError::malformed(format!("'{}' must be a bool", name)))
        })
        .transpose()
}

fn list_field<'a>(fields: &'a Message, name: &str) -> Result<&'a [Value], SchemaError> {
    match present(fields, name) {
        None => Ok(&[]),
        Some(v) => v
            .as_list()
            .ok_or_else(|| SchemaError::malformed(format!("'{}' must be a sequence", name))),
    }
}

fn insert_list(fields: &mut Message, name: &str, items: impl Iterator<Item = Value>) {
    let items: Vec<Value> = items.collect();
    if !items.is_empty() {
        fields.insert(name.to_string(), Value::List(items));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> FileDefinition {
        FileDefinition::new("people.proto", "demo")
            .dependency("common.proto")
            .message(
                MessageDefinition::new("Person")
                    .field(FieldDefinition::new("name", 1, FieldKind::String).required())
                    .field(
                        FieldDefinition::new("scores", 2, FieldKind::Int32)
                            .repeated()
                            .packed(true),
                    )
                    .field(
                        FieldDefinition::new("kind", 3, FieldKind::Enum)
                            .type_name("Kind")
                            .default_value("HUMAN"),
                    )
                    .enumeration(EnumDefinition::new("Kind").value("HUMAN", 0).value("ROBOT", 1)),
            )
    }

    #[test]
    fn test_value_roundtrip() {
        let file = sample();
        let parsed = FileDefinition::from_value(&file.to_value()).unwrap();
        assert_eq!(parsed, file);
    }

    #[test]
    fn test_missing_type_is_invalid() {
        let field = Value::message([("name", Value::from("x")), ("number", Value::from(1))]);
        let message = Value::message([
            ("name", Value::from("M")),
            ("field", Value::List(vec![field])),
        ]);
        let err = MessageDefinition::from_value(&message).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { .. }));
    }

    #[test]
    fn test_group_is_rejected() {
        let err = FieldDefinition::from_codes("M", "g".into(), Some(1), None, Some(GROUP_CODE))
            .unwrap_err();
        assert!(err.to_string().contains("group"));
    }

    #[test]
    fn test_negative_number_is_invalid() {
        let err =
            FieldDefinition::from_codes("M", "f".into(), Some(-3), None, Some(5)).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { .. }));
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let err = FileDefinition::from_value(&Value::from(5)).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedDefinition(_)));
    }

    #[test]
    fn test_from_prost_types() {
        use prost_types::field_descriptor_proto::{Label as PLabel, Type as PType};

        let proto = prost_types::FileDescriptorProto {
            name: Some("people.proto".into()),
            package: Some("demo".into()),
            message_type: vec![prost_types::DescriptorProto {
                name: Some("Person".into()),
                field: vec![prost_types::FieldDescriptorProto {
                    name: Some("ids".into()),
                    number: Some(4),
                    label: Some(PLabel::Repeated as i32),
                    r#type: Some(PType::Uint64 as i32),
                    options: Some(prost_types::FieldOptions {
                        packed: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let file = FileDefinition::try_from(&proto).unwrap();
        let field = &file.message_type[0].field[0];
        assert_eq!(field.kind, FieldKind::UInt64);
        assert_eq!(field.label, Label::Repeated);
        assert!(field.packed);
    }
}
