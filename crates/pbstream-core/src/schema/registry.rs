//! Two-pass registry construction.

use super::{
    EnumDefinition, EnumDescriptor, EnumId, FieldDefinition, FieldDescriptor, FieldKind,
    FileDefinition, Label, MessageDefinition, MessageDescriptor, MessageId, TypeRef,
};
use crate::error::SchemaError;
use crate::value::Value;
use crate::MAX_FIELD_NUMBER;
use std::collections::HashMap;
use tracing::{debug, trace};

/// File-level metadata kept by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File name
    pub name: String,
    /// Package prefix
    pub package: String,
    /// Imported file names, as declared
    pub dependency: Vec<String>,
}

/// Immutable table of resolved message and enum descriptors.
///
/// A registry has no interior mutability; share it across threads with an
/// `Arc` and decode or encode against it concurrently.
#[derive(Debug, Clone)]
pub struct Registry {
    files: Vec<FileInfo>,
    messages: Vec<MessageDescriptor>,
    enums: Vec<EnumDescriptor>,
    types: HashMap<String, TypeRef>,
}

/// A message definition waiting for pass two, with its qualified name
struct PendingMessage<'a> {
    full_name: String,
    definition: &'a MessageDefinition,
}

impl Registry {
    /// Builds a registry from a single file definition
    pub fn build(definition: &FileDefinition) -> Result<Self, SchemaError> {
        Self::build_all(std::slice::from_ref(definition))
    }

    /// Builds one registry from several files sharing a name table.
    ///
    /// Types may reference types in any of the files, which is how a
    /// descriptor set produced with `--include_imports` is laid out.
    pub fn build_all<'a>(
        definitions: impl IntoIterator<Item = &'a FileDefinition>,
    ) -> Result<Self, SchemaError> {
        let mut registry = Registry {
            files: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            types: HashMap::new(),
        };
        let mut pending = Vec::new();

        // Pass one: register every name so references can point anywhere
        for file in definitions {
            registry.files.push(FileInfo {
                name: file.name.clone(),
                package: file.package.clone(),
                dependency: file.dependency.clone(),
            });
            for enumeration in &file.enum_type {
                registry.register_enum(&file.package, enumeration)?;
            }
            for message in &file.message_type {
                registry.register_message(&file.package, message, &mut pending)?;
            }
        }

        // Pass two: resolve fields against the completed table
        for (index, message) in pending.iter().enumerate() {
            let fields = message
                .definition
                .field
                .iter()
                .map(|field| registry.resolve_field(&message.full_name, field))
                .collect::<Result<Vec<_>, _>>()?;
            registry.messages[index].install_fields(fields)?;
        }

        debug!(
            "Built registry: {} message(s), {} enum(s) from {} file(s)",
            registry.messages.len(),
            registry.enums.len(),
            registry.files.len()
        );

        Ok(registry)
    }

    fn insert_type(&mut self, full_name: &str, target: TypeRef) -> Result<(), SchemaError> {
        if self.types.contains_key(full_name) {
            return Err(SchemaError::DuplicateType {
                name: full_name.to_string(),
            });
        }
        trace!("Registered {:?} as {}", target, full_name);
        self.types.insert(full_name.to_string(), target);
        Ok(())
    }

    fn register_enum(
        &mut self,
        scope: &str,
        definition: &EnumDefinition,
    ) -> Result<(), SchemaError> {
        let full_name = qualify(scope, &definition.name);
        let id = EnumId(self.enums.len());
        self.insert_type(&full_name, TypeRef::Enum(id))?;
        self.enums.push(EnumDescriptor {
            id,
            full_name,
            values: definition.value.clone(),
        });
        Ok(())
    }

    fn register_message<'a>(
        &mut self,
        scope: &str,
        definition: &'a MessageDefinition,
        pending: &mut Vec<PendingMessage<'a>>,
    ) -> Result<(), SchemaError> {
        let full_name = qualify(scope, &definition.name);
        let id = MessageId(self.messages.len());
        self.insert_type(&full_name, TypeRef::Message(id))?;
        self.messages.push(MessageDescriptor {
            id,
            full_name: full_name.clone(),
            fields: Vec::new(),
            by_number: HashMap::new(),
            by_name: HashMap::new(),
            number_order: Vec::new(),
        });
        pending.push(PendingMessage {
            full_name: full_name.clone(),
            definition,
        });

        for enumeration in &definition.enum_type {
            self.register_enum(&full_name, enumeration)?;
        }
        for nested in &definition.nested_type {
            self.register_message(&full_name, nested, pending)?;
        }
        Ok(())
    }

    /// Resolves a type reference as seen from inside `scope`.
    ///
    /// A leading dot means fully qualified. Otherwise the innermost scope is
    /// tried first, then each enclosing scope out to the bare name.
    fn lookup_from(&self, scope: &str, type_name: &str) -> Option<TypeRef> {
        if let Some(absolute) = type_name.strip_prefix('.') {
            return self.types.get(absolute).copied();
        }

        let mut scope = scope;
        loop {
            if let Some(&found) = self.types.get(&qualify(scope, type_name)) {
                return Some(found);
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rsplit_once('.').map_or("", |(parent, _)| parent);
        }
    }

    fn resolve_field(
        &self,
        message: &str,
        definition: &FieldDefinition,
    ) -> Result<FieldDescriptor, SchemaError> {
        let name = &definition.name;

        if definition.number == 0 || definition.number > MAX_FIELD_NUMBER {
            return Err(SchemaError::invalid_field(
                message,
                name,
                format!(
                    "field number {} is outside 1..={}",
                    definition.number, MAX_FIELD_NUMBER
                ),
            ));
        }

        let target = match (definition.kind, definition.type_name.as_deref()) {
            (FieldKind::Message, None) => {
                return Err(SchemaError::invalid_field(
                    message,
                    name,
                    "message field without a type name",
                ))
            }
            (FieldKind::Message, Some(type_name)) => match self.lookup_from(message, type_name) {
                Some(found @ TypeRef::Message(_)) => Some(found),
                Some(TypeRef::Enum(_)) => {
                    return Err(SchemaError::invalid_field(
                        message,
                        name,
                        format!("'{}' is an enum, not a message", type_name),
                    ))
                }
                None => return Err(unresolved(message, name, type_name)),
            },
            (FieldKind::Enum, Some(type_name)) => match self.lookup_from(message, type_name) {
                Some(found @ TypeRef::Enum(_)) => Some(found),
                Some(TypeRef::Message(_)) => {
                    return Err(SchemaError::invalid_field(
                        message,
                        name,
                        format!("'{}' is a message, not an enum", type_name),
                    ))
                }
                None => return Err(unresolved(message, name, type_name)),
            },
            _ => None,
        };

        let packed = definition.packed && definition.kind.is_packable();
        if definition.packed && !(definition.label == Label::Repeated && packed) {
            return Err(SchemaError::invalid_field(
                message,
                name,
                "only repeated numeric fields can be packed",
            ));
        }

        let default_value = match &definition.default_value {
            None => None,
            Some(text) => {
                let enum_type = match target {
                    Some(TypeRef::Enum(id)) => Some(&self.enums[id.0]),
                    _ => None,
                };
                let parsed = if definition.label == Label::Repeated {
                    None
                } else {
                    parse_default(definition.kind, text, enum_type)
                };
                Some(parsed.ok_or_else(|| SchemaError::InvalidDefault {
                    message: message.to_string(),
                    field: name.clone(),
                    value: text.clone(),
                })?)
            }
        };

        Ok(FieldDescriptor {
            name: name.clone(),
            number: definition.number,
            label: definition.label,
            kind: definition.kind,
            type_name: definition.type_name.clone(),
            target,
            default_value,
            packed,
            deprecated: definition.deprecated,
        })
    }

    /// Metadata of the files the registry was built from
    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    /// All message descriptors, in registration order
    pub fn messages(&self) -> &[MessageDescriptor] {
        &self.messages
    }

    /// All enum descriptors, in registration order
    pub fn enums(&self) -> &[EnumDescriptor] {
        &self.enums
    }

    /// Looks up a message handle by fully-qualified name.
    ///
    /// A leading dot is accepted and ignored.
    pub fn message_id(&self, name: &str) -> Option<MessageId> {
        match self.types.get(name.strip_prefix('.').unwrap_or(name)) {
            Some(&TypeRef::Message(id)) => Some(id),
            _ => None,
        }
    }

    /// Looks up a message descriptor by handle
    pub fn message(&self, id: MessageId) -> Option<&MessageDescriptor> {
        self.messages.get(id.0)
    }

    /// Looks up a message descriptor by fully-qualified name
    pub fn message_by_name(&self, name: &str) -> Option<&MessageDescriptor> {
        self.message_id(name).and_then(|id| self.message(id))
    }

    /// Looks up an enum descriptor by handle
    pub fn enumeration(&self, id: EnumId) -> Option<&EnumDescriptor> {
        self.enums.get(id.0)
    }

    /// Looks up an enum descriptor by fully-qualified name
    pub fn enum_by_name(&self, name: &str) -> Option<&EnumDescriptor> {
        match self.types.get(name.strip_prefix('.').unwrap_or(name)) {
            Some(&TypeRef::Enum(id)) => self.enumeration(id),
            _ => None,
        }
    }

    /// Descriptor for a handle this registry issued
    pub(crate) fn message_at(&self, id: MessageId) -> &MessageDescriptor {
        &self.messages[id.0]
    }

    /// Descriptor for a handle this registry issued
    pub(crate) fn enum_at(&self, id: EnumId) -> &EnumDescriptor {
        &self.enums[id.0]
    }
}

impl MessageDescriptor {
    fn install_fields(&mut self, fields: Vec<FieldDescriptor>) -> Result<(), SchemaError> {
        for (index, field) in fields.iter().enumerate() {
            if self.by_number.insert(field.number, index).is_some() {
                return Err(SchemaError::DuplicateFieldNumber {
                    message: self.full_name.clone(),
                    number: field.number,
                });
            }
            if self.by_name.insert(field.name.clone(), index).is_some() {
                return Err(SchemaError::DuplicateFieldName {
                    message: self.full_name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let mut order: Vec<usize> = (0..fields.len()).collect();
        order.sort_by_key(|&i| fields[i].number);
        self.number_order = order;
        self.fields = fields;
        Ok(())
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn unresolved(message: &str, field: &str, type_name: &str) -> SchemaError {
    SchemaError::UnresolvedType {
        message: message.to_string(),
        field: field.to_string(),
        type_name: type_name.to_string(),
    }
}

/// Parses a default written in protobuf text form
fn parse_default(kind: FieldKind, text: &str, enum_type: Option<&EnumDescriptor>) -> Option<Value> {
    match kind {
        FieldKind::Bool => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => {
            text.parse::<i32>().ok().map(|n| Value::Int(n as i64))
        }
        FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => {
            text.parse::<i64>().ok().map(Value::Int)
        }
        FieldKind::UInt32 | FieldKind::Fixed32 => {
            text.parse::<u32>().ok().map(|n| Value::UInt(n as u64))
        }
        FieldKind::UInt64 | FieldKind::Fixed64 => text.parse::<u64>().ok().map(Value::UInt),
        FieldKind::Float | FieldKind::Double => {
            let parsed = match text {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                "nan" => f64::NAN,
                _ => text.parse::<f64>().ok()?,
            };
            if kind == FieldKind::Float {
                return Some(Value::Float(f64::from(parsed as f32)));
            }
            Some(Value::Float(parsed))
        }
        FieldKind::String => Some(Value::Bytes(text.as_bytes().to_vec())),
        FieldKind::Bytes => unescape_bytes(text).map(Value::Bytes),
        FieldKind::Enum => match enum_type {
            Some(descriptor) => descriptor
                .value_of(text)
                .map(|n| Value::Int(n as i64))
                .or_else(|| text.parse::<i32>().ok().map(|n| Value::Int(n as i64))),
            None => text.parse::<i32>().ok().map(|n| Value::Int(n as i64)),
        },
        FieldKind::Message => None,
    }
}

/// Undoes the C-style escaping protoc applies to `bytes` defaults
fn unescape_bytes(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let escape = *bytes.get(i + 1)?;
        i += 2;
        match escape {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'\\' | b'\'' | b'"' | b'?' => out.push(escape),
            b'x' => {
                let digits = bytes[i..]
                    .iter()
                    .take(2)
                    .take_while(|b| b.is_ascii_hexdigit())
                    .count();
                if digits == 0 {
                    return None;
                }
                let hex = std::str::from_utf8(&bytes[i..i + digits]).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += digits;
            }
            b'0'..=b'7' => {
                let start = i - 1;
                let digits = 1 + bytes[i..]
                    .iter()
                    .take(2)
                    .take_while(|b| (b'0'..=b'7').contains(*b))
                    .count();
                let octal = std::str::from_utf8(&bytes[start..start + digits]).ok()?;
                out.push(u8::try_from(u32::from_str_radix(octal, 8).ok()?).ok()?);
                i = start + digits;
            }
            _ => return None,
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree_file() -> FileDefinition {
        // Node refers to itself and to Leaf, which is declared after it
        FileDefinition::new("tree.proto", "demo")
            .message(
                MessageDefinition::new("Node")
                    .field(
                        FieldDefinition::new("children", 1, FieldKind::Message)
                            .repeated()
                            .type_name(".demo.Node"),
                    )
                    .field(FieldDefinition::new("leaf", 2, FieldKind::Message).type_name("Leaf"))
                    .field(FieldDefinition::new("meta", 3, FieldKind::Message).type_name("Meta"))
                    .nested(
                        MessageDefinition::new("Meta").field(
                            FieldDefinition::new("color", 1, FieldKind::Enum)
                                .type_name("Color")
                                .default_value("RED"),
                        ),
                    )
                    .enumeration(EnumDefinition::new("Color").value("RED", 1).value("BLUE", 2)),
            )
            .message(
                MessageDefinition::new("Leaf")
                    .field(
                        FieldDefinition::new("weight", 7, FieldKind::Double).default_value("1.5"),
                    )
                    .field(FieldDefinition::new("label", 1, FieldKind::String)),
            )
    }

    #[test]
    fn test_forward_and_self_references() {
        let registry = Registry::build(&tree_file()).unwrap();

        let node = registry.message_by_name("demo.Node").unwrap();
        let leaf = registry.message_id(".demo.Leaf").unwrap();
        assert_eq!(node.field(1).unwrap().message_type(), Some(node.id()));
        assert_eq!(node.field_by_name("leaf").unwrap().message_type(), Some(leaf));
        assert_eq!(
            node.field(3).unwrap().message_type(),
            registry.message_id("demo.Node.Meta")
        );
    }

    #[test]
    fn test_nested_enum_default() {
        let registry = Registry::build(&tree_file()).unwrap();
        let meta = registry.message_by_name("demo.Node.Meta").unwrap();
        let color = meta.field(1).unwrap();

        assert_eq!(color.default_value(), Some(&Value::Int(1)));
        let enum_id = color.enum_type().unwrap();
        assert_eq!(registry.enumeration(enum_id).unwrap().full_name(), "demo.Node.Color");
    }

    #[test]
    fn test_fields_by_number_order() {
        let registry = Registry::build(&tree_file()).unwrap();
        let leaf = registry.message_by_name("demo.Leaf").unwrap();
        let numbers: Vec<u32> = leaf.fields_by_number().map(|f| f.number()).collect();
        assert_eq!(numbers, vec![1, 7]);
        assert_eq!(leaf.field(7).unwrap().default_value(), Some(&Value::Float(1.5)));
        assert_eq!(leaf.name(), "Leaf");
    }

    #[test]
    fn test_unresolved_reference() {
        let file = FileDefinition::new("bad.proto", "demo").message(
            MessageDefinition::new("A")
                .field(FieldDefinition::new("b", 1, FieldKind::Message).type_name(".demo.B")),
        );
        let err = Registry::build(&file).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnresolvedType {
                message: "demo.A".into(),
                field: "b".into(),
                type_name: ".demo.B".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_message() {
        let file = FileDefinition::new("dup.proto", "demo")
            .message(MessageDefinition::new("A"))
            .message(MessageDefinition::new("A"));
        assert!(matches!(
            Registry::build(&file),
            Err(SchemaError::DuplicateType { name }) if name == "demo.A"
        ));
    }

    #[test]
    fn test_duplicate_field_number() {
        let file = FileDefinition::new("dup.proto", "").message(
            MessageDefinition::new("A")
                .field(FieldDefinition::new("x", 1, FieldKind::Int32))
                .field(FieldDefinition::new("y", 1, FieldKind::Int64)),
        );
        assert_eq!(
            Registry::build(&file).unwrap_err(),
            SchemaError::DuplicateFieldNumber {
                message: "A".into(),
                number: 1
            }
        );
    }

    #[test]
    fn test_duplicate_field_name() {
        let file = FileDefinition::new("dup.proto", "").message(
            MessageDefinition::new("A")
                .field(FieldDefinition::new("x", 1, FieldKind::Int32))
                .field(FieldDefinition::new("x", 2, FieldKind::Int32)),
        );
        assert!(matches!(
            Registry::build(&file),
            Err(SchemaError::DuplicateFieldName { .. })
        ));
    }

    #[test]
    fn test_field_number_range() {
        let file = FileDefinition::new("range.proto", "").message(
            MessageDefinition::new("A")
                .field(FieldDefinition::new("x", MAX_FIELD_NUMBER + 1, FieldKind::Int32)),
        );
        assert!(matches!(
            Registry::build(&file),
            Err(SchemaError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_packed_requires_repeated_numeric() {
        let file = FileDefinition::new("p.proto", "").message(
            MessageDefinition::new("A")
                .field(FieldDefinition::new("s", 1, FieldKind::String).repeated().packed(true)),
        );
        assert!(matches!(
            Registry::build(&file),
            Err(SchemaError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_invalid_default() {
        let file = FileDefinition::new("d.proto", "").message(
            MessageDefinition::new("A")
                .field(FieldDefinition::new("n", 1, FieldKind::UInt32).default_value("-1")),
        );
        assert!(matches!(
            Registry::build(&file),
            Err(SchemaError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_cross_file_references() {
        let common = FileDefinition::new("common.proto", "common").message(
            MessageDefinition::new("Stamp").field(FieldDefinition::new("t", 1, FieldKind::Int64)),
        );
        let app = FileDefinition::new("app.proto", "app")
            .dependency("common.proto")
            .message(
                MessageDefinition::new("Event").field(
                    FieldDefinition::new("at", 1, FieldKind::Message).type_name(".common.Stamp"),
                ),
            );

        let registry = Registry::build_all([&common, &app]).unwrap();
        assert_eq!(registry.files().len(), 2);
        assert_eq!(registry.files()[1].dependency, vec!["common.proto".to_string()]);
        assert!(Registry::build(&app).is_err());
    }

    #[test]
    fn test_enum_field_without_type_name() {
        let file = FileDefinition::new("e.proto", "").message(
            MessageDefinition::new("A")
                .field(FieldDefinition::new("k", 1, FieldKind::Enum).default_value("3")),
        );
        let registry = Registry::build(&file).unwrap();
        let field = registry.message_by_name("A").unwrap().field(1).unwrap();
        assert_eq!(field.enum_type(), None);
        assert_eq!(field.default_value(), Some(&Value::Int(3)));
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(parse_default(FieldKind::Bool, "true", None), Some(Value::Bool(true)));
        assert_eq!(parse_default(FieldKind::SInt32, "-7", None), Some(Value::Int(-7)));
        assert_eq!(parse_default(FieldKind::Int32, "3000000000", None), None);
        assert_eq!(
            parse_default(FieldKind::Double, "-inf", None),
            Some(Value::Float(f64::NEG_INFINITY))
        );
        assert_eq!(parse_default(FieldKind::Message, "x", None), None);
    }

    #[test]
    fn test_float_default_matches_wire_precision() {
        let wire = f64::from(f32::from_bits(0.1f32.to_bits()));
        assert_eq!(parse_default(FieldKind::Float, "0.1", None), Some(Value::Float(wire)));
        assert_eq!(
            parse_default(FieldKind::Double, "0.1", None),
            Some(Value::Float(0.1))
        );
    }

    #[test]
    fn test_unescape_bytes() {
        assert_eq!(unescape_bytes(r"a\nb").unwrap(), b"a\nb".to_vec());
        assert_eq!(unescape_bytes(r"\x41\101\0").unwrap(), b"AA\0".to_vec());
        assert_eq!(unescape_bytes(r#"\\\""#).unwrap(), b"\\\"".to_vec());
        assert_eq!(unescape_bytes(r"\q"), None);
        assert_eq!(unescape_bytes("\\"), None);
    }
}
