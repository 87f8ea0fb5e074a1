//! Decode event listeners.
//!
//! This module provides the [`DecodeVisitor`] trait through which the
//! [`Decoder`](super::Decoder) reports what it finds on the wire.

use crate::schema::{FieldDescriptor, Label, MessageDescriptor};
use crate::value::{Message, Value};

/// Receives decode events in wire order.
///
/// Every method has an empty default, so a visitor only implements what it
/// needs. Events for an embedded message are bracketed by
/// [`on_message_start`](Self::on_message_start) and
/// [`on_message_end`](Self::on_message_end) carrying the enclosing field;
/// the outermost message carries `None`. Each element of a repeated field,
/// packed or not, arrives as its own [`on_field`](Self::on_field) call.
///
/// # Example
///
/// ```
/// use pbstream_core::codec::DecodeVisitor;
/// use pbstream_core::schema::FieldDescriptor;
/// use pbstream_core::Value;
///
/// #[derive(Default)]
/// struct FieldNames(Vec<String>);
///
/// impl DecodeVisitor for FieldNames {
///     fn on_field(&mut self, field: &FieldDescriptor, _value: Value) {
///         self.0.push(field.name().to_string());
///     }
/// }
/// ```
pub trait DecodeVisitor {
    /// A message begins
    fn on_message_start(&mut self, message: &MessageDescriptor, field: Option<&FieldDescriptor>) {
        let _ = (message, field);
    }

    /// A scalar, string or bytes value was read
    fn on_field(&mut self, field: &FieldDescriptor, value: Value) {
        let _ = (field, value);
    }

    /// A message ended with its input fully consumed
    fn on_message_end(&mut self, message: &MessageDescriptor, field: Option<&FieldDescriptor>) {
        let _ = (message, field);
    }
}

/// A visitor that discards all events, for validation-only walks
pub struct NullVisitor;

impl DecodeVisitor for NullVisitor {}

/// A visitor that collects statistics about the decoded data
#[derive(Debug, Default)]
pub struct StatsVisitor {
    /// Number of messages, the outermost included
    pub message_count: usize,
    /// Number of scalar, string and bytes values
    pub field_count: usize,
    /// Total bytes in string and bytes values
    pub byte_count: usize,
    /// Deepest message nesting seen, the outermost being 1
    pub max_depth: usize,
    depth: usize,
}

impl DecodeVisitor for StatsVisitor {
    fn on_message_start(&mut self, _message: &MessageDescriptor, _field: Option<&FieldDescriptor>) {
        self.message_count += 1;
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn on_field(&mut self, _field: &FieldDescriptor, value: Value) {
        self.field_count += 1;
        if let Value::Bytes(bytes) = value {
            self.byte_count += bytes.len();
        }
    }

    fn on_message_end(&mut self, _message: &MessageDescriptor, _field: Option<&FieldDescriptor>) {
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Builds a [`Value`] tree from decode events.
///
/// REPEATED fields accumulate into sequences in wire order; any other field
/// keeps its last occurrence. When a message ends, absent REPEATED fields
/// become empty sequences, absent fields with a default receive it and
/// absent REQUIRED fields are recorded as [`Value::Absent`].
#[derive(Debug, Default)]
pub struct ValueBuilder {
    stack: Vec<Message>,
    root: Option<Message>,
}

impl ValueBuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the completed outermost message, if one ended
    pub fn finish(self) -> Option<Value> {
        self.root.map(Value::Message)
    }
}

impl DecodeVisitor for ValueBuilder {
    fn on_message_start(&mut self, _message: &MessageDescriptor, _field: Option<&FieldDescriptor>) {
        self.stack.push(Message::new());
    }

    fn on_field(&mut self, field: &FieldDescriptor, value: Value) {
        if let Some(top) = self.stack.last_mut() {
            store(top, field, value);
        }
    }

    fn on_message_end(&mut self, message: &MessageDescriptor, field: Option<&FieldDescriptor>) {
        let Some(mut fields) = self.stack.pop() else {
            return;
        };
        fill_defaults(&mut fields, message);

        match (field, self.stack.last_mut()) {
            (Some(field), Some(parent)) => store(parent, field, Value::Message(fields)),
            _ => self.root = Some(fields),
        }
    }
}

fn store(fields: &mut Message, field: &FieldDescriptor, value: Value) {
    if !field.is_repeated() {
        fields.insert(field.name().to_string(), value);
        return;
    }

    match fields.get_mut(field.name()) {
        Some(Value::List(items)) => items.push(value),
        _ => {
            fields.insert(field.name().to_string(), Value::List(vec![value]));
        }
    }
}

fn fill_defaults(fields: &mut Message, message: &MessageDescriptor) {
    for field in message.fields() {
        if fields.contains_key(field.name()) {
            continue;
        }
        if field.is_repeated() {
            fields.insert(field.name().to_string(), Value::List(Vec::new()));
        } else if let Some(default) = field.default_value() {
            fields.insert(field.name().to_string(), default.clone());
        } else if field.label() == Label::Required {
            fields.insert(field.name().to_string(), Value::Absent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldKind, FileDefinition, MessageDefinition, Registry};
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        let file = FileDefinition::new("v.proto", "v").message(
            MessageDefinition::new("M")
                .field(FieldDefinition::new("tags", 1, FieldKind::String).repeated())
                .field(FieldDefinition::new("id", 2, FieldKind::Int32).required())
                .field(FieldDefinition::new("ratio", 3, FieldKind::Float).default_value("0.5"))
                .field(FieldDefinition::new("last", 4, FieldKind::UInt32)),
        );
        Registry::build(&file).unwrap()
    }

    #[test]
    fn test_null_visitor() {
        let registry = registry();
        let message = registry.message_by_name("v.M").unwrap();
        let mut visitor = NullVisitor;
        visitor.on_message_start(message, None);
        visitor.on_field(&message.fields()[0], Value::from("x"));
        visitor.on_message_end(message, None);
    }

    #[test]
    fn test_stats_visitor() {
        let registry = registry();
        let message = registry.message_by_name("v.M").unwrap();
        let mut stats = StatsVisitor::default();
        stats.on_message_start(message, None);
        stats.on_field(&message.fields()[0], Value::from("abc"));
        stats.on_field(&message.fields()[1], Value::Int(5));
        stats.on_message_end(message, None);

        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.field_count, 2);
        assert_eq!(stats.byte_count, 3);
        assert_eq!(stats.max_depth, 1);
    }

    #[test]
    fn test_builder_policies() {
        let registry = registry();
        let message = registry.message_by_name("v.M").unwrap();
        let tags = message.field(1).unwrap();
        let last = message.field(4).unwrap();

        let mut builder = ValueBuilder::new();
        builder.on_message_start(message, None);
        builder.on_field(tags, Value::from("a"));
        builder.on_field(last, Value::UInt(1));
        builder.on_field(tags, Value::from("b"));
        builder.on_field(last, Value::UInt(2));
        builder.on_message_end(message, None);

        let expected = Value::message([
            ("tags", Value::List(vec![Value::from("a"), Value::from("b")])),
            ("id", Value::Absent),
            ("ratio", Value::Float(0.5)),
            ("last", Value::UInt(2)),
        ]);
        assert_eq!(builder.finish(), Some(expected));
    }

    #[test]
    fn test_missing_repeated_is_empty() {
        let registry = registry();
        let message = registry.message_by_name("v.M").unwrap();
        let mut builder = ValueBuilder::new();
        builder.on_message_start(message, None);
        builder.on_message_end(message, None);

        let value = builder.finish().unwrap();
        assert_eq!(value.get("tags"), Some(&Value::List(vec![])));
        assert_eq!(value.get("last"), None);
    }

    #[test]
    fn test_unfinished_builder() {
        let registry = registry();
        let message = registry.message_by_name("v.M").unwrap();
        let mut builder = ValueBuilder::new();
        builder.on_message_start(message, None);
        assert_eq!(builder.finish(), None);
    }
}
