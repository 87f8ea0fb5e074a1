//! The decoded, descriptor-independent representation of a message.
//!
//! A [`Value`] owns all of its data: decoding copies byte strings out of the
//! source buffer, so a value tree outlives both the buffer and the registry
//! it was decoded against.

use std::collections::BTreeMap;
use std::fmt;

/// A message: field name to value, ordered by name
pub type Message = BTreeMap<String, Value>;

/// A dynamically typed protobuf value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value; skipped on encode
    #[default]
    Absent,
    /// BOOL
    Bool(bool),
    /// INT32, INT64, SINT32, SINT64, SFIXED32, SFIXED64 and ENUM
    Int(i64),
    /// UINT32, UINT64, FIXED32 and FIXED64
    UInt(u64),
    /// FLOAT and DOUBLE
    Float(f64),
    /// STRING and BYTES
    Bytes(Vec<u8>),
    /// Every REPEATED field, packed or not
    List(Vec<Value>),
    /// Embedded MESSAGE
    Message(Message),
}

impl Value {
    /// Builds a message value from `(name, value)` pairs
    pub fn message<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Message(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the variant, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Bool(_) => "bool",
            Value::Int(_) => "signed integer",
            Value::UInt(_) => "unsigned integer",
            Value::Float(_) => "float",
            Value::Bytes(_) => "byte string",
            Value::List(_) => "sequence",
            Value::Message(_) => "message",
        }
    }

    /// Returns true for [`Value::Absent`]
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Returns the boolean, if this is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a signed integer if it is an integer that fits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Returns the value as an unsigned integer if it is an integer that fits
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(n) => Some(*n),
            Value::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Returns the float, if this is one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the byte string, if this is one
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the byte string as UTF-8, if it is one and valid
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Returns the elements, if this is a sequence
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the fields, if this is a message
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a field of a message value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_message().and_then(|fields| fields.get(field))
    }

    /// Follows a dotted path through messages and sequences.
    ///
    /// Numeric segments index into sequences: `"items.0.name"`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |current, segment| match current {
            Value::Message(fields) => fields.get(segment),
            Value::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::UInt(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Message(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool as bool,
    i32 => Int as i64,
    i64 => Int as i64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
    Vec<u8> => Bytes as Vec<u8>,
    Vec<Value> => List as Vec<Value>,
    Message => Message as Message,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(v.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_accessors() {
        assert_eq!(Value::Int(-1).as_i64(), Some(-1));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::UInt(7).as_i64(), Some(7));
        assert_eq!(Value::Float(1.0).as_i64(), None);
    }

    #[test]
    fn test_get_path() {
        let record = Value::message([
            ("name", Value::from("hi")),
            (
                "items",
                Value::List(vec![
                    Value::message([("id", Value::from(1u32))]),
                    Value::message([("id", Value::from(2u32))]),
                ]),
            ),
        ]);

        assert_eq!(record.get_path("name").and_then(Value::as_str), Some("hi"));
        assert_eq!(record.get_path("items.1.id"), Some(&Value::UInt(2)));
        assert_eq!(record.get_path("items.2.id"), None);
        assert_eq!(record.get_path("name.x"), None);
    }

    #[test]
    fn test_display() {
        let record = Value::message([
            ("a", Value::from(true)),
            ("b", Value::List(vec![Value::from(1), Value::from(2)])),
        ]);
        assert_eq!(record.to_string(), "{a: true, b: [1, 2]}");
        assert_eq!(Value::Absent.to_string(), "");
    }
}
