//! Descriptor-driven encoding of value trees.

use bytes::BufMut;

use super::wire::{
    encode_key, encode_length_delimited, encode_varint, zigzag_encode32, zigzag_encode64,
    WireType,
};
use super::CodecOptions;
use crate::error::EncodeError;
use crate::schema::{FieldDescriptor, FieldKind, MessageDescriptor, MessageId, Registry};
use crate::value::{Message, Value};

/// Serializes value trees against the descriptors of a [`Registry`].
///
/// Fields are emitted in ascending field-number order. Absent values are
/// skipped and names the descriptor does not declare are rejected.
#[derive(Debug, Clone, Copy)]
pub struct Encoder<'r> {
    registry: &'r Registry,
    options: CodecOptions,
}

impl<'r> Encoder<'r> {
    /// Creates an encoder with default options
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_options(registry, CodecOptions::default())
    }

    /// Creates an encoder with custom options
    pub fn with_options(registry: &'r Registry, options: CodecOptions) -> Self {
        Self { registry, options }
    }

    /// Encodes `value`, which must be a message, as message `message`
    pub fn encode(&self, value: &Value, message: MessageId) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(value, message, &mut buf)?;
        Ok(buf)
    }

    /// Appends the encoding of `value` to `buf`.
    ///
    /// On error `buf` is left as it was.
    pub fn encode_into(
        &self,
        value: &Value,
        message: MessageId,
        buf: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        let Value::Message(fields) = value else {
            return Err(EncodeError::NotAMessage {
                found: value.kind_name(),
            });
        };
        let start = buf.len();
        let result = self.encode_message(fields, self.registry.message_at(message), buf, 1);
        if result.is_err() {
            buf.truncate(start);
        }
        result
    }

    fn encode_message(
        &self,
        fields: &Message,
        message: &MessageDescriptor,
        buf: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), EncodeError> {
        if let Some(name) = fields.keys().find(|name| message.field_by_name(name).is_none()) {
            return Err(EncodeError::UnknownField {
                message: message.full_name().to_string(),
                field: name.clone(),
            });
        }

        for field in message.fields_by_number() {
            let value = match fields.get(field.name()) {
                None | Some(Value::Absent) => continue,
                Some(value) => value,
            };

            if !field.is_repeated() {
                self.encode_single(field, value, buf, depth)?;
                continue;
            }

            let Value::List(items) = value else {
                return Err(EncodeError::kind_mismatch(
                    field.name(),
                    "sequence",
                    value.kind_name(),
                ));
            };

            if field.is_packed() {
                if items.is_empty() {
                    continue;
                }
                let mut payload = Vec::new();
                for item in items {
                    encode_scalar(field, item, self.registry, &mut payload)?;
                }
                encode_key(field.number(), WireType::Len, buf);
                encode_length_delimited(&payload, buf);
            } else {
                for item in items.iter().filter(|item| !item.is_absent()) {
                    self.encode_single(field, item, buf, depth)?;
                }
            }
        }

        Ok(())
    }

    /// Writes one keyed occurrence of `field`
    fn encode_single(
        &self,
        field: &FieldDescriptor,
        value: &Value,
        buf: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), EncodeError> {
        match field.kind() {
            FieldKind::Message => {
                let Value::Message(fields) = value else {
                    return Err(mismatch(field, value));
                };
                if depth >= self.options.max_depth {
                    return Err(EncodeError::RecursionLimit {
                        limit: self.options.max_depth,
                    });
                }
                let Some(id) = field.message_type() else {
                    return Err(mismatch(field, value));
                };

                let mut payload = Vec::new();
                self.encode_message(fields, self.registry.message_at(id), &mut payload, depth + 1)?;
                encode_key(field.number(), WireType::Len, buf);
                encode_length_delimited(&payload, buf);
            }
            FieldKind::String | FieldKind::Bytes => {
                let Value::Bytes(bytes) = value else {
                    return Err(mismatch(field, value));
                };
                encode_key(field.number(), WireType::Len, buf);
                encode_length_delimited(bytes, buf);
            }
            kind => {
                encode_key(field.number(), kind.wire_type(), buf);
                encode_scalar(field, value, self.registry, buf)?;
            }
        }
        Ok(())
    }
}

/// Writes the unkeyed encoding of a numeric value
fn encode_scalar(
    field: &FieldDescriptor,
    value: &Value,
    registry: &Registry,
    buf: &mut impl BufMut,
) -> Result<(), EncodeError> {
    match field.kind() {
        FieldKind::Bool => match value {
            Value::Bool(b) => encode_varint(u64::from(*b), buf),
            _ => return Err(mismatch(field, value)),
        },
        FieldKind::Int32 => {
            let n = signed(field, value, i32::MIN.into(), i32::MAX.into())?;
            encode_varint(n as u64, buf);
        }
        FieldKind::Int64 => encode_varint(signed(field, value, i64::MIN, i64::MAX)? as u64, buf),
        FieldKind::UInt32 => encode_varint(unsigned(field, value, u32::MAX.into())?, buf),
        FieldKind::UInt64 => encode_varint(unsigned(field, value, u64::MAX)?, buf),
        FieldKind::SInt32 => {
            let n = signed(field, value, i32::MIN.into(), i32::MAX.into())? as i32;
            encode_varint(u64::from(zigzag_encode32(n)), buf);
        }
        FieldKind::SInt64 => {
            let n = signed(field, value, i64::MIN, i64::MAX)?;
            encode_varint(zigzag_encode64(n), buf);
        }
        FieldKind::Enum => {
            let n = enum_number(field, value, registry)?;
            encode_varint(i64::from(n) as u64, buf);
        }
        FieldKind::Fixed32 => buf.put_u32_le(unsigned(field, value, u32::MAX.into())? as u32),
        FieldKind::SFixed32 => {
            buf.put_i32_le(signed(field, value, i32::MIN.into(), i32::MAX.into())? as i32)
        }
        FieldKind::Fixed64 => buf.put_u64_le(unsigned(field, value, u64::MAX)?),
        FieldKind::SFixed64 => buf.put_i64_le(signed(field, value, i64::MIN, i64::MAX)?),
        FieldKind::Float => match value {
            Value::Float(x) => buf.put_f32_le(*x as f32),
            _ => return Err(mismatch(field, value)),
        },
        FieldKind::Double => match value {
            Value::Float(x) => buf.put_f64_le(*x),
            _ => return Err(mismatch(field, value)),
        },
        FieldKind::String | FieldKind::Bytes | FieldKind::Message => {
            return Err(mismatch(field, value))
        }
    }
    Ok(())
}

fn mismatch(field: &FieldDescriptor, value: &Value) -> EncodeError {
    EncodeError::kind_mismatch(field.name(), field.kind().as_str(), value.kind_name())
}

fn out_of_range(field: &FieldDescriptor, value: &Value) -> EncodeError {
    EncodeError::OutOfRange {
        field: field.name().to_string(),
        kind: field.kind(),
        value: value.to_string(),
    }
}

fn signed(field: &FieldDescriptor, value: &Value, min: i64, max: i64) -> Result<i64, EncodeError> {
    match value {
        Value::Int(_) | Value::UInt(_) => value
            .as_i64()
            .filter(|n| (min..=max).contains(n))
            .ok_or_else(|| out_of_range(field, value)),
        _ => Err(mismatch(field, value)),
    }
}

fn unsigned(field: &FieldDescriptor, value: &Value, max: u64) -> Result<u64, EncodeError> {
    match value {
        Value::Int(_) | Value::UInt(_) => value
            .as_u64()
            .filter(|&n| n <= max)
            .ok_or_else(|| out_of_range(field, value)),
        _ => Err(mismatch(field, value)),
    }
}

/// Resolves an enum value given as a number or a symbol
fn enum_number(
    field: &FieldDescriptor,
    value: &Value,
    registry: &Registry,
) -> Result<i32, EncodeError> {
    if let Value::Bytes(_) = value {
        let enumeration = field.enum_type().map(|id| registry.enum_at(id));
        let Some(enumeration) = enumeration else {
            return Err(mismatch(field, value));
        };
        let symbol = value.as_str().unwrap_or_default();
        return enumeration
            .value_of(symbol)
            .ok_or_else(|| EncodeError::UnknownEnumSymbol {
                field: field.name().to_string(),
                enum_name: enumeration.full_name().to_string(),
                symbol: String::from_utf8_lossy(value.as_bytes().unwrap_or_default()).into_owned(),
            });
    }
    signed(field, value, i32::MIN.into(), i32::MAX.into()).map(|n| n as i32)
}
