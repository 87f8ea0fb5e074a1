//! Descriptor-driven decoding of wire-format bytes.

use super::visitor::{DecodeVisitor, ValueBuilder};
use super::wire::{
    decode_fixed32, decode_fixed64, decode_key, decode_length_delimited, decode_varint,
    skip_field, zigzag_decode32, zigzag_decode64, WireType,
};
use super::CodecOptions;
use crate::error::DecodeError;
use crate::schema::{FieldDescriptor, FieldKind, MessageDescriptor, MessageId, Registry};
use crate::value::Value;

/// Walks wire-format bytes against the descriptors of a [`Registry`].
///
/// Fields whose number the descriptor does not declare are skipped. A
/// length-delimited payload is accepted for any REPEATED numeric field,
/// whatever its `packed` flag says.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'r> {
    registry: &'r Registry,
    options: CodecOptions,
}

impl<'r> Decoder<'r> {
    /// Creates a decoder with default options
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_options(registry, CodecOptions::default())
    }

    /// Creates a decoder with custom options
    pub fn with_options(registry: &'r Registry, options: CodecOptions) -> Self {
        Self { registry, options }
    }

    /// Decodes `bytes` as message `message` into a value tree.
    ///
    /// Decoding is all-or-nothing: on error no partial tree is returned.
    pub fn decode(&self, bytes: &[u8], message: MessageId) -> Result<Value, DecodeError> {
        let mut builder = ValueBuilder::new();
        self.walk(bytes, message, &mut builder)?;
        builder
            .finish()
            .ok_or_else(|| DecodeError::malformed(bytes.len(), "message did not complete"))
    }

    /// Feeds the events of decoding `bytes` as message `message` to `visitor`.
    ///
    /// Events already delivered before an error are not retracted.
    pub fn walk<V: DecodeVisitor + ?Sized>(
        &self,
        bytes: &[u8],
        message: MessageId,
        visitor: &mut V,
    ) -> Result<(), DecodeError> {
        let descriptor = self.registry.message_at(message);
        visitor.on_message_start(descriptor, None);
        self.walk_message(bytes, descriptor, visitor, 1)?;
        visitor.on_message_end(descriptor, None);
        Ok(())
    }

    fn walk_message<V: DecodeVisitor + ?Sized>(
        &self,
        data: &[u8],
        message: &MessageDescriptor,
        visitor: &mut V,
        depth: usize,
    ) -> Result<(), DecodeError> {
        let mut pos = 0;

        while pos < data.len() {
            let (number, wire_type, key_len) =
                decode_key(&data[pos..]).map_err(|e| e.offset_by(pos))?;

            if matches!(wire_type, WireType::StartGroup | WireType::EndGroup) {
                return Err(DecodeError::UnsupportedWireType {
                    wire_type,
                    offset: pos,
                });
            }

            let value_start = pos + key_len;
            let rest = &data[value_start..];

            let consumed = match message.field(number) {
                Some(field) => self.read_field(field, wire_type, rest, visitor, depth),
                None => skip_field(wire_type, rest),
            }
            .map_err(|e| e.offset_by(value_start))?;

            pos = value_start + consumed;
        }

        Ok(())
    }

    /// Reads one occurrence of `field`, returning the bytes consumed
    fn read_field<V: DecodeVisitor + ?Sized>(
        &self,
        field: &FieldDescriptor,
        wire_type: WireType,
        data: &[u8],
        visitor: &mut V,
        depth: usize,
    ) -> Result<usize, DecodeError> {
        let kind = field.kind();

        match (wire_type, kind) {
            (WireType::Len, FieldKind::Message) => {
                let (payload, consumed) = decode_length_delimited(data)?;
                if depth >= self.options.max_depth {
                    return Err(DecodeError::RecursionLimit {
                        limit: self.options.max_depth,
                    });
                }
                let Some(id) = field.message_type() else {
                    return Err(DecodeError::malformed(0, "message field without a type"));
                };

                let nested = self.registry.message_at(id);
                visitor.on_message_start(nested, Some(field));
                self.walk_message(payload, nested, visitor, depth + 1)
                    .map_err(|e| e.offset_by(consumed - payload.len()))?;
                visitor.on_message_end(nested, Some(field));
                Ok(consumed)
            }

            (WireType::Len, FieldKind::String | FieldKind::Bytes) => {
                let (payload, consumed) = decode_length_delimited(data)?;
                visitor.on_field(field, Value::Bytes(payload.to_vec()));
                Ok(consumed)
            }

            (WireType::Len, _) if field.is_repeated() && kind.is_packable() => {
                let (payload, consumed) = decode_length_delimited(data)?;
                let base = consumed - payload.len();
                let mut pos = 0;
                while pos < payload.len() {
                    let (value, len) =
                        read_scalar(kind, &payload[pos..]).map_err(|e| e.offset_by(base + pos))?;
                    visitor.on_field(field, value);
                    pos += len;
                }
                Ok(consumed)
            }

            (_, _) if kind.is_packable() && wire_type == kind.wire_type() => {
                let (value, len) = read_scalar(kind, data)?;
                visitor.on_field(field, value);
                Ok(len)
            }

            _ => Err(DecodeError::WireTypeMismatch {
                field: field.name().to_string(),
                kind,
                wire_type,
            }),
        }
    }
}

/// Reads one numeric value of `kind`, returning it with its encoded length
fn read_scalar(kind: FieldKind, data: &[u8]) -> Result<(Value, usize), DecodeError> {
    let decoded = match kind.wire_type() {
        WireType::Varint => {
            let (raw, len) = decode_varint(data)?;
            let value = match kind {
                FieldKind::Bool => Value::Bool(raw != 0),
                FieldKind::Int32 | FieldKind::Enum => Value::Int(i64::from(raw as i32)),
                FieldKind::Int64 => Value::Int(raw as i64),
                FieldKind::UInt32 => Value::UInt(u64::from(raw as u32)),
                FieldKind::SInt32 => Value::Int(i64::from(zigzag_decode32(raw as u32))),
                FieldKind::SInt64 => Value::Int(zigzag_decode64(raw)),
                _ => Value::UInt(raw),
            };
            return Ok((value, len));
        }
        WireType::I32 => {
            let raw = decode_fixed32(data)?;
            let value = match kind {
                FieldKind::Float => Value::Float(f64::from(f32::from_bits(raw))),
                FieldKind::SFixed32 => Value::Int(i64::from(raw as i32)),
                _ => Value::UInt(u64::from(raw)),
            };
            (value, 4)
        }
        WireType::I64 => {
            let raw = decode_fixed64(data)?;
            let value = match kind {
                FieldKind::Double => Value::Float(f64::from_bits(raw)),
                FieldKind::SFixed64 => Value::Int(raw as i64),
                _ => Value::UInt(raw),
            };
            (value, 8)
        }
        other => {
            return Err(DecodeError::malformed(
                0,
                format!("{} is not a numeric kind ({other:?})", kind.as_str()),
            ))
        }
    };
    Ok(decoded)
}
