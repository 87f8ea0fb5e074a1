//! Wire-level primitives.
//!
//! Each protobuf field is encoded as:
//! - A varint "key" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! Nothing in this module knows about schemas. Decoding functions take a
//! slice and report how many bytes they consumed; encoding functions append
//! to any [`BufMut`].

use crate::error::DecodeError;
use crate::MAX_FIELD_NUMBER;
use bytes::BufMut;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(DecodeError::malformed(
                0,
                format!("unknown wire type: {}", value),
            )),
        }
    }
}

/// Longest possible varint encoding of a 64-bit value
pub const MAX_VARINT_LEN: usize = 10;

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed. Fails with
/// [`DecodeError::Truncated`] if the slice ends before a byte with the high
/// bit clear, and with [`DecodeError::Malformed`] if the tenth byte carries
/// bits beyond the 64th or a continuation bit.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(DecodeError::malformed(i, "varint overflows 64 bits"));
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(DecodeError::truncated(data.len()))
}

/// Encode a varint as little-endian base-128 groups.
///
/// The encoding is canonical: no trailing zero groups are emitted.
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Number of bytes [`encode_varint`] emits for `value`
pub fn varint_len(value: u64) -> usize {
    // ceil(bits / 7), with zero taking one byte
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Zig-zag map a signed 32-bit integer onto an unsigned one
pub fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Inverse of [`zigzag_encode32`]
pub fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Zig-zag map a signed 64-bit integer onto an unsigned one
pub fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode64`]
pub fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Decode a 4-byte little-endian value
pub fn decode_fixed32(data: &[u8]) -> Result<u32, DecodeError> {
    let bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DecodeError::truncated(data.len()))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Decode an 8-byte little-endian value
pub fn decode_fixed64(data: &[u8]) -> Result<u64, DecodeError> {
    let bytes: [u8; 8] = data
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DecodeError::truncated(data.len()))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Decode a varint length followed by exactly that many bytes.
///
/// Returns the payload and the total bytes consumed, prefix included.
pub fn decode_length_delimited(data: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let (length, prefix_len) = decode_varint(data)?;
    let end = usize::try_from(length)
        .ok()
        .and_then(|len| prefix_len.checked_add(len))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| DecodeError::truncated(data.len()))?;
    Ok((&data[prefix_len..end], end))
}

/// Encode a varint length followed by the payload
pub fn encode_length_delimited(payload: &[u8], buf: &mut impl BufMut) {
    encode_varint(payload.len() as u64, buf);
    buf.put_slice(payload);
}

/// Encode a field key
pub fn encode_key(number: u32, wire_type: WireType, buf: &mut impl BufMut) {
    encode_varint(((number as u64) << 3) | wire_type as u64, buf);
}

/// Decode a field key.
///
/// Returns the field number, the wire type and the bytes consumed.
pub fn decode_key(data: &[u8]) -> Result<(u32, WireType, usize), DecodeError> {
    let (key, key_len) = decode_varint(data)?;

    let wire_type = WireType::try_from((key & 0x07) as u8)?;
    let field_number = key >> 3;

    if field_number == 0 || field_number > MAX_FIELD_NUMBER as u64 {
        return Err(DecodeError::malformed(
            0,
            format!("invalid field number {}", field_number),
        ));
    }

    Ok((field_number as u32, wire_type, key_len))
}

/// Consume one value of the given wire type without interpreting it.
///
/// Returns the number of bytes the value occupies. Group wire types are
/// rejected.
pub fn skip_field(wire_type: WireType, data: &[u8]) -> Result<usize, DecodeError> {
    match wire_type {
        WireType::Varint => decode_varint(data).map(|(_, len)| len),
        WireType::I64 => {
            if data.len() < 8 {
                return Err(DecodeError::truncated(data.len()));
            }
            Ok(8)
        }
        WireType::Len => decode_length_delimited(data).map(|(_, len)| len),
        WireType::I32 => {
            if data.len() < 4 {
                return Err(DecodeError::truncated(data.len()));
            }
            Ok(4)
        }
        WireType::StartGroup | WireType::EndGroup => {
            Err(DecodeError::UnsupportedWireType {
                wire_type,
                offset: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint_bytes(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_varint(value, &mut buf);
        buf
    }

    #[test]
    fn test_decode_varint_single_byte() {
        let data = [0x08];
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 8);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_decode_varint_multi_byte() {
        let data = [0xAC, 0x02];
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 300);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_decode_varint_max() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, u64::MAX);
        assert_eq!(len, 10);
    }

    #[test]
    fn test_varint_boundaries() {
        for value in [0, 127, 128, u32::MAX as u64, u64::MAX] {
            let encoded = varint_bytes(value);
            assert_eq!(encoded.len(), varint_len(value));
            assert_eq!(decode_varint(&encoded).unwrap(), (value, encoded.len()));
        }
    }

    #[test]
    fn test_encode_varint_canonical() {
        assert_eq!(varint_bytes(0), vec![0x00]);
        assert_eq!(varint_bytes(127), vec![0x7F]);
        assert_eq!(varint_bytes(128), vec![0x80, 0x01]);
        assert_eq!(varint_bytes(300), vec![0xAC, 0x02]);
    }

    #[test]
    fn test_decode_varint_unterminated() {
        let data = [0x80, 0x80, 0x80];
        assert_eq!(decode_varint(&data), Err(DecodeError::Truncated { offset: 3 }));
        assert!(matches!(decode_varint(&[]), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_decode_varint_overlong() {
        let data = [0xFF; 11];
        assert!(matches!(
            decode_varint(&data),
            Err(DecodeError::Malformed { offset: 9, .. })
        ));
    }

    #[test]
    fn test_decode_varint_overflow() {
        let mut data = [0xFF; 10];
        data[9] = 0x7F;
        assert!(matches!(
            decode_varint(&data),
            Err(DecodeError::Malformed { offset: 9, .. })
        ));

        data[9] = 0x02;
        assert!(decode_varint(&data).is_err());

        data[9] = 0x01;
        assert_eq!(decode_varint(&data).unwrap(), (u64::MAX, 10));
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(-2), 3);
        assert_eq!(zigzag_encode32(i32::MAX), u32::MAX - 1);
        assert_eq!(zigzag_encode32(i32::MIN), u32::MAX);
        assert_eq!(zigzag_encode64(i64::MIN), u64::MAX);

        for n in [0, 1, -1, 63, -64, i32::MAX, i32::MIN] {
            assert_eq!(zigzag_decode32(zigzag_encode32(n)), n);
        }
        for n in [0, 1, -1, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode64(zigzag_encode64(n)), n);
        }
    }

    #[test]
    fn test_fixed_width() {
        let mut buf = Vec::new();
        buf.put_u32_le(0xDEADBEEF);
        buf.put_u64_le(42);
        assert_eq!(decode_fixed32(&buf).unwrap(), 0xDEADBEEF);
        assert_eq!(decode_fixed64(&buf[4..]).unwrap(), 42);
        assert_eq!(decode_fixed32(&buf[..3]), Err(DecodeError::Truncated { offset: 3 }));
        assert!(decode_fixed64(&buf[4..11]).is_err());
    }

    #[test]
    fn test_length_delimited() {
        let mut buf = Vec::new();
        encode_length_delimited(b"hello", &mut buf);
        assert_eq!(buf[0], 5);

        let (payload, consumed) = decode_length_delimited(&buf).unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(consumed, 6);

        assert!(matches!(
            decode_length_delimited(&buf[..4]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_wire_type_conversion() {
        assert_eq!(WireType::try_from(0).unwrap(), WireType::Varint);
        assert_eq!(WireType::try_from(1).unwrap(), WireType::I64);
        assert_eq!(WireType::try_from(2).unwrap(), WireType::Len);
        assert_eq!(WireType::try_from(5).unwrap(), WireType::I32);
        assert!(WireType::try_from(6).is_err());
    }

    #[test]
    fn test_key_roundtrip() {
        let mut buf = Vec::new();
        encode_key(1, WireType::Len, &mut buf);
        assert_eq!(buf, vec![0x0A]);
        assert_eq!(decode_key(&buf).unwrap(), (1, WireType::Len, 1));
    }

    #[test]
    fn test_invalid_field_number() {
        // Field 0 is invalid
        let data = [0x00, 0x01];
        assert!(matches!(decode_key(&data), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_skip_field() {
        assert_eq!(skip_field(WireType::Varint, &[0x96, 0x01, 0xFF]).unwrap(), 2);
        assert_eq!(skip_field(WireType::I64, &[0; 9]).unwrap(), 8);
        assert_eq!(skip_field(WireType::I32, &[0; 4]).unwrap(), 4);
        assert_eq!(skip_field(WireType::Len, &[0x02, b'h', b'i', 0x08]).unwrap(), 3);
        assert!(skip_field(WireType::I32, &[0; 3]).is_err());
        assert!(matches!(
            skip_field(WireType::StartGroup, &[]),
            Err(DecodeError::UnsupportedWireType { .. })
        ));
    }
}
