//! Encoding and decoding for the subset of the AMQP 1.0 type system that the
//! feedback receiver exchanges on the wire.
//!
//! Values decode into a [`Value`] tree; performatives are described lists and
//! are rebuilt from the tree by the [`crate::performative`] module. Encoding
//! writes directly into a `BytesMut`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// AMQP 1.0 format codes
pub mod format_code {
    pub const DESCRIBED: u8 = 0x00;
    pub const NULL: u8 = 0x40;
    pub const BOOLEAN_TRUE: u8 = 0x41;
    pub const BOOLEAN_FALSE: u8 = 0x42;
    pub const UINT_0: u8 = 0x43;
    pub const ULONG_0: u8 = 0x44;
    pub const LIST_0: u8 = 0x45;
    pub const UBYTE: u8 = 0x50;
    pub const SMALL_UINT: u8 = 0x52;
    pub const SMALL_ULONG: u8 = 0x53;
    pub const BOOLEAN: u8 = 0x56;
    pub const USHORT: u8 = 0x60;
    pub const UINT: u8 = 0x70;
    pub const ULONG: u8 = 0x80;
    pub const VBIN_8: u8 = 0xa0;
    pub const STR_8: u8 = 0xa1;
    pub const SYM_8: u8 = 0xa3;
    pub const VBIN_32: u8 = 0xb0;
    pub const STR_32: u8 = 0xb1;
    pub const SYM_32: u8 = 0xb3;
    pub const LIST_8: u8 = 0xc0;
    pub const MAP_8: u8 = 0xc1;
    pub const LIST_32: u8 = 0xd0;
    pub const MAP_32: u8 = 0xd1;
    pub const ARRAY_8: u8 = 0xe0;
    pub const ARRAY_32: u8 = 0xf0;
}

use format_code::*;

/// A decoded AMQP value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// null
    Null,

    /// boolean
    Bool(bool),

    /// ubyte
    Ubyte(u8),

    /// ushort
    Ushort(u16),

    /// uint in any of its three encodings
    Uint(u32),

    /// ulong in any of its three encodings
    Ulong(u64),

    /// str8 / str32
    String(String),

    /// sym8 / sym32
    Symbol(String),

    /// vbin8 / vbin32
    Binary(Bytes),

    /// list0 / list8 / list32
    List(Vec<Value>),

    /// map8 / map32, insertion order preserved
    Map(Vec<(Value, Value)>),

    /// array8 / array32; the element constructor is not retained
    Array(Vec<Value>),

    /// described type (0x00 descriptor value)
    Described(Box<Described>),

    /// A value of a format code this crate does not interpret, retained
    /// opaquely so that surrounding containers stay parseable
    Opaque(u8, Bytes),
}

/// A described value
#[derive(Debug, Clone, PartialEq)]
pub struct Described {
    /// Descriptor, numeric or symbolic
    pub descriptor: Descriptor,

    /// The described value
    pub value: Value,
}

impl Described {
    /// Creates a described value with a numeric descriptor
    pub fn new(code: u64, value: Value) -> Self {
        Self {
            descriptor: Descriptor::Code(code),
            value,
        }
    }
}

/// Descriptor of a described type. Peers normally send the numeric form but
/// the symbolic form is equally legal.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// ulong descriptor code
    Code(u64),

    /// symbolic descriptor name, e.g. `amqp:open:list`
    Name(String),
}

/// Errors from decoding a value
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Ran out of bytes mid-value
    #[error("unexpected end of encoded value")]
    Incomplete,

    /// Unknown or unsupported format code
    #[error("invalid format code 0x{0:02x}")]
    InvalidFormatCode(u8),

    /// String or symbol is not valid UTF-8
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// Structurally invalid encoding
    #[error("malformed encoding: {0}")]
    Malformed(&'static str),
}

/// Errors from encoding a value
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The value has no encoding in this subset
    #[error("{0} cannot be encoded")]
    Unsupported(&'static str),
}

fn need(src: &Bytes, n: usize) -> Result<(), DecodeError> {
    if src.remaining() < n {
        Err(DecodeError::Incomplete)
    } else {
        Ok(())
    }
}

fn take_u8(src: &mut Bytes) -> Result<u8, DecodeError> {
    need(src, 1)?;
    Ok(src.get_u8())
}

fn take_bytes(src: &mut Bytes, n: usize) -> Result<Bytes, DecodeError> {
    need(src, n)?;
    Ok(src.split_to(n))
}

fn take_string(src: &mut Bytes, n: usize) -> Result<String, DecodeError> {
    let raw = take_bytes(src, n)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

/// Decodes a single value, consuming its bytes from `src`
pub fn decode_value(src: &mut Bytes) -> Result<Value, DecodeError> {
    let code = take_u8(src)?;
    decode_with_code(code, src)
}

fn decode_with_code(code: u8, src: &mut Bytes) -> Result<Value, DecodeError> {
    let value = match code {
        DESCRIBED => {
            let descriptor = match decode_value(src)? {
                Value::Ulong(code) => Descriptor::Code(code),
                Value::Symbol(name) => Descriptor::Name(name),
                _ => return Err(DecodeError::Malformed("descriptor must be ulong or symbol")),
            };
            let value = decode_value(src)?;
            Value::Described(Box::new(Described { descriptor, value }))
        }
        NULL => Value::Null,
        BOOLEAN_TRUE => Value::Bool(true),
        BOOLEAN_FALSE => Value::Bool(false),
        BOOLEAN => Value::Bool(take_u8(src)? != 0),
        UBYTE => Value::Ubyte(take_u8(src)?),
        USHORT => {
            need(src, 2)?;
            Value::Ushort(src.get_u16())
        }
        UINT_0 => Value::Uint(0),
        SMALL_UINT => Value::Uint(take_u8(src)? as u32),
        UINT => {
            need(src, 4)?;
            Value::Uint(src.get_u32())
        }
        ULONG_0 => Value::Ulong(0),
        SMALL_ULONG => Value::Ulong(take_u8(src)? as u64),
        ULONG => {
            need(src, 8)?;
            Value::Ulong(src.get_u64())
        }
        VBIN_8 => {
            let len = take_u8(src)? as usize;
            Value::Binary(take_bytes(src, len)?)
        }
        VBIN_32 => {
            need(src, 4)?;
            let len = src.get_u32() as usize;
            Value::Binary(take_bytes(src, len)?)
        }
        STR_8 => {
            let len = take_u8(src)? as usize;
            Value::String(take_string(src, len)?)
        }
        STR_32 => {
            need(src, 4)?;
            let len = src.get_u32() as usize;
            Value::String(take_string(src, len)?)
        }
        SYM_8 => {
            let len = take_u8(src)? as usize;
            Value::Symbol(take_string(src, len)?)
        }
        SYM_32 => {
            need(src, 4)?;
            let len = src.get_u32() as usize;
            Value::Symbol(take_string(src, len)?)
        }
        LIST_0 => Value::List(Vec::new()),
        LIST_8 => {
            let size = take_u8(src)? as usize;
            let mut data = take_bytes(src, size)?;
            let count = take_u8(&mut data)? as usize;
            Value::List(decode_items(&mut data, count)?)
        }
        LIST_32 => {
            need(src, 4)?;
            let size = src.get_u32() as usize;
            let mut data = take_bytes(src, size)?;
            need(&data, 4)?;
            let count = data.get_u32() as usize;
            Value::List(decode_items(&mut data, count)?)
        }
        MAP_8 => {
            let size = take_u8(src)? as usize;
            let mut data = take_bytes(src, size)?;
            let count = take_u8(&mut data)? as usize;
            Value::Map(decode_pairs(&mut data, count)?)
        }
        MAP_32 => {
            need(src, 4)?;
            let size = src.get_u32() as usize;
            let mut data = take_bytes(src, size)?;
            need(&data, 4)?;
            let count = data.get_u32() as usize;
            Value::Map(decode_pairs(&mut data, count)?)
        }
        ARRAY_8 => {
            let size = take_u8(src)? as usize;
            let mut data = take_bytes(src, size)?;
            let count = take_u8(&mut data)? as usize;
            Value::Array(decode_array_items(&mut data, count)?)
        }
        ARRAY_32 => {
            need(src, 4)?;
            let size = src.get_u32() as usize;
            let mut data = take_bytes(src, size)?;
            need(&data, 4)?;
            let count = data.get_u32() as usize;
            Value::Array(decode_array_items(&mut data, count)?)
        }
        other => decode_opaque(other, src)?,
    };
    Ok(value)
}

/// Format codes carry their width category in the high nibble, so values this
/// crate does not interpret (signed ints, floats, timestamps, uuids, ...) can
/// still be consumed and skipped.
fn decode_opaque(code: u8, src: &mut Bytes) -> Result<Value, DecodeError> {
    let payload = match code >> 4 {
        0x4 => Bytes::new(),
        0x5 => take_bytes(src, 1)?,
        0x6 => take_bytes(src, 2)?,
        0x7 => take_bytes(src, 4)?,
        0x8 => take_bytes(src, 8)?,
        0x9 => take_bytes(src, 16)?,
        0xa => {
            let len = take_u8(src)? as usize;
            take_bytes(src, len)?
        }
        0xb => {
            need(src, 4)?;
            let len = src.get_u32() as usize;
            take_bytes(src, len)?
        }
        _ => return Err(DecodeError::InvalidFormatCode(code)),
    };
    Ok(Value::Opaque(code, payload))
}

fn decode_items(data: &mut Bytes, count: usize) -> Result<Vec<Value>, DecodeError> {
    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        items.push(decode_value(data)?);
    }
    Ok(items)
}

fn decode_pairs(data: &mut Bytes, count: usize) -> Result<Vec<(Value, Value)>, DecodeError> {
    if count % 2 != 0 {
        return Err(DecodeError::Malformed("map count must be even"));
    }
    let mut pairs = Vec::with_capacity((count / 2).min(64));
    for _ in 0..count / 2 {
        let key = decode_value(data)?;
        let value = decode_value(data)?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn decode_array_items(data: &mut Bytes, count: usize) -> Result<Vec<Value>, DecodeError> {
    let constructor = take_u8(data)?;
    if constructor == DESCRIBED {
        return Err(DecodeError::Malformed("described array elements"));
    }
    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        items.push(decode_with_code(constructor, data)?);
    }
    Ok(items)
}

/// Encodes a single value into `dst`
pub fn encode_value(dst: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Null => dst.put_u8(NULL),
        Value::Bool(true) => dst.put_u8(BOOLEAN_TRUE),
        Value::Bool(false) => dst.put_u8(BOOLEAN_FALSE),
        Value::Ubyte(v) => {
            dst.put_u8(UBYTE);
            dst.put_u8(*v);
        }
        Value::Ushort(v) => {
            dst.put_u8(USHORT);
            dst.put_u16(*v);
        }
        Value::Uint(0) => dst.put_u8(UINT_0),
        Value::Uint(v) if *v <= u8::MAX as u32 => {
            dst.put_u8(SMALL_UINT);
            dst.put_u8(*v as u8);
        }
        Value::Uint(v) => {
            dst.put_u8(UINT);
            dst.put_u32(*v);
        }
        Value::Ulong(0) => dst.put_u8(ULONG_0),
        Value::Ulong(v) if *v <= u8::MAX as u64 => {
            dst.put_u8(SMALL_ULONG);
            dst.put_u8(*v as u8);
        }
        Value::Ulong(v) => {
            dst.put_u8(ULONG);
            dst.put_u64(*v);
        }
        Value::String(s) => put_variable(dst, STR_8, STR_32, s.as_bytes()),
        Value::Symbol(s) => put_variable(dst, SYM_8, SYM_32, s.as_bytes()),
        Value::Binary(b) => put_variable(dst, VBIN_8, VBIN_32, b),
        Value::List(items) => {
            if items.is_empty() {
                dst.put_u8(LIST_0);
            } else {
                let mut body = BytesMut::new();
                for item in items {
                    encode_value(&mut body, item)?;
                }
                put_compound(dst, LIST_8, LIST_32, items.len(), &body);
            }
        }
        Value::Map(pairs) => {
            let mut body = BytesMut::new();
            for (key, value) in pairs {
                encode_value(&mut body, key)?;
                encode_value(&mut body, value)?;
            }
            put_compound(dst, MAP_8, MAP_32, pairs.len() * 2, &body);
        }
        Value::Array(items) => {
            // only symbol arrays occur in this subset (sasl-server-mechanisms)
            let mut body = BytesMut::new();
            for item in items {
                match item {
                    Value::Symbol(s) => {
                        body.put_u32(s.len() as u32);
                        body.put_slice(s.as_bytes());
                    }
                    _ => return Err(EncodeError::Unsupported("non-symbol array")),
                }
            }
            // the element constructor counts toward the size
            dst.put_u8(ARRAY_32);
            dst.put_u32((body.len() + 5) as u32);
            dst.put_u32(items.len() as u32);
            dst.put_u8(SYM_32);
            dst.put_slice(&body);
        }
        Value::Described(described) => {
            dst.put_u8(DESCRIBED);
            match &described.descriptor {
                Descriptor::Code(code) => encode_value(dst, &Value::Ulong(*code))?,
                Descriptor::Name(name) => encode_value(dst, &Value::Symbol(name.clone()))?,
            }
            encode_value(dst, &described.value)?;
        }
        Value::Opaque(code, payload) => {
            dst.put_u8(*code);
            match code >> 4 {
                0x4..=0x9 => {}
                0xa => dst.put_u8(payload.len() as u8),
                0xb => dst.put_u32(payload.len() as u32),
                _ => return Err(EncodeError::Unsupported("opaque compound")),
            }
            dst.put_slice(payload);
        }
    }
    Ok(())
}

fn put_variable(dst: &mut BytesMut, code8: u8, code32: u8, data: &[u8]) {
    if data.len() <= u8::MAX as usize {
        dst.put_u8(code8);
        dst.put_u8(data.len() as u8);
    } else {
        dst.put_u8(code32);
        dst.put_u32(data.len() as u32);
    }
    dst.put_slice(data);
}

fn put_compound(dst: &mut BytesMut, code8: u8, code32: u8, count: usize, body: &BytesMut) {
    // size includes the count field
    if body.len() + 1 <= u8::MAX as usize && count <= u8::MAX as usize {
        dst.put_u8(code8);
        dst.put_u8((body.len() + 1) as u8);
        dst.put_u8(count as u8);
    } else {
        dst.put_u8(code32);
        dst.put_u32((body.len() + 4) as u32);
        dst.put_u32(count as u32);
    }
    dst.put_slice(body);
}

/// Encodes a value into a fresh buffer
pub fn to_bytes(value: &Value) -> Result<Bytes, EncodeError> {
    let mut dst = BytesMut::new();
    encode_value(&mut dst, value)?;
    Ok(dst.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) {
        let mut encoded = to_bytes(&value).unwrap();
        let decoded = decode_value(&mut encoded).unwrap();
        assert!(encoded.is_empty());
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_round_trip_primitives() {
        round_trip(Value::Null);
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::Ubyte(0x7f));
        round_trip(Value::Ushort(5671));
        round_trip(Value::Uint(0));
        round_trip(Value::Uint(255));
        round_trip(Value::Uint(256 * 1024));
        round_trip(Value::Ulong(0x13));
        round_trip(Value::Ulong(u64::MAX));
        round_trip(Value::String("feedback".to_string()));
        round_trip(Value::Symbol("amqp:accepted:list".to_string()));
        round_trip(Value::Binary(Bytes::from_static(b"[]")));
    }

    #[test]
    fn test_round_trip_long_string() {
        round_trip(Value::String("x".repeat(300)));
    }

    #[test]
    fn test_round_trip_containers() {
        round_trip(Value::List(vec![
            Value::String("feedback-receiver".to_string()),
            Value::Uint(0),
            Value::Bool(true),
        ]));
        round_trip(Value::Map(vec![(
            Value::Symbol("client-version".to_string()),
            Value::String("amqp-feedback/0.1.0".to_string()),
        )]));
        round_trip(Value::Described(Box::new(Described::new(
            0x24,
            Value::List(Vec::new()),
        ))));
    }

    #[test]
    fn test_round_trip_symbol_array() {
        round_trip(Value::Array(vec![
            Value::Symbol("PLAIN".to_string()),
            Value::Symbol("ANONYMOUS".to_string()),
        ]));
    }

    #[test]
    fn test_decode_symbol_array() {
        // array8 of sym8: PLAIN, ANONYMOUS
        let mut encoded = Bytes::from_static(&[
            0xe0, 0x12, 0x02, 0xa3, 0x05, b'P', b'L', b'A', b'I', b'N', 0x09, b'A', b'N', b'O',
            b'N', b'Y', b'M', b'O', b'U', b'S',
        ]);
        let decoded = decode_value(&mut encoded).unwrap();
        assert_eq!(
            decoded,
            Value::Array(vec![
                Value::Symbol("PLAIN".to_string()),
                Value::Symbol("ANONYMOUS".to_string()),
            ])
        );
    }

    #[test]
    fn test_decode_uninterpreted_code_by_width() {
        // timestamp (0x83) is not interpreted but must still be consumed
        let mut encoded = Bytes::from_static(&[0x83, 0, 0, 0, 0, 0, 0, 0, 42, 0x41]);
        let first = decode_value(&mut encoded).unwrap();
        assert!(matches!(first, Value::Opaque(0x83, _)));
        assert_eq!(decode_value(&mut encoded).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_decode_incomplete_input() {
        let mut encoded = Bytes::from_static(&[0xa1, 0x05, b'a']);
        assert!(matches!(
            decode_value(&mut encoded),
            Err(DecodeError::Incomplete)
        ));
    }

    #[test]
    fn test_decode_symbolic_descriptor() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x00);
        encode_value(&mut buf, &Value::Symbol("amqp:sasl-mechanisms:list".to_string())).unwrap();
        encode_value(&mut buf, &Value::List(vec![Value::Symbol("PLAIN".to_string())])).unwrap();

        let mut encoded = buf.freeze();
        match decode_value(&mut encoded).unwrap() {
            Value::Described(described) => {
                assert_eq!(
                    described.descriptor,
                    Descriptor::Name("amqp:sasl-mechanisms:list".to_string())
                );
            }
            other => panic!("expected described value, got {:?}", other),
        }
    }
}
