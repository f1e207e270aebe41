//! Decoding of the AMQP message envelope down to its application payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{self, DecodeError, Value};
use crate::performative::{codes, descriptor_code};

/// Decodes a fully reassembled message buffer into the application payload
/// handed to the feedback callback.
///
/// Non-body sections (header, annotations, properties, footer) are skipped.
/// Every `Data` section contributes its raw bytes; an `AmqpValue` body holding
/// a string or binary contributes its content. A message without a body
/// section decodes to an empty payload, which is a legitimate result.
pub fn decode_payload(mut src: Bytes) -> Result<Bytes, DecodeError> {
    let mut payload = BytesMut::new();
    while !src.is_empty() {
        let section = match codec::decode_value(&mut src)? {
            Value::Described(section) => section,
            _ => return Err(DecodeError::Malformed("message section")),
        };
        match descriptor_code(&section.descriptor) {
            Some(codes::DATA) => match section.value {
                Value::Binary(bytes) => payload.put_slice(&bytes),
                _ => return Err(DecodeError::Malformed("data section")),
            },
            Some(codes::AMQP_VALUE) => match section.value {
                Value::String(text) => payload.put_slice(text.as_bytes()),
                Value::Binary(bytes) => payload.put_slice(&bytes),
                Value::Null => {}
                _ => return Err(DecodeError::Malformed("amqp-value body")),
            },
            // tolerated and dropped, including sections this crate has no
            // descriptor for
            _ => {}
        }
    }
    Ok(payload.freeze())
}
