//! SASL frame type and corresponding encoder and decoder

use bytes::{Buf, BufMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{self, DecodeError, Value};
use crate::performative::{codes, descriptor_code, SaslInit, SaslMechanisms, SaslOutcome};

use super::{Error, FRAME_TYPE_SASL};

/// SASL frame
#[derive(Debug)]
pub enum Frame {
    /// SASL Mechanisms
    Mechanisms(SaslMechanisms),

    /// SASL Init
    Init(SaslInit),

    /// SASL Challenge, recognized but not negotiable with the PLAIN profile
    Challenge(Value),

    /// SASL Response, never produced by this client
    Response(Value),

    /// SASL Outcome
    Outcome(SaslOutcome),
}

/// Encoder and Decoder for SASL frames
#[derive(Debug)]
pub struct FrameCodec {}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        // the extended header is ignored, doff is always 2
        dst.put_u8(0x02);
        dst.put_u8(FRAME_TYPE_SASL);
        // bytes 6 and 7 of the header are ignored
        dst.put_u16(0x0000);

        let value = match item {
            Frame::Mechanisms(body) => body.to_value(),
            Frame::Init(body) => body.to_value(),
            Frame::Outcome(body) => body.to_value(),
            Frame::Challenge(_) | Frame::Response(_) => return Err(Error::NotImplemented),
        };
        codec::encode_value(dst, &value)?;
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.remaining() < 4 {
            return Err(DecodeError::Incomplete.into());
        }
        let doff = src.get_u8();
        let ftype = src.get_u8();
        let _ignored = src.get_u16();

        if ftype != FRAME_TYPE_SASL {
            return Err(Error::NotImplemented);
        }
        if doff != 2 {
            return Err(Error::NotImplemented);
        }

        let mut bytes = src.split().freeze();
        let body = match codec::decode_value(&mut bytes)? {
            Value::Described(described) => described,
            _ => return Err(DecodeError::Malformed("sasl frame body").into()),
        };
        let frame = match descriptor_code(&body.descriptor) {
            Some(codes::SASL_MECHANISMS) => {
                Frame::Mechanisms(SaslMechanisms::from_list(body.value)?)
            }
            Some(codes::SASL_INIT) => Frame::Init(SaslInit::from_list(body.value)?),
            Some(codes::SASL_CHALLENGE) => Frame::Challenge(body.value),
            Some(codes::SASL_RESPONSE) => Frame::Response(body.value),
            Some(codes::SASL_OUTCOME) => Frame::Outcome(SaslOutcome::from_list(body.value)?),
            _ => return Err(Error::NotImplemented),
        };
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use crate::performative::{SaslInit, SaslMechanisms, SaslOutcome};

    use super::{Frame, FrameCodec};

    #[test]
    fn test_mechanisms_round_trip() {
        let mechanisms = SaslMechanisms {
            sasl_server_mechanisms: vec!["PLAIN".to_string()],
        };
        let mut buf = BytesMut::new();
        FrameCodec {}
            .encode(Frame::Mechanisms(mechanisms), &mut buf)
            .unwrap();

        match (FrameCodec {}).decode(&mut buf).unwrap().unwrap() {
            Frame::Mechanisms(decoded) => {
                assert_eq!(decoded.sasl_server_mechanisms, vec!["PLAIN"]);
            }
            other => panic!("expected Mechanisms, got {:?}", other),
        }
    }

    #[test]
    fn test_init_round_trip() {
        let init = SaslInit {
            mechanism: "PLAIN".to_string(),
            initial_response: Some(Bytes::from_static(b"\x00bbb\x00ccc")),
            hostname: Some("aaa".to_string()),
        };
        let mut buf = BytesMut::new();
        FrameCodec {}.encode(Frame::Init(init), &mut buf).unwrap();

        match (FrameCodec {}).decode(&mut buf).unwrap().unwrap() {
            Frame::Init(decoded) => {
                assert_eq!(decoded.mechanism, "PLAIN");
                assert_eq!(
                    decoded.initial_response,
                    Some(Bytes::from_static(b"\x00bbb\x00ccc"))
                );
                assert_eq!(decoded.hostname.as_deref(), Some("aaa"));
            }
            other => panic!("expected Init, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_rejection_code() {
        let outcome = SaslOutcome {
            code: 1,
            additional_data: None,
        };
        let mut buf = BytesMut::new();
        FrameCodec {}
            .encode(Frame::Outcome(outcome), &mut buf)
            .unwrap();

        match (FrameCodec {}).decode(&mut buf).unwrap().unwrap() {
            Frame::Outcome(decoded) => assert_eq!(decoded.code, 1),
            other => panic!("expected Outcome, got {:?}", other),
        }
    }
}
