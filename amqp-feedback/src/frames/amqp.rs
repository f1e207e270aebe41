//! AMQP frame type and corresponding encoder and decoder

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{self, DecodeError, Value};
use crate::performative::{
    codes, descriptor_code, Attach, Begin, Close, Detach, Disposition, End, Flow, Open, Transfer,
};
use crate::Payload;

use super::{Error, FRAME_TYPE_AMQP};

/// AMQP frame
#[derive(Debug)]
pub struct Frame {
    /// AMQP frame channel
    pub channel: u16,

    /// AMQP frame body
    pub body: FrameBody,
}

impl Frame {
    /// Creates a new AMQP frame
    pub fn new(channel: impl Into<u16>, body: FrameBody) -> Self {
        Self {
            channel: channel.into(),
            body,
        }
    }

    /// Get the channel of the frame
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Consume the frame to get the frame body
    pub fn into_body(self) -> FrameBody {
        self.body
    }

    /// Creates an empty frame, used by peers only to reset idle timeouts
    pub fn empty() -> Self {
        Self {
            channel: 0,
            body: FrameBody::Empty,
        }
    }
}

/// AMQP frame body
pub enum FrameBody {
    /// Open performative
    Open(Open),

    /// Begin performative
    Begin(Begin),

    /// Attach performative
    Attach(Attach),

    /// Flow performative
    Flow(Flow),

    /// Transfer performative and payload
    Transfer {
        /// Transfer performative
        performative: Transfer,

        /// Binary payload
        payload: Payload,
    },

    /// Disposition performative
    Disposition(Disposition),

    /// Detach performative
    Detach(Detach),

    /// End performative
    End(End),

    /// Close performative
    Close(Close),

    /// An empty frame
    Empty,
}

impl std::fmt::Debug for FrameBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(arg0) => f.debug_tuple("Open").field(arg0).finish(),
            Self::Begin(arg0) => f.debug_tuple("Begin").field(arg0).finish(),
            Self::Attach(arg0) => f.debug_tuple("Attach").field(arg0).finish(),
            Self::Flow(arg0) => f.debug_tuple("Flow").field(arg0).finish(),
            Self::Transfer {
                performative,
                payload,
            } => f
                .debug_struct("Transfer")
                .field("performative", performative)
                .field("payload.len", &payload.len())
                .finish(),
            Self::Disposition(arg0) => f.debug_tuple("Disposition").field(arg0).finish(),
            Self::Detach(arg0) => f.debug_tuple("Detach").field(arg0).finish(),
            Self::End(arg0) => f.debug_tuple("End").field(arg0).finish(),
            Self::Close(arg0) => f.debug_tuple("Close").field(arg0).finish(),
            Self::Empty => write!(f, "Empty"),
        }
    }
}

fn write_header(dst: &mut BytesMut, channel: u16) {
    // the extended header is ignored, doff is always 2
    dst.put_u8(2);
    dst.put_u8(FRAME_TYPE_AMQP);
    dst.put_u16(channel);
}

/// Encoder of the AMQP frames
#[derive(Debug)]
pub struct FrameEncoder {}

impl Encoder<Frame> for FrameEncoder {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_header(dst, item.channel);
        let value = match item.body {
            FrameBody::Open(performative) => performative.to_value(),
            FrameBody::Begin(performative) => performative.to_value(),
            FrameBody::Attach(performative) => performative.to_value(),
            FrameBody::Flow(performative) => performative.to_value(),
            FrameBody::Transfer {
                performative,
                payload,
            } => {
                codec::encode_value(dst, &performative.to_value())?;
                dst.put_slice(&payload);
                return Ok(());
            }
            FrameBody::Disposition(performative) => performative.to_value(),
            FrameBody::Detach(performative) => performative.to_value(),
            FrameBody::End(performative) => performative.to_value(),
            FrameBody::Close(performative) => performative.to_value(),
            FrameBody::Empty => return Ok(()),
        };
        codec::encode_value(dst, &value)?;
        Ok(())
    }
}

/// Decoder of the AMQP frames
#[derive(Debug)]
pub struct FrameDecoder {}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.remaining() < 4 {
            return Err(DecodeError::Incomplete.into());
        }
        let doff = src.get_u8();
        let ftype = src.get_u8();
        let channel = src.get_u16();

        if ftype != FRAME_TYPE_AMQP {
            return Err(Error::NotImplemented);
        }
        if doff != 2 {
            return Err(Error::NotImplemented);
        }

        if src.is_empty() {
            return Ok(Some(Frame {
                channel,
                body: FrameBody::Empty,
            }));
        }

        let mut bytes = src.split().freeze();
        let performative = match codec::decode_value(&mut bytes)? {
            Value::Described(described) => described,
            _ => return Err(DecodeError::Malformed("performative").into()),
        };
        let code = descriptor_code(&performative.descriptor).ok_or(Error::NotImplemented)?;
        let body = match code {
            codes::OPEN => FrameBody::Open(Open::from_list(performative.value)?),
            codes::BEGIN => FrameBody::Begin(Begin::from_list(performative.value)?),
            codes::ATTACH => FrameBody::Attach(Attach::from_list(performative.value)?),
            codes::FLOW => FrameBody::Flow(Flow::from_list(performative.value)?),
            codes::TRANSFER => FrameBody::Transfer {
                performative: Transfer::from_list(performative.value)?,
                // everything after the performative is the payload
                payload: bytes,
            },
            codes::DISPOSITION => {
                FrameBody::Disposition(Disposition::from_list(performative.value)?)
            }
            codes::DETACH => FrameBody::Detach(Detach::from_list(performative.value)?),
            codes::END => FrameBody::End(End::from_list(performative.value)?),
            codes::CLOSE => FrameBody::Close(Close::from_list(performative.value)?),
            _ => return Err(Error::NotImplemented),
        };

        Ok(Some(Frame { channel, body }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use crate::performative::{Open, Transfer};

    use super::{Frame, FrameBody, FrameDecoder, FrameEncoder};

    #[test]
    fn test_encoding_empty_frame() {
        let empty = Frame::empty();
        let mut encoder = FrameEncoder {};
        let mut dst = BytesMut::new();
        encoder.encode(empty, &mut dst).unwrap();
        assert_eq!(&dst[..], &[0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_empty_frame() {
        let mut decoder = FrameDecoder {};
        let mut src = BytesMut::from(&[0x02, 0x00, 0x00, 0x00][..]);
        let frame = decoder.decode(&mut src).unwrap().unwrap();
        assert!(matches!(frame.body, FrameBody::Empty));
    }

    #[test]
    fn test_open_frame_round_trip() {
        let open = Open {
            container_id: "feedback-receiver-1".to_string(),
            hostname: Some("aaa".to_string()),
            max_frame_size: 1000,
            channel_max: 9,
            idle_time_out: None,
        };
        let mut dst = BytesMut::new();
        FrameEncoder {}
            .encode(Frame::new(0u16, FrameBody::Open(open)), &mut dst)
            .unwrap();

        let frame = FrameDecoder {}.decode(&mut dst).unwrap().unwrap();
        assert_eq!(frame.channel, 0);
        match frame.body {
            FrameBody::Open(open) => {
                assert_eq!(open.container_id, "feedback-receiver-1");
                assert_eq!(open.hostname.as_deref(), Some("aaa"));
                assert_eq!(open.max_frame_size, 1000);
                assert_eq!(open.channel_max, 9);
            }
            other => panic!("expected Open, got {:?}", other),
        }
    }

    #[test]
    fn test_transfer_frame_keeps_payload() {
        let transfer = Transfer {
            handle: 0,
            delivery_id: Some(0),
            delivery_tag: Some(Bytes::from_static(b"fb-0")),
            message_format: Some(0),
            settled: Some(false),
            more: false,
            aborted: false,
        };
        let mut dst = BytesMut::new();
        FrameEncoder {}
            .encode(
                Frame::new(
                    0u16,
                    FrameBody::Transfer {
                        performative: transfer,
                        payload: Bytes::from_static(b"\x00\x53\x75\xa0\x02[]"),
                    },
                ),
                &mut dst,
            )
            .unwrap();

        let frame = FrameDecoder {}.decode(&mut dst).unwrap().unwrap();
        match frame.body {
            FrameBody::Transfer {
                performative,
                payload,
            } => {
                assert_eq!(performative.delivery_id, Some(0));
                assert_eq!(performative.delivery_tag, Some(Bytes::from_static(b"fb-0")));
                assert!(!performative.more);
                assert_eq!(&payload[..], b"\x00\x53\x75\xa0\x02[]");
            }
            other => panic!("expected Transfer, got {:?}", other),
        }
    }
}
