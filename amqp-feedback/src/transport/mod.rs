//! Implements low level transport framing
//!
//! Two layer design: layer 0 is `tokio_util::codec::LengthDelimitedCodec`
//! over the byte stream, layer 1 is a frame codec that encodes and decodes
//! one AMQP or SASL frame per length-delimited chunk.

pub mod error;
pub mod protocol_header;
pub(crate) mod tls;

use std::task::Poll;

use bytes::{Bytes, BytesMut};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};
use tracing::trace;

use crate::frames::{
    amqp::{Frame, FrameDecoder, FrameEncoder},
    sasl, Error,
};
use crate::performative::SaslOutcome;
use crate::sasl_profile::{Negotiation, SaslProfile};

pub use error::NegotiationError;
use protocol_header::ProtocolHeader;

fn length_delimited_codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        // the 4 length bytes are part of the encoded frame size
        .max_frame_length(max_frame_size)
        .length_adjustment(-4)
        .new_codec()
}

pin_project! {
    /// The transport, a frame-level Sink and Stream over the byte stream
    pub struct Transport<Io> {
        #[pin]
        framed: Framed<Io, LengthDelimitedCodec>,
    }
}

impl<Io> Transport<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    /// Binds the AMQP framing layer onto the byte stream
    pub fn bind(io: Io, max_frame_size: usize) -> Self {
        let framed = Framed::new(io, length_delimited_codec(max_frame_size));
        Self { framed }
    }

    /// Updates the maximum accepted frame size after negotiation
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) -> &mut Self {
        self.framed.codec_mut().set_max_frame_length(max_frame_size);
        self
    }

    /// Sends the local protocol header
    pub async fn send_proto_header(
        io: &mut Io,
        proto_header: ProtocolHeader,
    ) -> Result<(), NegotiationError> {
        let buf: [u8; 8] = proto_header.into();
        io.write_all(&buf).await?;
        io.flush().await?;
        Ok(())
    }

    /// Receives the peer's protocol header, failing on a mismatch
    pub async fn recv_proto_header(
        io: &mut Io,
        proto_header: &ProtocolHeader,
    ) -> Result<ProtocolHeader, NegotiationError> {
        let mut inbound_buf = [0u8; 8];
        io.read_exact(&mut inbound_buf).await?;
        let incoming_header = ProtocolHeader::try_from(inbound_buf)
            .map_err(NegotiationError::ProtocolHeaderMismatch)?;
        if incoming_header != *proto_header {
            return Err(NegotiationError::ProtocolHeaderMismatch(inbound_buf));
        }
        Ok(incoming_header)
    }

    /// Exchanges protocol headers with the peer
    pub async fn negotiate(
        io: &mut Io,
        proto_header: ProtocolHeader,
    ) -> Result<ProtocolHeader, NegotiationError> {
        Self::send_proto_header(io, proto_header.clone()).await?;
        Self::recv_proto_header(io, &proto_header).await
    }

    /// Performs the SASL exchange on the stream, before any AMQP frame.
    ///
    /// On success the stream is left ready for the AMQP protocol header
    /// exchange.
    pub async fn connect_sasl(
        io: &mut Io,
        hostname: Option<&str>,
        profile: &SaslProfile,
    ) -> Result<(), NegotiationError> {
        Self::negotiate(io, ProtocolHeader::sasl()).await?;

        let mut framed = Framed::new(&mut *io, length_delimited_codec(crate::constants::MIN_MAX_FRAME_SIZE));
        loop {
            let mut chunk = match framed.next().await {
                Some(chunk) => chunk?,
                None => {
                    return Err(NegotiationError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream closed during SASL negotiation",
                    )))
                }
            };
            let frame = sasl::FrameCodec {}
                .decode(&mut chunk)?
                .ok_or(crate::codec::DecodeError::Incomplete)?;
            trace!(?frame);

            match profile.on_frame(frame, hostname)? {
                Negotiation::Init(init) => {
                    let mut buf = BytesMut::new();
                    sasl::FrameCodec {}.encode(sasl::Frame::Init(init), &mut buf)?;
                    framed.send(buf.freeze()).await?;
                }
                Negotiation::Outcome(SaslOutcome {
                    code: SaslOutcome::OK,
                    ..
                }) => break,
                Negotiation::Outcome(SaslOutcome {
                    code,
                    additional_data,
                }) => {
                    return Err(NegotiationError::SaslError {
                        code,
                        additional_data,
                    })
                }
            }
        }

        let parts = framed.into_parts();
        if !parts.read_buf.is_empty() {
            // the peer is not allowed to send AMQP frames until the headers
            // have been exchanged
            return Err(NegotiationError::NotImplemented(Some(
                "pipelined frames after SASL outcome".to_string(),
            )));
        }
        Ok(())
    }
}

impl<Io> Sink<Frame> for Transport<Io>
where
    Io: AsyncWrite + Unpin,
{
    type Error = Error;

    fn poll_ready(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: std::pin::Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let mut bytesmut = BytesMut::new();
        let mut encoder = FrameEncoder {};
        encoder.encode(item, &mut bytesmut)?;

        let this = self.project();
        this.framed
            .start_send(Bytes::from(bytesmut))
            .map_err(Into::into)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_close(cx).map_err(Into::into)
    }
}

impl<Io> Stream for Transport<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<Frame, Error>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.framed.poll_next(cx) {
            Poll::Ready(Some(item)) => {
                let mut src = match item {
                    Ok(b) => b,
                    Err(err) => return Poll::Ready(Some(Err(err.into()))),
                };
                let mut decoder = FrameDecoder {};
                Poll::Ready(decoder.decode(&mut src).transpose())
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_test::io::Builder;

    use crate::frames::amqp::{Frame, FrameBody};
    use crate::performative::Begin;
    use crate::sasl_profile::SaslProfile;

    use super::{protocol_header::ProtocolHeader, Transport};

    #[tokio::test]
    async fn test_header_exchange() {
        let mut mock = Builder::new()
            .write(b"AMQP")
            .write(&[0, 1, 0, 0])
            .read(b"AMQP")
            .read(&[0, 1, 0, 0])
            .build();

        Transport::negotiate(&mut mock, ProtocolHeader::amqp())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_header_mismatch() {
        let mut mock = Builder::new()
            .write(b"AMQP")
            .write(&[0, 1, 0, 0])
            .read(b"AMQP")
            .read(&[3, 1, 0, 0])
            .build();

        let result = Transport::negotiate(&mut mock, ProtocolHeader::amqp()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_frame_sink_and_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let mut outgoing = Transport::bind(client, 512);
        let mut incoming = Transport::bind(server, 512);

        let begin = Begin {
            remote_channel: None,
            next_outgoing_id: 0,
            incoming_window: 2048,
            outgoing_window: 2048,
            handle_max: 7,
        };
        outgoing
            .send(Frame::new(0u16, FrameBody::Begin(begin)))
            .await
            .unwrap();

        let frame = incoming.next().await.unwrap().unwrap();
        match frame.body {
            FrameBody::Begin(begin) => {
                assert_eq!(begin.incoming_window, 2048);
                assert_eq!(begin.handle_max, 7);
            }
            other => panic!("expected Begin, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_frame_over_transport() {
        let (client, server) = tokio::io::duplex(64);
        let mut outgoing = Transport::bind(client, 512);
        let mut incoming = Transport::bind(server, 512);

        outgoing.send(Frame::empty()).await.unwrap();
        let frame = incoming.next().await.unwrap().unwrap();
        assert!(matches!(frame.body, FrameBody::Empty));
    }

    #[tokio::test]
    async fn test_sasl_plain_exchange() {
        use crate::frames::sasl::{Frame as SaslFrame, FrameCodec};
        use crate::performative::{SaslMechanisms, SaslOutcome};
        use bytes::BytesMut;
        use tokio_util::codec::{Decoder, Encoder, Framed};

        let (mut client, server) = tokio::io::duplex(1024);

        let peer = tokio::spawn(async move {
            let mut server = server;
            // header exchange
            let mut header = [0u8; 8];
            tokio::io::AsyncReadExt::read_exact(&mut server, &mut header)
                .await
                .unwrap();
            assert_eq!(header, [b'A', b'M', b'Q', b'P', 3, 1, 0, 0]);
            tokio::io::AsyncWriteExt::write_all(&mut server, &header)
                .await
                .unwrap();

            let mut framed = Framed::new(server, super::length_delimited_codec(512));
            let mut buf = BytesMut::new();
            FrameCodec {}
                .encode(
                    SaslFrame::Mechanisms(SaslMechanisms {
                        sasl_server_mechanisms: vec!["PLAIN".to_string()],
                    }),
                    &mut buf,
                )
                .unwrap();
            framed.send(buf.freeze()).await.unwrap();

            let mut chunk = framed.next().await.unwrap().unwrap();
            match (FrameCodec {}).decode(&mut chunk).unwrap().unwrap() {
                SaslFrame::Init(init) => {
                    assert_eq!(init.mechanism, "PLAIN");
                    assert_eq!(&init.initial_response.unwrap()[..], b"\x00bbb\x00ccc");
                }
                other => panic!("expected Init, got {:?}", other),
            }

            let mut buf = BytesMut::new();
            FrameCodec {}
                .encode(
                    SaslFrame::Outcome(SaslOutcome {
                        code: 0,
                        additional_data: None,
                    }),
                    &mut buf,
                )
                .unwrap();
            framed.send(buf.freeze()).await.unwrap();
        });

        let profile = SaslProfile::Plain {
            username: "bbb".to_string(),
            password: "ccc".to_string(),
        };
        Transport::connect_sasl(&mut client, Some("aaa"), &profile)
            .await
            .unwrap();
        peer.await.unwrap();
    }
}
