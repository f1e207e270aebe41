//! The event loop that drives one receive attempt from protocol negotiation
//! to a settled delivery or a clean close.
//!
//! One attempt owns its transport, connection, session, and link exclusively;
//! all events are processed in arrival order on the calling task and the
//! final state is handed back to the orchestrator by value.

use std::cmp::min;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout_at, Instant};
use tracing::{instrument, trace};

use crate::codec::Value;
use crate::connection::Connection;
use crate::constants::{
    CLIENT_VERSION, CLIENT_VERSION_KEY, CLOSE_GRACE, FEEDBACK_ADDRESS, LINK_NAME,
    MIN_MAX_FRAME_SIZE,
};
use crate::error::Error;
use crate::frames::amqp::{Frame, FrameBody};
use crate::link::ReceiverLink;
use crate::messaging;
use crate::receiver::FeedbackHandler;
use crate::sasl_profile::SaslProfile;
use crate::session::Session;
use crate::transport::{protocol_header::ProtocolHeader, NegotiationError, Transport};
use crate::util::Running;

/// The per-delivery flow control grant: the peer may push exactly one message
const INITIAL_CREDIT: u32 = 1;

/// Final state of a receive attempt, handed back to the orchestrator for
/// verification once the attempt's event loop has stopped
#[derive(Debug, Default)]
pub(crate) struct AttemptOutcome {
    pub(crate) connection_opened_remotely: bool,
    pub(crate) session_opened_remotely: bool,
    pub(crate) link_opened_remotely: bool,

    /// First connection-level error observed, sticky until consumed
    pub(crate) saved_error: Option<Error>,

    /// Decoded payload of the settled delivery, when one arrived
    pub(crate) payload: Option<Bytes>,
}

impl AttemptOutcome {
    /// An attempt that never got far enough to open anything
    pub(crate) fn unopened() -> Self {
        Self::default()
    }

    /// An attempt that failed outright before the event loop started
    pub(crate) fn failed(error: Error) -> Self {
        Self {
            saved_error: Some(error),
            ..Self::default()
        }
    }
}

/// One receive attempt. Constructed fresh for every `recv` call and consumed
/// by [`run`](ReceiveAttempt::run).
pub(crate) struct ReceiveAttempt<Io> {
    transport: Transport<Io>,
    connection: Connection,
    session: Session,
    link: ReceiverLink,

    saved_error: Option<Error>,
    payload: Option<Bytes>,
    closing: bool,
}

impl<Io> ReceiveAttempt<Io>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Negotiates SASL and the AMQP protocol header on the stream and binds
    /// the frame transport
    pub(crate) async fn negotiate(
        mut io: Io,
        profile: &SaslProfile,
        hostname: &str,
        container_id: String,
    ) -> Result<Self, NegotiationError> {
        Transport::connect_sasl(&mut io, Some(hostname), profile).await?;
        Transport::negotiate(&mut io, ProtocolHeader::amqp()).await?;

        let transport = Transport::bind(io, MIN_MAX_FRAME_SIZE);
        let mut connection = Connection::new(container_id, hostname.to_string());
        connection.bind();

        let session = Session::new(0);
        let link = ReceiverLink::new(
            LINK_NAME.to_string(),
            session.outgoing_channel(),
            FEEDBACK_ADDRESS.to_string(),
            vec![(
                CLIENT_VERSION_KEY.to_string(),
                Value::String(CLIENT_VERSION.to_string()),
            )],
        );

        Ok(Self {
            transport,
            connection,
            session,
            link,
            saved_error: None,
            payload: None,
            closing: false,
        })
    }

    /// Drives the attempt until a delivery has been settled and the close
    /// handshake finished, the deadline elapsed, or a fatal error occurred.
    /// Every exit path leaves the transport closed.
    #[instrument(name = "receive-attempt", skip_all)]
    pub(crate) async fn run(
        mut self,
        deadline: Instant,
        handler: &mut Option<Box<dyn FeedbackHandler>>,
    ) -> AttemptOutcome {
        if let Err(err) = self.connection.send_open(&mut self.transport).await {
            self.saved_error = Some(err);
            return self.into_outcome();
        }

        loop {
            match timeout_at(deadline, self.transport.next()).await {
                Err(_elapsed) => {
                    trace!("receive deadline elapsed");
                    self.shutdown().await;
                    break;
                }
                Ok(None) => {
                    self.connection.on_transport_closed();
                    if !self.closing && self.saved_error.is_none() {
                        self.saved_error = Some(Error::Connect(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "transport closed before the connection was closed",
                        )));
                    }
                    break;
                }
                Ok(Some(Err(err))) => {
                    self.saved_error.get_or_insert(err.into());
                    break;
                }
                Ok(Some(Ok(frame))) => match self.on_incoming(frame, handler).await {
                    Ok(Running::Continue) => {}
                    Ok(Running::Stop) => break,
                    Err(err) => {
                        self.saved_error.get_or_insert(err);
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        let _ = SinkExt::close(&mut self.transport).await;
        self.into_outcome()
    }

    async fn on_incoming(
        &mut self,
        frame: Frame,
        handler: &mut Option<Box<dyn FeedbackHandler>>,
    ) -> Result<Running, Error> {
        let Frame { channel, body } = frame;
        match body {
            FrameBody::Open(open) => {
                self.connection.on_incoming_open(channel, open)?;

                if let Some(remote_max_frame_size) = self.connection.remote_max_frame_size() {
                    let max_frame_size = min(
                        self.connection.local_max_frame_size(),
                        remote_max_frame_size,
                    );
                    self.transport.set_max_frame_size(max_frame_size as usize);
                }

                // the connection is locally open, the session may begin
                self.session.send_begin(&mut self.transport).await?;
            }
            FrameBody::Begin(begin) => {
                self.session.on_incoming_begin(channel, begin)?;
                self.link.send_attach(&mut self.transport).await?;
            }
            FrameBody::Attach(attach) => {
                self.link.on_incoming_attach(channel, attach)?;
                self.link
                    .send_flow(&mut self.transport, &self.session, INITIAL_CREDIT)
                    .await?;
            }
            FrameBody::Flow(flow) => {
                trace!(channel, frame = ?flow);
                self.session.on_incoming_flow(&flow);
            }
            FrameBody::Transfer {
                performative,
                payload,
            } => {
                if !self.session.accepts_channel(channel) {
                    return Err(Error::illegal_state("transfer on an unknown channel"));
                }
                self.session.on_incoming_transfer();
                if self.link.on_incoming_transfer(performative, payload)? {
                    self.on_delivery_readable(handler).await?;
                }
            }
            FrameBody::Disposition(disposition) => {
                trace!(channel, frame = ?disposition);
            }
            FrameBody::Detach(detach) => {
                if let Some(condition) = self.link.on_incoming_detach(channel, detach) {
                    self.saved_error.get_or_insert(Error::Protocol(condition));
                }
                if !self.closing {
                    self.start_close().await?;
                }
            }
            FrameBody::End(end) => {
                if let Some(condition) = self.session.on_incoming_end(channel, end) {
                    self.saved_error.get_or_insert(Error::Protocol(condition));
                }
                if !self.closing {
                    self.start_close().await?;
                }
            }
            FrameBody::Close(close) => {
                if let Some(condition) = self.connection.on_incoming_close(channel, close) {
                    self.saved_error.get_or_insert(Error::Protocol(condition));
                }
                if !self.connection.close_sent() {
                    self.connection.send_close(&mut self.transport, None).await?;
                }
                return Ok(Running::Stop);
            }
            FrameBody::Empty => {}
        }
        Ok(Running::Continue)
    }

    /// A delivery is fully framed: drain it, decode the envelope, accept,
    /// settle, notify, and begin the close handshake
    async fn on_delivery_readable(
        &mut self,
        handler: &mut Option<Box<dyn FeedbackHandler>>,
    ) -> Result<(), Error> {
        if let Some(delivery) = self.link.current() {
            trace!(tag = ?delivery.tag(), pending = delivery.pending(), "delivery is readable");
        }
        let raw = self.link.drain_current()?;
        let payload = messaging::decode_payload(raw)?;

        self.link.send_disposition(&mut self.transport).await?;
        self.link.settle_current();

        // an unregistered callback is valid and simply suppresses the
        // notification
        if let Some(handler) = handler.as_mut() {
            handler.on_feedback(payload.clone());
        }
        self.payload = Some(payload);

        self.start_close().await
    }

    /// Initiates the detach/end/close sequence once
    async fn start_close(&mut self) -> Result<(), Error> {
        if self.closing {
            return Ok(());
        }
        self.closing = true;
        self.link.send_detach(&mut self.transport).await?;
        self.session.send_end(&mut self.transport).await?;
        self.connection.send_close(&mut self.transport, None).await?;
        Ok(())
    }

    /// Best-effort close after a deadline or a local error, bounded by a
    /// grace period so the socket is never leaked on a stuck peer
    async fn shutdown(&mut self) {
        if let Err(err) = self.start_close().await {
            trace!(error = %err, "close handshake could not be sent");
            return;
        }
        let grace = Instant::now() + CLOSE_GRACE;
        loop {
            match timeout_at(grace, self.transport.next()).await {
                Err(_elapsed) => break,
                Ok(None) => {
                    self.connection.on_transport_closed();
                    break;
                }
                Ok(Some(Err(_))) => break,
                Ok(Some(Ok(frame))) => {
                    if let FrameBody::Close(close) = frame.body {
                        if let Some(condition) = self.connection.on_incoming_close(frame.channel, close)
                        {
                            self.saved_error.get_or_insert(Error::Protocol(condition));
                        }
                        break;
                    }
                }
            }
        }
    }

    fn into_outcome(self) -> AttemptOutcome {
        AttemptOutcome {
            connection_opened_remotely: self.connection.remote_opened(),
            session_opened_remotely: self.session.remote_opened(),
            link_opened_remotely: self.link.remote_opened(),
            saved_error: self.saved_error,
            payload: self.payload,
        }
    }
}
