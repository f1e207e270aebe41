//! The public receive orchestrator.
//!
//! A [`FeedbackReceiver`] drives one connection/session/link triple per
//! `recv` call: connect over TLS (optionally WebSocket-wrapped), authenticate
//! with SASL PLAIN, open the endpoints, take exactly one delivery, settle it
//! `Accepted`, and close. Nothing is reused between calls.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument};

use amqp_feedback_ws::WebSocketStream;

use crate::constants::{AMQPS_PORT, LINK_NAME, WEBSOCKET_PATH, WEBSOCKET_PORT};
use crate::engine::{AttemptOutcome, ReceiveAttempt};
use crate::error::Error;
use crate::sasl_profile::SaslProfile;
use crate::transport::{self, NegotiationError};

/// Observer of successfully received feedback payloads.
///
/// Invoked zero or one time per successful [`FeedbackReceiver::recv`] call
/// with the raw payload; the consumer owns any further parsing and must not
/// panic on malformed content.
pub trait FeedbackHandler: Send {
    /// Called with the payload of a settled delivery
    fn on_feedback(&mut self, payload: Bytes);
}

impl<F> FeedbackHandler for F
where
    F: FnMut(Bytes) + Send,
{
    fn on_feedback(&mut self, payload: Bytes) {
        (self)(payload)
    }
}

/// Which transport stack the receiver connects through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProtocol {
    /// AMQP over TLS on port 5671
    Amqps,

    /// AMQP over a WebSocket binding inside TLS on port 443
    AmqpsWs,
}

impl ServiceProtocol {
    pub(crate) fn uses_websocket(&self) -> bool {
        matches!(self, ServiceProtocol::AmqpsWs)
    }

    pub(crate) fn port(&self) -> u16 {
        match self {
            ServiceProtocol::Amqps => AMQPS_PORT,
            // always 443, even when the AMQP port differs
            ServiceProtocol::AmqpsWs => WEBSOCKET_PORT,
        }
    }
}

/// Host name, user name, and SAS token of the feedback endpoint. Immutable
/// once constructed; replacing the token means constructing a new credential.
#[derive(Clone)]
pub struct Credential {
    host_name: String,
    user_name: String,
    sas_token: String,
}

impl Credential {
    /// Creates a credential from opaque strings
    pub fn new(
        host_name: impl Into<String>,
        user_name: impl Into<String>,
        sas_token: impl Into<String>,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            user_name: user_name.into(),
            sas_token: sas_token.into(),
        }
    }

    /// Host name of the service
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// User name presented during SASL PLAIN
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub(crate) fn sas_token(&self) -> &str {
        &self.sas_token
    }
}

// The token must not end up in logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("host_name", &self.host_name)
            .field("user_name", &self.user_name)
            .field("sas_token", &"<redacted>")
            .finish()
    }
}

/// Receives service feedback messages, one delivery per call.
///
/// Constructing a receiver performs no network I/O; a connection is dialed
/// only by [`recv`](FeedbackReceiver::recv) after [`open`](FeedbackReceiver::open).
///
/// ```rust,ignore
/// let mut receiver = FeedbackReceiver::new(
///     Credential::new("contoso.example.com", "service", sas_token),
///     ServiceProtocol::Amqps,
/// );
/// receiver.open();
/// match receiver.recv(Duration::from_secs(30)).await? {
///     Some(payload) => println!("feedback: {:?}", payload),
///     None => println!("no feedback within the timeout"),
/// }
/// ```
pub struct FeedbackReceiver {
    credential: Credential,
    protocol: ServiceProtocol,
    handler: Option<Box<dyn FeedbackHandler>>,
    opened: bool,
    attempt: u64,
}

/// Builder for a [`FeedbackReceiver`]
pub struct Builder {
    credential: Credential,
    protocol: ServiceProtocol,
    handler: Option<Box<dyn FeedbackHandler>>,
}

impl Builder {
    /// The protocol variant, [`ServiceProtocol::Amqps`] unless set
    pub fn protocol(mut self, protocol: ServiceProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// The feedback observer
    pub fn feedback_handler(mut self, handler: impl FeedbackHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Builds the receiver. No I/O happens here.
    pub fn build(self) -> FeedbackReceiver {
        FeedbackReceiver {
            credential: self.credential,
            protocol: self.protocol,
            handler: self.handler,
            opened: false,
            attempt: 0,
        }
    }
}

impl FeedbackReceiver {
    /// Creates a builder for a [`FeedbackReceiver`]
    pub fn builder(credential: Credential) -> Builder {
        Builder {
            credential,
            protocol: ServiceProtocol::Amqps,
            handler: None,
        }
    }

    /// Creates a receiver. No I/O happens until `recv` is called.
    pub fn new(credential: Credential, protocol: ServiceProtocol) -> Self {
        Self {
            credential,
            protocol,
            handler: None,
            opened: false,
            attempt: 0,
        }
    }

    /// Registers the feedback observer. Without one, received payloads are
    /// still settled but not forwarded.
    pub fn set_feedback_handler(&mut self, handler: impl FeedbackHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Arms the receiver. `recv` fails until this is called.
    pub fn open(&mut self) {
        self.opened = true;
    }

    /// Disarms the receiver. Any later `recv` fails until `open` is called
    /// again.
    pub fn close(&mut self) {
        self.opened = false;
    }

    /// The credential this receiver was constructed with
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// The protocol variant this receiver was constructed with
    pub fn protocol(&self) -> ServiceProtocol {
        self.protocol
    }

    /// Receives at most one feedback payload, waiting up to `timeout`.
    ///
    /// Dials a fresh connection, authenticates, opens a session and a
    /// receiver link with a credit of one, and returns the decoded payload of
    /// the first settled delivery. `Ok(None)` means the peer had nothing to
    /// send within the timeout, which is a legitimate result and not an
    /// error. The connection is closed before returning, on every path.
    #[instrument(skip(self))]
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error> {
        self.check_opened()?;
        let deadline = Instant::now() + timeout;
        let host = self.credential.host_name().to_string();

        let outcome = if self.protocol.uses_websocket() {
            match timeout_at(deadline, Self::connect_websocket(&host, self.protocol.port())).await
            {
                Err(_elapsed) => AttemptOutcome::unopened(),
                Ok(Err(err)) => AttemptOutcome::failed(err),
                Ok(Ok(stream)) => self.drive(stream, deadline).await,
            }
        } else {
            match timeout_at(deadline, Self::connect_amqps(&host, self.protocol.port())).await {
                Err(_elapsed) => AttemptOutcome::unopened(),
                Ok(Err(err)) => AttemptOutcome::failed(err),
                Ok(Ok(stream)) => self.drive(stream, deadline).await,
            }
        };

        Self::verify_opened(outcome)
    }

    /// Receives at most one feedback payload over an already-established byte
    /// stream, skipping TCP, TLS, and WebSocket establishment.
    ///
    /// The stream is used for exactly this one attempt and closed before
    /// returning.
    pub async fn recv_with_stream<Io>(
        &mut self,
        stream: Io,
        timeout: Duration,
    ) -> Result<Option<Bytes>, Error>
    where
        Io: AsyncRead + AsyncWrite + Send + Unpin,
    {
        self.check_opened()?;
        let deadline = Instant::now() + timeout;
        let outcome = self.drive(stream, deadline).await;
        Self::verify_opened(outcome)
    }

    fn check_opened(&self) -> Result<(), Error> {
        if self.opened {
            Ok(())
        } else {
            Err(Error::io("the receiver has not been opened"))
        }
    }

    async fn connect_amqps(
        host: &str,
        port: u16,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, Error> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(Error::Connect)?;
        transport::tls::connect(host, tcp).await.map_err(tls_error)
    }

    async fn connect_websocket(
        host: &str,
        port: u16,
    ) -> Result<WebSocketStream<tokio_rustls::client::TlsStream<TcpStream>>, Error> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(Error::Connect)?;
        let tls = transport::tls::connect(host, tcp).await.map_err(tls_error)?;
        let request = format!("wss://{}:{}{}", host, port, WEBSOCKET_PATH);
        let (stream, _response) = WebSocketStream::connect_with_stream(request, tls)
            .await
            .map_err(|err| {
                Error::Connect(std::io::Error::new(std::io::ErrorKind::Other, err))
            })?;
        Ok(stream)
    }

    /// Negotiates and runs one fresh attempt on the stream. Every call
    /// allocates a new connection/session/link context; nothing from a prior
    /// attempt is observable here.
    async fn drive<Io>(&mut self, stream: Io, deadline: Instant) -> AttemptOutcome
    where
        Io: AsyncRead + AsyncWrite + Send + Unpin,
    {
        self.attempt += 1;
        debug!(attempt = self.attempt, "starting receive attempt");

        let profile = SaslProfile::Plain {
            username: self.credential.user_name().to_string(),
            password: self.credential.sas_token().to_string(),
        };
        let container_id = format!("{}-{}", LINK_NAME, self.attempt);

        let attempt = match timeout_at(
            deadline,
            ReceiveAttempt::negotiate(
                stream,
                &profile,
                self.credential.host_name(),
                container_id,
            ),
        )
        .await
        {
            Err(_elapsed) => return AttemptOutcome::unopened(),
            Ok(Err(err)) => return AttemptOutcome::failed(err.into()),
            Ok(Ok(attempt)) => attempt,
        };

        attempt.run(deadline, &mut self.handler).await
    }

    /// The health check run before any received payload is trusted: the
    /// connection, session, and link must all have been confirmed open by the
    /// peer and no error may have been recorded. A recorded error is consumed
    /// here and surfaced as the cause.
    fn verify_opened(mut outcome: AttemptOutcome) -> Result<Option<Bytes>, Error> {
        if let Some(cause) = outcome.saved_error.take() {
            return Err(Error::io_with_source(
                "the connection failed before the receive completed",
                cause,
            ));
        }
        if !(outcome.connection_opened_remotely
            && outcome.session_opened_remotely
            && outcome.link_opened_remotely)
        {
            return Err(Error::io(
                "the connection, session, or link was never opened by the remote peer",
            ));
        }
        Ok(outcome.payload)
    }
}

fn tls_error(err: NegotiationError) -> Error {
    match err {
        NegotiationError::Io(err) => Error::Tls(err),
        other => other.into(),
    }
}
