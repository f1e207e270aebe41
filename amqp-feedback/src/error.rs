//! Errors surfaced by the feedback receiver

use std::io;

use bytes::Bytes;

use crate::performative::ErrorInfo;
use crate::transport::NegotiationError;
use crate::{codec, frames};

/// Errors surfaced by [`FeedbackReceiver`](crate::FeedbackReceiver)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket-level connection failure
    #[error("socket connection failed")]
    Connect(#[source] io::Error),

    /// TLS handshake or certificate verification failure
    #[error("TLS negotiation failed")]
    Tls(#[source] io::Error),

    /// The SASL exchange ended with a rejection
    #[error("SASL authentication was rejected (code {code})")]
    Auth {
        /// SASL outcome code reported by the peer
        code: u8,

        /// Additional data attached to the outcome
        additional_data: Option<Bytes>,
    },

    /// An AMQP error condition, reported by the peer or raised locally
    #[error("AMQP error condition: {0}")]
    Protocol(ErrorInfo),

    /// The engine is not opened, or the connection, session, and link were
    /// not all confirmed open when a result was requested
    #[error("{msg}")]
    Io {
        /// What went wrong
        msg: String,

        /// The underlying failure, when one was recorded
        #[source]
        source: Option<Box<Error>>,
    },
}

impl Error {
    pub(crate) fn io(msg: impl Into<String>) -> Self {
        Error::Io {
            msg: msg.into(),
            source: None,
        }
    }

    pub(crate) fn io_with_source(msg: impl Into<String>, source: Error) -> Self {
        Error::Io {
            msg: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn illegal_state(description: impl Into<String>) -> Self {
        Error::Protocol(ErrorInfo::new(
            "amqp:illegal-state",
            Some(description.into()),
        ))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Error::Protocol(ErrorInfo::new("amqp:decode-error", Some(err.to_string())))
    }
}

impl From<frames::Error> for Error {
    fn from(err: frames::Error) -> Self {
        match err {
            frames::Error::Io(err) => Error::Connect(err),
            frames::Error::Decode(err) => err.into(),
            frames::Error::Encode(err) => {
                Error::Protocol(ErrorInfo::new("amqp:internal-error", Some(err.to_string())))
            }
            frames::Error::NotImplemented => {
                Error::Protocol(ErrorInfo::new("amqp:not-implemented", None))
            }
        }
    }
}

impl From<NegotiationError> for Error {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::Io(err) => Error::Connect(err),
            NegotiationError::ProtocolHeaderMismatch(buf) => Error::Protocol(ErrorInfo::new(
                "amqp:not-implemented",
                Some(format!("protocol header mismatch: {:?}", buf)),
            )),
            NegotiationError::InvalidDomain => Error::Tls(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid TLS domain",
            )),
            NegotiationError::SaslError {
                code,
                additional_data,
            } => Error::Auth {
                code,
                additional_data,
            },
            NegotiationError::Decode(err) => err.into(),
            NegotiationError::NotImplemented(description) => {
                Error::Protocol(ErrorInfo::new("amqp:not-implemented", description))
            }
        }
    }
}
