//! Errors from transport establishment and negotiation

use std::io;

use bytes::Bytes;

use crate::{codec, frames};

/// Errors from protocol header, TLS, or SASL negotiation
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// IO error
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// Protocol negotiation failed due to protocol header mismatch
    #[error("Protocol header mismatch. Found {0:?}")]
    ProtocolHeaderMismatch([u8; 8]),

    /// Domain is invalid or not found
    #[error("Invalid domain")]
    InvalidDomain,

    /// SASL negotiation failed
    #[error("SASL error code {:?}, additional data: {:?}", .code, .additional_data)]
    SaslError {
        /// SASL outcome code
        code: u8,
        /// Additional information for the failed negotiation
        additional_data: Option<Bytes>,
    },

    /// Decode error
    #[error(transparent)]
    Decode(#[from] codec::DecodeError),

    /// The peer requires something this client does not implement
    #[error("Not implemented: {0:?}")]
    NotImplemented(Option<String>),
}

impl From<frames::Error> for NegotiationError {
    fn from(err: frames::Error) -> Self {
        match err {
            frames::Error::Io(err) => Self::Io(err),
            frames::Error::Decode(err) => Self::Decode(err),
            frames::Error::Encode(_) => {
                Self::NotImplemented(Some("value has no encoding".to_string()))
            }
            frames::Error::NotImplemented => Self::NotImplemented(None),
        }
    }
}
