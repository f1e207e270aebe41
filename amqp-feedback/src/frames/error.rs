use std::io;

use crate::codec;

/// Errors from encoding or decoding a frame
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// Decode error
    #[error(transparent)]
    Decode(#[from] codec::DecodeError),

    /// Encode error
    #[error(transparent)]
    Encode(#[from] codec::EncodeError),

    /// Frame type, extended header, or body is not supported
    #[error("AmqpError: NotImplemented")]
    NotImplemented,
}
