use std::io;

use http::Response;
use tungstenite::{
    error::{CapacityError, ProtocolError, UrlError},
    Message,
};

/// The HTTP response returned by a failed WebSocket handshake
pub type HttpResponse = Response<Option<Vec<u8>>>;

/// Error with the websocket binding
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `tungstenite::Error::ConnectionClosed` error
    #[error("Connection closed normally")]
    ConnectionClosed,

    /// A `tungstenite::Error::AlreadyClosed` error
    #[error("Trying to work with closed connection")]
    AlreadyClosed,

    /// A `tungstenite::Error::Io` error
    #[error("IO error: {0}")]
    Io(io::Error),

    /// A `tungstenite::Error::Capacity` error
    #[error("Space limit exceeded: {0}")]
    Capacity(CapacityError),

    /// A `tungstenite::Error::Protocol` error
    #[error("WebSocket protocol error: {0}")]
    Protocol(ProtocolError),

    /// A `tungstenite::Error::WriteBufferFull` error
    #[error("Send queue is full")]
    WriteBufferFull(Box<Message>),

    /// A `tungstenite::Error::Utf8` error
    #[error("UTF-8 encoding error")]
    Utf8,

    /// A `tungstenite::Error::Url` error
    #[error("URL error: {0}")]
    Url(UrlError),

    /// A `tungstenite::Error::Http` error
    #[error("HTTP error: {}", .0.status())]
    Http(Box<HttpResponse>),

    /// A `tungstenite::Error::HttpFormat` error
    #[error("HTTP format error: {0}")]
    HttpFormat(http::Error),

    /// Any other `tungstenite::Error`
    #[error("{0}")]
    Other(String),
}

impl From<tungstenite::Error> for Error {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed => Self::ConnectionClosed,
            tungstenite::Error::AlreadyClosed => Self::AlreadyClosed,
            tungstenite::Error::Io(err) => Self::Io(err),
            tungstenite::Error::Capacity(err) => Self::Capacity(err),
            tungstenite::Error::Protocol(err) => Self::Protocol(err),
            tungstenite::Error::WriteBufferFull(msg) => Self::WriteBufferFull(Box::new(msg)),
            tungstenite::Error::Utf8 => Self::Utf8,
            tungstenite::Error::Url(err) => Self::Url(err),
            tungstenite::Error::Http(response) => Self::Http(Box::new(response)),
            tungstenite::Error::HttpFormat(err) => Self::HttpFormat(err),
            other => Self::Other(other.to_string()),
        }
    }
}
