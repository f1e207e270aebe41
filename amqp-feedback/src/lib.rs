//! A minimal AMQP 1.0 client for one-shot service feedback receive.
//!
//! The crate implements just enough of the AMQP 1.0 client side to connect
//! over TLS (optionally wrapped in the WebSocket binding), authenticate with
//! SASL PLAIN, open a connection, a session, and a single receiving link,
//! take exactly one delivery, settle it `Accepted`, and close cleanly.
//!
//! # Receive one feedback payload
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use amqp_feedback::{Credential, FeedbackReceiver, ServiceProtocol};
//!
//! let mut receiver = FeedbackReceiver::new(
//!     Credential::new("contoso.example.com", "service", sas_token),
//!     ServiceProtocol::Amqps,
//! );
//! receiver.open();
//!
//! match receiver.recv(Duration::from_secs(30)).await? {
//!     Some(payload) => parse_feedback(&payload),
//!     None => {} // nothing pending, not an error
//! }
//! ```
//!
//! # Order of negotiation
//!
//! 1. TLS (with peer certificate verification, always)
//! 2. SASL PLAIN
//! 3. AMQP
//!
//! Every `recv` call dials a fresh connection and allocates a fresh
//! session/link context; nothing is shared between calls, so concurrent
//! receivers never contend on transport state.

// Public mods
pub mod codec;
pub mod error;
pub mod frames;
pub mod messaging;
pub mod performative;
pub mod sasl_profile;
pub mod transport;

// Private mods
mod connection;
mod constants;
mod engine;
mod link;
mod receiver;
mod session;
mod util;

pub use error::Error;
pub use receiver::{Builder, Credential, FeedbackHandler, FeedbackReceiver, ServiceProtocol};

/// Type alias for the raw payload of a delivery
pub type Payload = bytes::Bytes;
