//! Constants used by the feedback receiver

use std::time::Duration;

/// Default port for AMQP over TLS
pub(crate) const AMQPS_PORT: u16 = 5671;

/// WebSocket connections always dial 443, regardless of the AMQP port
pub(crate) const WEBSOCKET_PORT: u16 = 443;

/// Resource path of the WebSocket binding
pub(crate) const WEBSOCKET_PATH: &str = "/$iothub/websocket";

/// Address of the service-bound feedback endpoint
pub(crate) const FEEDBACK_ADDRESS: &str = "/messages/serviceBound/feedback";

/// Name of the receiving link, unique within its session
pub(crate) const LINK_NAME: &str = "feedback-receiver";

/// Attach property key carrying the client version identifier
pub(crate) const CLIENT_VERSION_KEY: &str = "client-version";

/// Client version identifier sent in the attach properties
pub(crate) const CLIENT_VERSION: &str = concat!("amqp-feedback/", env!("CARGO_PKG_VERSION"));

/// Prior to any explicit negotiation, the maximum frame size is 512
/// (MIN-MAX-FRAME-SIZE)
pub(crate) const MIN_MAX_FRAME_SIZE: usize = 512;

/// Default max-frame-size
pub(crate) const DEFAULT_MAX_FRAME_SIZE: u32 = 256 * 1024;

/// Default channel-max
pub(crate) const DEFAULT_CHANNEL_MAX: u16 = 255;

/// Default session transfer window
pub(crate) const DEFAULT_WINDOW: u32 = 2048;

/// How long the close handshake may keep draining frames once the receive
/// deadline has already passed
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(5);
