//! Implements the connection endpoint of a receive attempt

use futures_util::{Sink, SinkExt};
use tracing::{instrument, trace};

use crate::constants::{DEFAULT_CHANNEL_MAX, DEFAULT_MAX_FRAME_SIZE};
use crate::error::Error;
use crate::frames::amqp::{Frame, FrameBody};
use crate::performative::{Close, ErrorInfo, Open};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// No transport attached
    Uninitialized,

    /// Transport attached, nothing exchanged
    Bound,

    /// Local open sent
    LocalOpen,

    /// Local and remote open exchanged
    RemoteOpen,

    /// Local close sent, or remote close received and not yet answered
    Closing,

    /// Closed on both ends or transport torn down
    Closed,
}

pub(crate) struct Connection {
    local_state: ConnectionState,
    local_open: Open,

    // Sticky once the peer confirms the open; survives the close handshake so
    // the orchestrator can verify the attempt after the fact.
    remote_opened: bool,
    remote_open: Option<Open>,

    close_sent: bool,
}

impl Connection {
    pub(crate) fn new(container_id: String, hostname: String) -> Self {
        let local_open = Open {
            container_id,
            hostname: Some(hostname),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: DEFAULT_CHANNEL_MAX,
            idle_time_out: None,
        };
        Self {
            local_state: ConnectionState::Uninitialized,
            local_open,
            remote_opened: false,
            remote_open: None,
            close_sent: false,
        }
    }

    /// Marks the transport as attached
    pub(crate) fn bind(&mut self) {
        self.local_state = ConnectionState::Bound;
    }

    pub(crate) fn local_state(&self) -> ConnectionState {
        self.local_state
    }

    pub(crate) fn remote_opened(&self) -> bool {
        self.remote_opened
    }

    pub(crate) fn close_sent(&self) -> bool {
        self.close_sent
    }

    pub(crate) fn local_max_frame_size(&self) -> u32 {
        self.local_open.max_frame_size
    }

    /// Issues the local open
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_open<W>(&mut self, writer: &mut W) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        match self.local_state {
            ConnectionState::Bound => {}
            _ => return Err(Error::illegal_state("open may only be sent on a bound connection")),
        }
        let frame = Frame::new(0u16, FrameBody::Open(self.local_open.clone()));
        trace!(channel = 0, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        self.local_state = ConnectionState::LocalOpen;
        Ok(())
    }

    /// Reacting to the remote Open frame
    #[instrument(name = "RECV", skip_all)]
    pub(crate) fn on_incoming_open(&mut self, channel: u16, open: Open) -> Result<(), Error> {
        trace!(channel, frame = ?open);
        match self.local_state {
            ConnectionState::LocalOpen => self.local_state = ConnectionState::RemoteOpen,
            _ => return Err(Error::illegal_state("unexpected open")),
        }
        self.remote_opened = true;
        self.remote_open = Some(open);
        Ok(())
    }

    pub(crate) fn remote_max_frame_size(&self) -> Option<u32> {
        self.remote_open.as_ref().map(|open| open.max_frame_size)
    }

    /// Issues the local close. A second call is a no-op so that cleanup can
    /// run on every exit path.
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_close<W>(
        &mut self,
        writer: &mut W,
        error: Option<ErrorInfo>,
    ) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        if self.close_sent || self.local_state == ConnectionState::Uninitialized {
            return Ok(());
        }
        let frame = Frame::new(0u16, FrameBody::Close(Close { error }));
        trace!(channel = 0, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        self.close_sent = true;
        self.local_state = match self.local_state {
            ConnectionState::Closing => ConnectionState::Closed,
            _ => ConnectionState::Closing,
        };
        Ok(())
    }

    /// Reacting to the remote Close frame, returning the peer's error
    /// condition when one was reported
    #[instrument(name = "RECV", skip_all)]
    pub(crate) fn on_incoming_close(&mut self, channel: u16, close: Close) -> Option<ErrorInfo> {
        trace!(channel, frame = ?close);
        self.local_state = if self.close_sent {
            ConnectionState::Closed
        } else {
            ConnectionState::Closing
        };
        close.error
    }

    /// The byte stream ended, with or without a clean close handshake
    pub(crate) fn on_transport_closed(&mut self) {
        self.local_state = ConnectionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};

    use crate::frames::amqp::FrameBody;
    use crate::performative::{Close, ErrorInfo, Open};
    use crate::transport::Transport;

    use super::{Connection, ConnectionState};

    fn remote_open() -> Open {
        Open {
            container_id: "peer".to_string(),
            hostname: None,
            max_frame_size: 512,
            channel_max: 0,
            idle_time_out: None,
        }
    }

    #[tokio::test]
    async fn test_open_handshake_states() {
        let (client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::bind(client, 512);
        let mut peer = Transport::bind(server, 512);

        let mut connection = Connection::new("c-1".to_string(), "aaa".to_string());
        assert_eq!(connection.local_state(), ConnectionState::Uninitialized);
        connection.bind();
        assert_eq!(connection.local_state(), ConnectionState::Bound);

        connection.send_open(&mut transport).await.unwrap();
        assert_eq!(connection.local_state(), ConnectionState::LocalOpen);
        assert!(!connection.remote_opened());

        match peer.next().await.unwrap().unwrap().body {
            FrameBody::Open(open) => {
                assert_eq!(open.container_id, "c-1");
                assert_eq!(open.hostname.as_deref(), Some("aaa"));
            }
            other => panic!("expected Open, got {:?}", other),
        }

        connection.on_incoming_open(0, remote_open()).unwrap();
        assert_eq!(connection.local_state(), ConnectionState::RemoteOpen);
        assert!(connection.remote_opened());
        assert_eq!(connection.remote_max_frame_size(), Some(512));
        drop(peer);
    }

    #[tokio::test]
    async fn test_open_before_bind_is_illegal() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport = Transport::bind(client, 512);
        let mut connection = Connection::new("c-1".to_string(), "aaa".to_string());
        assert!(connection.send_open(&mut transport).await.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::bind(client, 512);
        let mut peer = Transport::bind(server, 512);

        let mut connection = Connection::new("c-1".to_string(), "aaa".to_string());
        connection.bind();
        connection.send_open(&mut transport).await.unwrap();
        connection.on_incoming_open(0, remote_open()).unwrap();

        connection.send_close(&mut transport, None).await.unwrap();
        connection.send_close(&mut transport, None).await.unwrap();
        assert_eq!(connection.local_state(), ConnectionState::Closing);
        drop(transport);

        let mut frames = 0;
        peer.next().await.unwrap().unwrap(); // open
        while let Some(frame) = peer.next().await {
            assert!(matches!(frame.unwrap().body, FrameBody::Close(_)));
            frames += 1;
        }
        assert_eq!(frames, 1);
    }

    #[test]
    fn test_remote_open_flag_survives_close() {
        let mut connection = Connection::new("c-1".to_string(), "aaa".to_string());
        connection.bind();
        connection.local_state = ConnectionState::LocalOpen;
        connection.on_incoming_open(0, remote_open()).unwrap();

        let error = connection.on_incoming_close(
            0,
            Close {
                error: Some(ErrorInfo::new("amqp:connection:forced", None)),
            },
        );
        assert_eq!(error.unwrap().condition, "amqp:connection:forced");
        assert!(connection.remote_opened());
    }
}
