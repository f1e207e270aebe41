//! Implements the session endpoint of a receive attempt

use futures_util::{Sink, SinkExt};
use tracing::{instrument, trace};

use crate::constants::DEFAULT_WINDOW;
use crate::error::Error;
use crate::frames::amqp::{Frame, FrameBody};
use crate::performative::{Begin, End, ErrorInfo, Flow};

// 2.5.5 Session States
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Unmapped,

    BeginSent,

    Mapped,

    EndSent,

    Ended,
}

pub(crate) struct Session {
    local_state: SessionState,
    outgoing_channel: u16,
    incoming_channel: Option<u16>,

    next_outgoing_id: u32,
    incoming_window: u32,
    outgoing_window: u32,

    // initialized from the remote Begin
    next_incoming_id: u32,
    remote_incoming_window: u32,
    remote_outgoing_window: u32,

    remote_opened: bool,
    end_sent: bool,
}

impl Session {
    pub(crate) fn new(outgoing_channel: u16) -> Self {
        Self {
            local_state: SessionState::Unmapped,
            outgoing_channel,
            incoming_channel: None,
            next_outgoing_id: 0,
            incoming_window: DEFAULT_WINDOW,
            outgoing_window: DEFAULT_WINDOW,
            next_incoming_id: 0,
            remote_incoming_window: 0,
            remote_outgoing_window: 0,
            remote_opened: false,
            end_sent: false,
        }
    }

    pub(crate) fn local_state(&self) -> SessionState {
        self.local_state
    }

    pub(crate) fn remote_opened(&self) -> bool {
        self.remote_opened
    }

    pub(crate) fn outgoing_channel(&self) -> u16 {
        self.outgoing_channel
    }

    pub(crate) fn next_incoming_id(&self) -> u32 {
        self.next_incoming_id
    }

    pub(crate) fn incoming_window(&self) -> u32 {
        self.incoming_window
    }

    pub(crate) fn next_outgoing_id(&self) -> u32 {
        self.next_outgoing_id
    }

    pub(crate) fn outgoing_window(&self) -> u32 {
        self.outgoing_window
    }

    /// Begins the session
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_begin<W>(&mut self, writer: &mut W) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        match self.local_state {
            SessionState::Unmapped => {}
            _ => return Err(Error::illegal_state("begin may only be sent once")),
        }
        let begin = Begin {
            remote_channel: None,
            next_outgoing_id: self.next_outgoing_id,
            incoming_window: self.incoming_window,
            outgoing_window: self.outgoing_window,
            handle_max: u32::MAX,
        };
        let frame = Frame::new(self.outgoing_channel, FrameBody::Begin(begin));
        trace!(channel = self.outgoing_channel, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        self.local_state = SessionState::BeginSent;
        Ok(())
    }

    /// Reacting to the remote Begin frame
    #[instrument(name = "RECV", skip_all)]
    pub(crate) fn on_incoming_begin(&mut self, channel: u16, begin: Begin) -> Result<(), Error> {
        trace!(channel, frame = ?begin);
        match self.local_state {
            SessionState::BeginSent => self.local_state = SessionState::Mapped,
            _ => return Err(Error::illegal_state("unexpected begin")),
        }
        self.incoming_channel = Some(channel);
        self.next_incoming_id = begin.next_outgoing_id;
        self.remote_incoming_window = begin.incoming_window;
        self.remote_outgoing_window = begin.outgoing_window;
        self.remote_opened = true;
        Ok(())
    }

    /// Whether the session is mapped onto this incoming channel
    pub(crate) fn accepts_channel(&self, channel: u16) -> bool {
        self.incoming_channel == Some(channel)
    }

    /// Window bookkeeping for an incoming flow frame
    pub(crate) fn on_incoming_flow(&mut self, flow: &Flow) {
        self.next_incoming_id = flow.next_outgoing_id;
        self.remote_incoming_window = flow.incoming_window;
        self.remote_outgoing_window = flow.outgoing_window;
    }

    /// Window bookkeeping for one incoming transfer frame
    pub(crate) fn on_incoming_transfer(&mut self) {
        self.next_incoming_id = self.next_incoming_id.wrapping_add(1);
        self.incoming_window = self.incoming_window.saturating_sub(1);
    }

    /// Ends the session. A second call is a no-op.
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_end<W>(&mut self, writer: &mut W) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        if self.end_sent || matches!(self.local_state, SessionState::Unmapped) {
            return Ok(());
        }
        let frame = Frame::new(self.outgoing_channel, FrameBody::End(End::default()));
        trace!(channel = self.outgoing_channel, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        self.end_sent = true;
        self.local_state = match self.local_state {
            SessionState::EndSent | SessionState::Ended => SessionState::Ended,
            _ => SessionState::EndSent,
        };
        Ok(())
    }

    /// Reacting to the remote End frame, returning the peer's error condition
    /// when one was reported
    #[instrument(name = "RECV", skip_all)]
    pub(crate) fn on_incoming_end(&mut self, channel: u16, end: End) -> Option<ErrorInfo> {
        trace!(channel, frame = ?end);
        self.local_state = if self.end_sent {
            SessionState::Ended
        } else {
            SessionState::EndSent
        };
        end.error
    }
}
