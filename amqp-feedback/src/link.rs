//! Implements the receiving link of a receive attempt, including delivery
//! reassembly, disposition, and settlement

use bytes::{Bytes, BytesMut};
use futures_util::{Sink, SinkExt};
use tracing::{instrument, trace};

use crate::error::Error;
use crate::frames::amqp::{Frame, FrameBody};
use crate::performative::{
    Attach, Detach, Disposition, ErrorInfo, Fields, Flow, Outcome, Role, Source, Target, Transfer,
};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    Unattached,

    AttachSent,

    Attached,

    DetachSent,

    Detached,
}

/// Settlement state of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Unsettled,

    Settled(Outcome),
}

/// One in-flight message transfer, owned by the link that produced it
pub(crate) struct Delivery {
    tag: Bytes,
    delivery_id: u32,
    buffer: BytesMut,
    partial: bool,
    settlement: Settlement,
    disposition_sent: bool,
}

impl Delivery {
    fn new(tag: Bytes, delivery_id: u32) -> Self {
        Self {
            tag,
            delivery_id,
            buffer: BytesMut::new(),
            partial: true,
            settlement: Settlement::Unsettled,
            disposition_sent: false,
        }
    }

    pub(crate) fn tag(&self) -> &Bytes {
        &self.tag
    }

    /// Bytes accumulated so far and not yet drained
    pub(crate) fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Whether more transfer frames for this delivery are outstanding
    pub(crate) fn is_partial(&self) -> bool {
        self.partial
    }

    /// A delivery may be read once all of its frames have arrived
    pub(crate) fn is_readable(&self) -> bool {
        !self.partial
    }

    pub(crate) fn is_settled(&self) -> bool {
        matches!(self.settlement, Settlement::Settled(_))
    }

    /// Settles the delivery with the outcome. Settling twice is a no-op.
    pub(crate) fn settle(&mut self, outcome: Outcome) {
        if let Settlement::Unsettled = self.settlement {
            self.settlement = Settlement::Settled(outcome);
        }
    }
}

pub(crate) struct ReceiverLink {
    name: String,
    output_handle: u32,
    channel: u16,
    address: String,
    properties: Fields,

    state: LinkState,
    remote_opened: bool,
    detach_sent: bool,

    credit: u32,
    delivery_count: u32,
    current: Option<Delivery>,
}

impl ReceiverLink {
    pub(crate) fn new(
        name: String,
        channel: u16,
        address: String,
        properties: Fields,
    ) -> Self {
        Self {
            name,
            output_handle: 0,
            channel,
            address,
            properties,
            state: LinkState::Unattached,
            remote_opened: false,
            detach_sent: false,
            credit: 0,
            delivery_count: 0,
            current: None,
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        self.state
    }

    pub(crate) fn remote_opened(&self) -> bool {
        self.remote_opened
    }

    pub(crate) fn credit(&self) -> u32 {
        self.credit
    }

    pub(crate) fn current(&self) -> Option<&Delivery> {
        self.current.as_ref()
    }

    /// Attaches the link under its session
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_attach<W>(&mut self, writer: &mut W) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        match self.state {
            LinkState::Unattached => {}
            _ => return Err(Error::illegal_state("attach may only be sent once")),
        }
        let attach = Attach {
            name: self.name.clone(),
            handle: self.output_handle,
            role: Role::Receiver,
            snd_settle_mode: None,
            // ReceiverSettleMode::First
            rcv_settle_mode: Some(0),
            source: Some(Source::new(self.address.clone())),
            target: Some(Target::new(self.address.clone())),
            initial_delivery_count: None,
            properties: Some(self.properties.clone()),
        };
        let frame = Frame::new(self.channel, FrameBody::Attach(attach));
        trace!(channel = self.channel, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        self.state = LinkState::AttachSent;
        Ok(())
    }

    /// Reacting to the remote Attach frame
    #[instrument(name = "RECV", skip_all)]
    pub(crate) fn on_incoming_attach(&mut self, channel: u16, attach: Attach) -> Result<(), Error> {
        trace!(channel, frame = ?attach);
        match self.state {
            LinkState::AttachSent => self.state = LinkState::Attached,
            _ => return Err(Error::illegal_state("unexpected attach")),
        }
        if attach.name != self.name {
            return Err(Error::illegal_state("attach does not echo the link name"));
        }
        self.remote_opened = true;
        Ok(())
    }

    /// Grants credit to the peer. The feedback receiver always grants exactly
    /// one so that at most one delivery is ever in flight.
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_flow<W>(
        &mut self,
        writer: &mut W,
        session: &Session,
        credit: u32,
    ) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        match self.state {
            LinkState::Attached => {}
            _ => return Err(Error::illegal_state("flow on a link that is not attached")),
        }
        let flow = Flow {
            next_incoming_id: Some(session.next_incoming_id()),
            incoming_window: session.incoming_window(),
            next_outgoing_id: session.next_outgoing_id(),
            outgoing_window: session.outgoing_window(),
            handle: Some(self.output_handle),
            delivery_count: Some(self.delivery_count),
            link_credit: Some(credit),
        };
        let frame = Frame::new(self.channel, FrameBody::Flow(flow));
        trace!(channel = self.channel, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        self.credit = credit;
        Ok(())
    }

    /// Accumulates one transfer frame, returning `true` once the delivery is
    /// fully framed and readable.
    ///
    /// A partial delivery takes no further action; frames may arrive in
    /// multiple transport reads and reassembly waits for the final one.
    #[instrument(name = "RECV", skip_all)]
    pub(crate) fn on_incoming_transfer(
        &mut self,
        transfer: Transfer,
        payload: Bytes,
    ) -> Result<bool, Error> {
        trace!(frame = ?transfer, payload_len = payload.len());
        match self.state {
            LinkState::Attached | LinkState::DetachSent => {}
            _ => return Err(Error::illegal_state("transfer on a link that is not attached")),
        }
        if transfer.aborted {
            self.current = None;
            return Ok(false);
        }

        match self.current.as_mut() {
            None => {
                let tag = transfer
                    .delivery_tag
                    .ok_or_else(|| Error::illegal_state("first transfer frame without delivery-tag"))?;
                let delivery_id = transfer
                    .delivery_id
                    .ok_or_else(|| Error::illegal_state("first transfer frame without delivery-id"))?;
                self.current = Some(Delivery::new(tag, delivery_id));
            }
            Some(delivery) => {
                // continuation frames may omit the tag but must not change it
                if let Some(tag) = &transfer.delivery_tag {
                    if *tag != delivery.tag {
                        return Err(Error::illegal_state("delivery-tag changed mid-delivery"));
                    }
                }
            }
        }
        let delivery = match self.current.as_mut() {
            Some(delivery) => delivery,
            None => return Err(Error::illegal_state("transfer without a delivery")),
        };
        delivery.buffer.extend_from_slice(&payload);
        delivery.partial = transfer.more;

        if delivery.is_readable() {
            self.delivery_count = self.delivery_count.wrapping_add(1);
            self.credit = self.credit.saturating_sub(1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Reads the pending bytes of the readable delivery out of the link's
    /// receive buffer
    pub(crate) fn drain_current(&mut self) -> Result<Bytes, Error> {
        let delivery = self
            .current
            .as_mut()
            .filter(|delivery| delivery.is_readable())
            .ok_or_else(|| Error::illegal_state("no readable delivery to drain"))?;
        let pending = delivery.pending();
        Ok(delivery.buffer.split_to(pending).freeze())
    }

    /// Informs the peer that the delivery was consumed. Sent at most once per
    /// delivery.
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_disposition<W>(&mut self, writer: &mut W) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        let delivery = match self.current.as_mut() {
            Some(delivery) if !delivery.disposition_sent => delivery,
            _ => return Ok(()),
        };
        let disposition = Disposition {
            role: Role::Receiver,
            first: delivery.delivery_id,
            last: None,
            settled: true,
            state: Some(Outcome::Accepted),
        };
        let frame = Frame::new(self.channel, FrameBody::Disposition(disposition));
        trace!(channel = self.channel, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        delivery.disposition_sent = true;
        Ok(())
    }

    /// Settles the current delivery with `Accepted` and releases it.
    /// Settling when nothing is unsettled is a no-op.
    pub(crate) fn settle_current(&mut self) -> Option<Delivery> {
        let mut delivery = self.current.take()?;
        delivery.settle(Outcome::Accepted);
        debug_assert!(delivery.is_settled());
        Some(delivery)
    }

    /// Detaches the link. A second call is a no-op.
    #[instrument(name = "SEND", skip_all)]
    pub(crate) async fn send_detach<W>(&mut self, writer: &mut W) -> Result<(), Error>
    where
        W: Sink<Frame> + Send + Unpin,
        W::Error: Into<Error>,
    {
        if self.detach_sent || matches!(self.state, LinkState::Unattached) {
            return Ok(());
        }
        let detach = Detach {
            handle: self.output_handle,
            closed: true,
            error: None,
        };
        let frame = Frame::new(self.channel, FrameBody::Detach(detach));
        trace!(channel = self.channel, frame = ?frame.body);
        writer.send(frame).await.map_err(Into::into)?;
        self.detach_sent = true;
        self.state = match self.state {
            LinkState::DetachSent | LinkState::Detached => LinkState::Detached,
            _ => LinkState::DetachSent,
        };
        Ok(())
    }

    /// Reacting to the remote Detach frame, returning the peer's error
    /// condition when one was reported
    #[instrument(name = "RECV", skip_all)]
    pub(crate) fn on_incoming_detach(&mut self, channel: u16, detach: Detach) -> Option<ErrorInfo> {
        trace!(channel, frame = ?detach);
        self.state = if self.detach_sent {
            LinkState::Detached
        } else {
            LinkState::DetachSent
        };
        detach.error
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::StreamExt;

    use crate::frames::amqp::FrameBody;
    use crate::performative::{Attach, Outcome, Role, Transfer};
    use crate::transport::Transport;

    use super::{LinkState, ReceiverLink};

    fn link() -> ReceiverLink {
        ReceiverLink::new(
            "feedback-receiver".to_string(),
            0,
            "/messages/serviceBound/feedback".to_string(),
            vec![(
                "client-version".to_string(),
                crate::codec::Value::String("amqp-feedback/0.1.0".to_string()),
            )],
        )
    }

    fn attached_link() -> ReceiverLink {
        let mut link = link();
        link.state = LinkState::Attached;
        link.remote_opened = true;
        link.credit = 1;
        link
    }

    fn transfer(more: bool) -> Transfer {
        Transfer {
            handle: 0,
            delivery_id: Some(0),
            delivery_tag: Some(Bytes::from_static(b"fb-0")),
            message_format: Some(0),
            settled: Some(false),
            more,
            aborted: false,
        }
    }

    #[tokio::test]
    async fn test_attach_carries_addresses_and_properties() {
        let (client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::bind(client, 512);
        let mut peer = Transport::bind(server, 512);

        let mut link = link();
        link.send_attach(&mut transport).await.unwrap();
        assert_eq!(link.state(), LinkState::AttachSent);

        match peer.next().await.unwrap().unwrap().body {
            FrameBody::Attach(attach) => {
                assert_eq!(attach.name, "feedback-receiver");
                assert_eq!(attach.role, Role::Receiver);
                assert_eq!(
                    attach.source.unwrap().address.as_deref(),
                    Some("/messages/serviceBound/feedback")
                );
                assert_eq!(
                    attach.target.unwrap().address.as_deref(),
                    Some("/messages/serviceBound/feedback")
                );
                let properties = attach.properties.unwrap();
                assert_eq!(properties[0].0, "client-version");
            }
            other => panic!("expected Attach, got {:?}", other),
        }
    }

    #[test]
    fn test_echoed_attach_confirms_remote_open() {
        let mut link = link();
        link.state = LinkState::AttachSent;
        let echo = Attach {
            name: "feedback-receiver".to_string(),
            handle: 0,
            role: Role::Sender,
            snd_settle_mode: None,
            rcv_settle_mode: None,
            source: None,
            target: None,
            initial_delivery_count: Some(0),
            properties: None,
        };
        link.on_incoming_attach(0, echo).unwrap();
        assert!(link.remote_opened());
        assert_eq!(link.state(), LinkState::Attached);
    }

    #[test]
    fn test_complete_transfer_is_readable() {
        let mut link = attached_link();
        let complete = link
            .on_incoming_transfer(transfer(false), Bytes::from_static(b"payload"))
            .unwrap();
        assert!(complete);

        let delivery = link.current().unwrap();
        assert!(delivery.is_readable());
        assert!(!delivery.is_partial());
        assert_eq!(delivery.pending(), 7);
        assert_eq!(link.credit(), 0);

        let drained = link.drain_current().unwrap();
        assert_eq!(&drained[..], b"payload");
    }

    #[test]
    fn test_partial_transfer_defers() {
        let mut link = attached_link();
        let complete = link
            .on_incoming_transfer(transfer(true), Bytes::from_static(b"pay"))
            .unwrap();
        assert!(!complete);
        assert!(link.current().unwrap().is_partial());
        // no credit is consumed until the delivery completes
        assert_eq!(link.credit(), 1);
        assert!(link.drain_current().is_err());

        // continuation without a delivery-tag
        let continuation = Transfer {
            delivery_tag: None,
            delivery_id: None,
            ..transfer(false)
        };
        let complete = link
            .on_incoming_transfer(continuation, Bytes::from_static(b"load"))
            .unwrap();
        assert!(complete);
        assert_eq!(&link.drain_current().unwrap()[..], b"payload");
    }

    #[test]
    fn test_aborted_transfer_discards_delivery() {
        let mut link = attached_link();
        link.on_incoming_transfer(transfer(true), Bytes::from_static(b"pay"))
            .unwrap();
        let aborted = Transfer {
            aborted: true,
            ..transfer(false)
        };
        let complete = link
            .on_incoming_transfer(aborted, Bytes::new())
            .unwrap();
        assert!(!complete);
        assert!(link.current().is_none());
    }

    #[test]
    fn test_settle_is_idempotent() {
        let mut link = attached_link();
        link.on_incoming_transfer(transfer(false), Bytes::from_static(b"[]"))
            .unwrap();

        let mut delivery = link.settle_current().unwrap();
        assert!(delivery.is_settled());
        // settling again must be a no-op
        delivery.settle(Outcome::Accepted);
        assert!(delivery.is_settled());
        assert!(link.settle_current().is_none());
    }

    #[tokio::test]
    async fn test_disposition_sent_exactly_once() {
        let (client, server) = tokio::io::duplex(1024);
        let mut transport = Transport::bind(client, 512);
        let mut peer = Transport::bind(server, 512);

        let mut link = attached_link();
        link.on_incoming_transfer(transfer(false), Bytes::from_static(b"[]"))
            .unwrap();

        link.send_disposition(&mut transport).await.unwrap();
        link.send_disposition(&mut transport).await.unwrap();
        drop(transport);

        let mut dispositions = 0;
        while let Some(frame) = peer.next().await {
            match frame.unwrap().body {
                FrameBody::Disposition(disposition) => {
                    assert_eq!(disposition.first, 0);
                    assert!(disposition.settled);
                    assert_eq!(disposition.state, Some(Outcome::Accepted));
                    dispositions += 1;
                }
                other => panic!("expected Disposition, got {:?}", other),
            }
        }
        assert_eq!(dispositions, 1);
    }
}
