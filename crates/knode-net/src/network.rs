//! Glues the codec, dispatcher, and channel together.

use knode_id::{Endpoint, Id160};
use knode_wire::{Header, MessageBody, MessageType};
use tokio::time::Duration;

use crate::channel::Channel;
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::NetError;

/// Whether an inbound message is routed back into the dispatcher or handed
/// to the engine as a fresh request.
fn is_response(message_type: MessageType) -> bool {
    matches!(
        message_type,
        MessageType::PingResp | MessageType::FindNodeResp | MessageType::FindValueResp
    )
}

/// The network layer for one local node identity.
///
/// Owns the UDP channel and the response dispatcher; all mutation happens
/// from the single event loop driven by [`Network::run`], so neither needs
/// internal locking.
pub struct Network {
    local_id: Id160,
    channel: Channel,
    dispatcher: Dispatcher,
}

impl Network {
    /// Construct a network layer bound to `channel`, identified as `local_id`.
    pub fn new(local_id: Id160, channel: Channel) -> Self {
        Self {
            local_id,
            channel,
            dispatcher: Dispatcher::new(),
        }
    }

    /// The endpoint this network's channel is bound to.
    pub fn local_addr(&self) -> Endpoint {
        self.channel.local_addr()
    }

    /// Send a request to `destination`, invoking `on_response` or `on_error`
    /// once a reply arrives or `timeout` elapses, whichever is first.
    ///
    /// If the send itself fails, no dispatcher entry is created and
    /// `on_error` is invoked immediately with [`DispatchError::SendFailure`].
    pub async fn send_request_with_reply(
        &mut self,
        body: MessageBody,
        destination: Endpoint,
        timeout: Duration,
        on_response: impl FnOnce(MessageBody) + 'static,
        on_error: impl FnOnce(DispatchError) + 'static,
    ) {
        let token = Id160::random();
        let header = Header::new(body.message_type(), self.local_id, token);
        let bytes = knode_wire::encode(&header, &body);

        match self.channel.send(&bytes, destination).await {
            Ok(()) => self.dispatcher.register(token, timeout, on_response, on_error),
            Err(e) => on_error(DispatchError::SendFailure(e.to_string())),
        }
    }

    /// Send a request and forget it; any send failure is logged, not
    /// surfaced to the caller.
    pub async fn send_request_no_reply(&mut self, body: MessageBody, destination: Endpoint) {
        let token = Id160::random();
        let header = Header::new(body.message_type(), self.local_id, token);
        let bytes = knode_wire::encode(&header, &body);

        if let Err(e) = self.channel.send(&bytes, destination).await {
            tracing::warn!(error = %e, %destination, "send_request_no_reply failed");
        }
    }

    /// Send a response, echoing `token` in the header.
    pub async fn send_response(
        &mut self,
        token: Id160,
        body: MessageBody,
        destination: Endpoint,
    ) -> Result<(), NetError> {
        let header = Header::new(body.message_type(), self.local_id, token);
        let bytes = knode_wire::encode(&header, &body);
        self.channel.send(&bytes, destination).await
    }

    /// Receive and process exactly one inbound datagram.
    ///
    /// Decodes the header; responses are routed into the dispatcher, and
    /// everything else is handed to `on_message` as a fresh request.
    pub async fn process_one(
        &mut self,
        on_message: impl FnOnce(Endpoint, Header, MessageBody),
    ) -> Result<(), NetError> {
        let (sender, bytes) = self.channel.receive().await?;
        match knode_wire::decode(&bytes) {
            Ok((header, body)) => {
                if is_response(header.message_type) {
                    self.dispatcher.deliver(header.token, body);
                } else {
                    on_message(sender, header, body);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, %sender, "dropping malformed datagram");
            }
        }
        Ok(())
    }

    /// Run the dispatcher's timeout sweep once, firing `on_error` for any
    /// entries whose deadline has passed.
    pub fn expire_due_requests(&mut self) {
        self.dispatcher.expire_due();
    }

    /// The earliest outstanding dispatcher deadline, if any.
    pub fn next_dispatcher_deadline(&self) -> Option<tokio::time::Instant> {
        self.dispatcher.next_deadline()
    }

    /// Sleep until the earliest outstanding dispatcher deadline.
    pub async fn wait_next_timeout(&self) {
        self.dispatcher.wait_next().await
    }

    /// Race one inbound datagram against the dispatcher's next timeout,
    /// whichever comes first, and handle it.
    ///
    /// `on_peer_seen` fires for every decoded datagram, response or not —
    /// the engine uses it to refresh the sender in the routing table.
    /// `on_request` fires only for non-response message types; responses are
    /// routed straight into the dispatcher and never reach it.
    ///
    /// This is the single suspension point an engine's event loop needs:
    /// channel and dispatcher are distinct fields, so racing them here (via
    /// a destructuring borrow) never double-borrows `self`.
    pub async fn tick(
        &mut self,
        on_peer_seen: impl FnOnce(Endpoint, Id160),
        on_request: impl FnOnce(Endpoint, Header, MessageBody),
    ) -> Result<TickOutcome, NetError> {
        let Network {
            channel,
            dispatcher,
            ..
        } = self;
        tokio::select! {
            _ = dispatcher.wait_next() => {
                dispatcher.expire_due();
                Ok(TickOutcome::TimersExpired)
            }
            received = channel.receive() => {
                let (sender, bytes) = received?;
                match knode_wire::decode(&bytes) {
                    Ok((header, body)) => {
                        on_peer_seen(sender, header.sender);
                        if is_response(header.message_type) {
                            dispatcher.deliver(header.token, body);
                            Ok(TickOutcome::ResponseDelivered)
                        } else {
                            on_request(sender, header, body);
                            Ok(TickOutcome::Request)
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, %sender, "dropping malformed datagram");
                        Ok(TickOutcome::MalformedDropped)
                    }
                }
            }
        }
    }
}

/// What happened during one [`Network::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A fresh request was handed to the caller's `on_message`.
    Request,
    /// A response was routed straight into the dispatcher.
    ResponseDelivered,
    /// A datagram failed to decode and was dropped.
    MalformedDropped,
    /// No datagram arrived; one or more dispatcher entries timed out.
    TimersExpired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    async fn pair() -> (Network, Network) {
        let a = Channel::ipv4("127.0.0.1", 0).await.expect("bind a");
        let b = Channel::ipv4("127.0.0.1", 0).await.expect("bind b");
        (
            Network::new(Id160::random(), a),
            Network::new(Id160::random(), b),
        )
    }

    #[tokio::test]
    async fn ping_round_trip_delivers_response() {
        let (mut a, mut b) = pair().await;
        let b_addr = b.local_addr();
        let a_addr = a.local_addr();

        let got_response = Rc::new(RefCell::new(false));
        let got_response2 = got_response.clone();
        a.send_request_with_reply(
            MessageBody::PingReq,
            b_addr,
            Duration::from_secs(2),
            move |_| *got_response2.borrow_mut() = true,
            |_| panic!("must not time out"),
        )
        .await;

        // b receives the PingReq as a fresh request; capture enough to reply.
        let request = Rc::new(RefCell::new(None));
        let request2 = request.clone();
        b.process_one(move |from, header, _body| {
            assert_eq!(from, a_addr);
            *request2.borrow_mut() = Some((from, header.token));
        })
        .await
        .expect("process_one on b");

        let (from, token) = request.borrow_mut().take().expect("request captured");
        b.send_response(token, MessageBody::PingResp, from)
            .await
            .expect("send_response");

        // a receives the PingResp, which process_one routes straight into
        // the dispatcher rather than to on_message.
        a.process_one(|_, _, _| panic!("a's PingResp must be routed to the dispatcher"))
            .await
            .expect("process_one on a");

        assert!(*got_response.borrow());
    }

    #[tokio::test]
    async fn tick_reports_peer_seen_for_every_datagram_including_responses() {
        let (mut a, mut b) = pair().await;
        let b_addr = b.local_addr();

        let got_response = Rc::new(RefCell::new(false));
        let got_response2 = got_response.clone();
        a.send_request_with_reply(
            MessageBody::PingReq,
            b_addr,
            Duration::from_secs(2),
            move |_| *got_response2.borrow_mut() = true,
            |_| panic!("must not time out"),
        )
        .await;

        let sender_seen = Rc::new(RefCell::new(None));
        let sender_seen2 = sender_seen.clone();
        let outcome = b
            .tick(
                move |_, sender_id| *sender_seen2.borrow_mut() = Some(sender_id),
                |from, header, _body| {
                    // b answers inline for the test; a real engine would defer
                    // this through its pending-action queue instead.
                    let _ = (from, header);
                },
            )
            .await
            .expect("tick on b");
        assert_eq!(outcome, TickOutcome::Request);
        assert!(sender_seen.borrow().is_some());

        let request = Rc::new(RefCell::new(None));
        let request2 = request.clone();
        b.process_one(move |from, header, _body| {
            *request2.borrow_mut() = Some((from, header.token));
        })
        .await
        .expect("process_one on b");
        let (from, token) = request.borrow_mut().take().expect("request captured");
        b.send_response(token, MessageBody::PingResp, from)
            .await
            .expect("send_response");

        let peer_seen_on_a = Rc::new(RefCell::new(false));
        let peer_seen_on_a2 = peer_seen_on_a.clone();
        let outcome = a
            .tick(
                move |_, _| *peer_seen_on_a2.borrow_mut() = true,
                |_, _, _| panic!("a's PingResp must be routed to the dispatcher, not on_request"),
            )
            .await
            .expect("tick on a");
        assert_eq!(outcome, TickOutcome::ResponseDelivered);
        assert!(*peer_seen_on_a.borrow());
        assert!(*got_response.borrow());
    }

    #[tokio::test]
    async fn tick_reports_timers_expired_when_nothing_arrives() {
        let mut a = Network::new(Id160::random(), Channel::ipv4("127.0.0.1", 0).await.unwrap());
        let unreachable = Endpoint::from(std::net::SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
            1,
        ));
        a.send_request_with_reply(
            MessageBody::PingReq,
            unreachable,
            Duration::from_millis(1),
            |_| panic!("must not respond"),
            |_| {},
        )
        .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = a
            .tick(|_, _| {}, |_, _, _| panic!("nothing should arrive"))
            .await
            .expect("tick on a");
        assert_eq!(outcome, TickOutcome::TimersExpired);
    }

    #[tokio::test]
    async fn no_reply_send_does_not_panic_on_unreachable_destination() {
        let mut a = Network::new(Id160::random(), Channel::ipv4("127.0.0.1", 0).await.unwrap());
        let unreachable = Endpoint::from(std::net::SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
            1,
        ));
        a.send_request_no_reply(MessageBody::PingReq, unreachable).await;
    }
}
