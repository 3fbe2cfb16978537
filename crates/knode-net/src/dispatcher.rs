//! Token-keyed request/response correlation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use knode_id::Id160;
use knode_wire::MessageBody;
use tokio::time::{Duration, Instant};

/// Why a registered request's `on_error` handler was invoked.
#[derive(Debug)]
pub enum DispatchError {
    /// No response arrived before the registered deadline.
    Timeout,
    /// The outbound send itself failed; no entry was ever registered.
    SendFailure(String),
}

struct PendingResponse {
    on_response: Box<dyn FnOnce(MessageBody)>,
    on_error: Box<dyn FnOnce(DispatchError)>,
    deadline: Instant,
}

/// Maps correlation tokens to their waiting handlers.
///
/// Exactly one of a registered entry's `on_response` / `on_error` is ever
/// invoked, and the entry is removed on first invocation, whichever comes
/// first. A token is expected to be unique per outstanding request (callers
/// draw it by uniformly random 160-bit sampling, e.g. [`Id160::random`]).
#[derive(Default)]
pub struct Dispatcher {
    pending: HashMap<Id160, PendingResponse>,
    deadlines: BinaryHeap<Reverse<(Instant, Id160)>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler pair for `token`, to expire after `ttl`.
    pub fn register(
        &mut self,
        token: Id160,
        ttl: Duration,
        on_response: impl FnOnce(MessageBody) + 'static,
        on_error: impl FnOnce(DispatchError) + 'static,
    ) {
        let deadline = Instant::now() + ttl;
        self.pending.insert(
            token,
            PendingResponse {
                on_response: Box::new(on_response),
                on_error: Box::new(on_error),
                deadline,
            },
        );
        self.deadlines.push(Reverse((deadline, token)));
    }

    /// Deliver a response for `token`, if a matching entry is registered.
    ///
    /// If no entry exists (an `UnassociatedToken`), the message is silently
    /// dropped, as the protocol does not treat this as an error condition.
    pub fn deliver(&mut self, token: Id160, body: MessageBody) {
        if let Some(entry) = self.pending.remove(&token) {
            (entry.on_response)(body);
        } else {
            tracing::debug!(?token, "dropping response for unassociated token");
        }
    }

    /// The number of outstanding registrations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether there are no outstanding registrations.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The earliest deadline among outstanding entries, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Sleep until the earliest outstanding deadline, or forever if none.
    pub async fn wait_next(&self) {
        match self.next_deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Fire `on_error(Timeout)` for every entry whose deadline has passed.
    pub fn expire_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((deadline, token))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            // The token may already have been delivered and removed; a stale
            // deadline entry for it is simply skipped.
            if let Some(entry) = self.pending.remove(&token) {
                (entry.on_error)(DispatchError::Timeout);
            }
        }
    }
}
