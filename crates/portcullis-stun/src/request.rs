//! Time-driven STUN transaction management.
//!
//! The manager owns outstanding request transactions for one socket. It is
//! sans-IO: the owner polls it with explicit instants and writes the
//! returned transmit payloads to its own socket. Dropping the manager
//! cancels every pending transaction without surfacing further events.

use crate::message::{MessageType, StunMessage, TransactionId};
use std::time::{Duration, Instant};
use tracing::warn;

/// A request transaction's behavior: how to build the message and how to
/// pace retransmissions.
pub trait StunRequest {
    /// Build the request message. Called once, when the transaction is
    /// first due for transmission; the returned message's transaction ID
    /// identifies the transaction from then on.
    fn prepare(&mut self) -> StunMessage;

    /// Called after each transmission to schedule the next event.
    fn next_delay(&mut self) -> Retransmit;
}

/// Retransmission pacing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retransmit {
    /// Wait this long, then transmit again
    Again(Duration),
    /// Wait this long, then give up and surface a timeout
    GiveUpAfter(Duration),
}

/// Classification of a matched response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Success response (request type | 0x100)
    Success,
    /// Error response (request type | 0x110)
    Error,
}

/// Events drained from [`StunRequestManager::poll`].
#[derive(Debug)]
pub enum ManagerEvent<R> {
    /// Write these bytes to the socket, unwrapped; they are already a
    /// complete STUN message for the server.
    Transmit {
        /// Transaction the payload belongs to
        transaction_id: TransactionId,
        /// Encoded message
        bytes: Vec<u8>,
    },
    /// The transaction exhausted its retransmissions; the request is
    /// handed back for terminal dispatch.
    TimedOut(R),
}

struct Pending<R> {
    request: R,
    request_type: Option<MessageType>,
    transaction_id: Option<TransactionId>,
    encoded: Option<Vec<u8>>,
    due: Instant,
    terminal: bool,
}

/// Outstanding-transaction table for one socket.
pub struct StunRequestManager<R> {
    pending: Vec<Pending<R>>,
}

impl<R: StunRequest> StunRequestManager<R> {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Enqueue a request whose first transmission happens `delay` after
    /// `now`. A zero delay transmits on the next poll.
    pub fn send_delayed(&mut self, request: R, delay: Duration, now: Instant) {
        self.pending.push(Pending {
            request,
            request_type: None,
            transaction_id: None,
            encoded: None,
            due: now + delay,
            terminal: false,
        });
    }

    /// Drain all transmissions and timeouts due at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<ManagerEvent<R>> {
        let mut events = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].due > now {
                index += 1;
                continue;
            }
            if self.pending[index].terminal {
                let entry = self.pending.remove(index);
                events.push(ManagerEvent::TimedOut(entry.request));
                continue;
            }
            let entry = &mut self.pending[index];
            if entry.encoded.is_none() {
                let message = entry.request.prepare();
                entry.request_type = Some(message.msg_type());
                entry.transaction_id = Some(*message.transaction_id());
                entry.encoded = Some(message.encode());
            }
            events.push(ManagerEvent::Transmit {
                transaction_id: entry.transaction_id.unwrap_or_default(),
                bytes: entry.encoded.clone().unwrap_or_default(),
            });
            match entry.request.next_delay() {
                Retransmit::Again(delay) => entry.due = now + delay,
                Retransmit::GiveUpAfter(delay) => {
                    entry.due = now + delay;
                    entry.terminal = true;
                }
            }
            index += 1;
        }
        events
    }

    /// Match a response against the outstanding transactions.
    ///
    /// On a match the transaction is retired and handed back with the
    /// response classification. Unknown transaction IDs return `None`; a
    /// known ID with a type that is neither the success nor error response
    /// of the original request is logged and left outstanding.
    pub fn check_response(&mut self, message: &StunMessage) -> Option<(R, ResponseKind)> {
        let index = self
            .pending
            .iter()
            .position(|p| p.transaction_id.as_ref() == Some(message.transaction_id()))?;
        let request_type = self.pending[index].request_type?;
        let kind = if message.msg_type() == request_type.success_response() {
            ResponseKind::Success
        } else if message.msg_type() == request_type.error_response() {
            ResponseKind::Error
        } else {
            warn!(
                received = ?message.msg_type(),
                expected = ?request_type.success_response(),
                "response type does not match the outstanding request"
            );
            return None;
        };
        let entry = self.pending.remove(index);
        Some((entry.request, kind))
    }

    /// The earliest instant at which [`StunRequestManager::poll`] will have
    /// work to do, if any transactions are outstanding.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.due).min()
    }

    /// Number of outstanding transactions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<R: StunRequest> Default for StunRequestManager<R> {
    fn default() -> Self {
        Self::new()
    }
}
