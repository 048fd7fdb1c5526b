//! Allocate request transactions.

use portcullis_stun::{MessageType, Retransmit, StunAttribute, StunMessage, StunRequest};
use std::time::{Duration, Instant};

/// Overall window during which allocate error responses keep being retried,
/// matching the ICE gathering timeout.
pub(crate) const ALLOCATE_RETRY_TIMEOUT: Duration = Duration::from_secs(50);

const MAX_ATTEMPTS: u32 = 5;

/// One STUN Allocate transaction for an entry's current connection.
///
/// Carries only a USERNAME attribute. Message integrity is a known gap of
/// the dialect; see the send path in the entry module.
pub(crate) struct AllocateRequest {
    username: Vec<u8>,
    attempts: u32,
    start_time: Instant,
}

impl AllocateRequest {
    pub(crate) fn new(username: Vec<u8>, now: Instant) -> Self {
        Self {
            username,
            attempts: 0,
            start_time: now,
        }
    }

    /// Whether an error response received at `now` still warrants another
    /// attempt.
    pub(crate) fn within_retry_window(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start_time) <= ALLOCATE_RETRY_TIMEOUT
    }
}

impl StunRequest for AllocateRequest {
    fn prepare(&mut self) -> StunMessage {
        let mut message = StunMessage::new(MessageType::AllocateRequest);
        message.add_attribute(StunAttribute::Username(self.username.clone()));
        message
    }

    /// Delay before the next transmission: `100 ms * max(2, 2^n)` on the
    /// n-th attempt, giving up after the fifth.
    fn next_delay(&mut self) -> Retransmit {
        let delay = Duration::from_millis(100 * u64::max(1 << self.attempts, 2));
        self.attempts += 1;
        if self.attempts == MAX_ATTEMPTS {
            Retransmit::GiveUpAfter(delay)
        } else {
            Retransmit::Again(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_schedule() {
        let now = Instant::now();
        let mut request = AllocateRequest::new(b"ufrag".to_vec(), now);

        let mut delays = Vec::new();
        loop {
            match request.next_delay() {
                Retransmit::Again(d) => delays.push(d.as_millis()),
                Retransmit::GiveUpAfter(d) => {
                    delays.push(d.as_millis());
                    break;
                }
            }
        }
        assert_eq!(delays, vec![200, 200, 400, 800, 1600]);
    }

    #[test]
    fn test_prepare_carries_username_only() {
        let now = Instant::now();
        let mut request = AllocateRequest::new(b"ufrag0001".to_vec(), now);
        let message = request.prepare();

        assert_eq!(message.msg_type(), MessageType::AllocateRequest);
        assert_eq!(message.attributes().len(), 1);
        assert_eq!(
            message.attributes()[0],
            StunAttribute::Username(b"ufrag0001".to_vec())
        );
    }

    #[test]
    fn test_retry_window() {
        let now = Instant::now();
        let request = AllocateRequest::new(Vec::new(), now);
        assert!(request.within_retry_window(now + Duration::from_secs(50)));
        assert!(!request.within_retry_window(now + Duration::from_secs(51)));
    }
}
