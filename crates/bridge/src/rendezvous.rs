//! Single-slot ACK handoff between the receive path and the waiting sender.
//!
//! A sender arms the slot for one sequence number and gets a token that is
//! never reused. An ACK is handed over only while someone is armed for its
//! sequence; anything else is discarded, never buffered for a later wait.

use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{sleep_until, timeout_at, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckReceipt {
    pub token: u64,
    pub sequence: u8,
}

struct Waiter {
    token: u64,
    sequence: u8,
    tx: oneshot::Sender<AckReceipt>,
}

#[derive(Default)]
pub struct AckRendezvous {
    slot: Mutex<Option<Waiter>>,
    next_token: AtomicU64,
}

/// The sender's half of an armed slot.
pub struct AckWait {
    token: u64,
    sequence: u8,
    rx: oneshot::Receiver<AckReceipt>,
}

impl AckRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot for `sequence`, replacing any previous waiter.
    pub async fn arm(&self, sequence: u8) -> AckWait {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *self.slot.lock().await = Some(Waiter { token, sequence, tx });
        AckWait { token, sequence, rx }
    }

    /// Offer an ACK. Returns true if an armed sender took it.
    pub async fn deliver(&self, sequence: u8) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(waiter) if waiter.sequence == sequence => {
                let receipt = AckReceipt {
                    token: waiter.token,
                    sequence,
                };
                waiter.tx.send(receipt).is_ok()
            }
            other => {
                trace!("ACK seq {} has no armed sender", sequence);
                *slot = other;
                false
            }
        }
    }

    /// Clear the slot if it still belongs to `token`.
    pub async fn disarm(&self, token: u64) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|w| w.token == token) {
            *slot = None;
        }
    }

    pub async fn is_armed(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

impl AckWait {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Wait for the ACK until `deadline`. Can be called again after a timeout.
    pub async fn wait_until(&mut self, deadline: Instant) -> Option<AckReceipt> {
        match timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(receipt)) => Some(receipt),
            Ok(Err(_)) => {
                // slot was taken over by another sender; nothing can arrive
                sleep_until(deadline).await;
                None
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_matching_ack_wakes_sender() {
        let acks = AckRendezvous::new();
        let mut wait = acks.arm(5).await;

        assert!(acks.deliver(5).await);
        let receipt = wait.wait_until(Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(
            receipt,
            Some(AckReceipt {
                token: wait.token(),
                sequence: 5
            })
        );
        assert!(!acks.is_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_ack_keeps_slot() {
        let acks = AckRendezvous::new();
        let mut wait = acks.arm(5).await;

        assert!(!acks.deliver(4).await);
        assert!(acks.is_armed().await);
        assert_eq!(wait.wait_until(Instant::now() + Duration::from_secs(1)).await, None);

        assert!(acks.deliver(5).await);
        assert!(wait.wait_until(Instant::now() + Duration::from_secs(1)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ack_not_buffered() {
        let acks = AckRendezvous::new();

        // arrives while nobody waits
        assert!(!acks.deliver(9).await);

        let mut wait = acks.arm(9).await;
        assert_eq!(wait.wait_until(Instant::now() + Duration::from_secs(1)).await, None);
    }

    #[tokio::test]
    async fn test_tokens_never_repeat() {
        let acks = AckRendezvous::new();
        let first = acks.arm(1).await;
        let second = acks.arm(1).await;
        assert_ne!(first.token(), second.token());

        // a stale disarm does not clear the newer waiter
        acks.disarm(first.token()).await;
        assert!(acks.is_armed().await);
        acks.disarm(second.token()).await;
        assert!(!acks.is_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_waiter_times_out() {
        let acks = AckRendezvous::new();
        let mut old = acks.arm(3).await;
        let _new = acks.arm(3).await;

        let start = Instant::now();
        assert_eq!(old.wait_until(start + Duration::from_millis(500)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
