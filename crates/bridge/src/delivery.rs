//! Stop-and-wait delivery of DATA frames.
//!
//! One payload is in flight at a time. A send enqueues the DATA frame, waits
//! for the ACK until the attempt deadline and re-enqueues the identical frame
//! on timeout, until the attempt budget runs out.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use loratap_radio::{FrameType, OutboundQueue};
use tokio::time::Instant;

use crate::rendezvous::AckRendezvous;
use crate::session::Session;
use crate::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Total transmissions per payload, including the first.
    pub attempts: u32,
    pub ack_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            ack_timeout: Duration::from_secs(2),
        }
    }
}

/// Outcome of an acknowledged send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub sequence: u8,
    pub token: u64,
    pub attempts: u32,
}

#[derive(Debug)]
struct PendingRequest {
    sequence: u8,
    attempts_remaining: u32,
    deadline: Instant,
}

pub struct ReliableSender {
    session: Arc<Session>,
    queue: OutboundQueue,
    acks: Arc<AckRendezvous>,
    policy: DeliveryPolicy,
}

impl ReliableSender {
    pub fn new(
        session: Arc<Session>,
        queue: OutboundQueue,
        acks: Arc<AckRendezvous>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            session,
            queue,
            acks,
            policy,
        }
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Deliver `payload` as DATA with `sequence`.
    ///
    /// Fails without transmitting if the payload does not fit a frame, and with
    /// [`BridgeError::DeliveryExhausted`] once every attempt timed out.
    pub async fn send_reliable(&self, payload: &[u8], sequence: u8) -> Result<Delivery, BridgeError> {
        let frame = self.session.encode(FrameType::Data, sequence, payload)?;
        let mut wait = self.acks.arm(sequence).await;
        let mut pending = PendingRequest {
            sequence,
            attempts_remaining: self.policy.attempts,
            deadline: Instant::now(),
        };

        let mut attempt = 0;
        let result = loop {
            if pending.attempts_remaining == 0 {
                break Err(BridgeError::DeliveryExhausted {
                    sequence: pending.sequence,
                    attempts: attempt,
                });
            }
            pending.attempts_remaining -= 1;
            attempt += 1;

            if let Err(e) = self.queue.push(frame.clone()) {
                break Err(e.into());
            }
            pending.deadline = Instant::now() + self.policy.ack_timeout;
            debug!(
                "DATA seq {} queued (attempt {}/{}), awaiting ACK",
                pending.sequence, attempt, self.policy.attempts
            );

            if let Some(receipt) = wait.wait_until(pending.deadline).await {
                break Ok(Delivery {
                    sequence: receipt.sequence,
                    token: receipt.token,
                    attempts: attempt,
                });
            }
            warn!(
                "No ACK for seq {} within {:?} (attempt {}/{})",
                pending.sequence, self.policy.ack_timeout, attempt, self.policy.attempts
            );
        };

        self.acks.disarm(wait.token()).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loratap_radio::{FrameCodec, FrameError, OutboundReceiver};

    fn sender(attempts: u32) -> (ReliableSender, OutboundReceiver, Arc<AckRendezvous>) {
        let session = Arc::new(Session::new(1, FrameCodec::plaintext()));
        let (queue, rx) = OutboundQueue::new();
        let acks = Arc::new(AckRendezvous::new());
        let policy = DeliveryPolicy {
            attempts,
            ack_timeout: Duration::from_secs(1),
        };
        (ReliableSender::new(session, queue, acks.clone(), policy), rx, acks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_exact_attempts() {
        let (sender, mut rx, acks) = sender(3);

        let start = Instant::now();
        let err = sender.send_reliable(b"ping", 5).await.unwrap_err();
        assert!(matches!(err, BridgeError::DeliveryExhausted { sequence: 5, attempts: 3 }));
        assert!(start.elapsed() >= Duration::from_secs(3));

        let mut sent = Vec::new();
        while let Some(frame) = rx.try_pop() {
            sent.push(frame);
        }
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|f| f.sequence == 5 && f.bytes == sent[0].bytes));
        assert!(!acks.is_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_acked_attempt() {
        let (sender, mut rx, acks) = sender(3);

        let responder = tokio::spawn(async move {
            let mut seen = 0;
            while let Some(frame) = rx.pop().await {
                seen += 1;
                if seen == 2 {
                    acks.deliver(frame.sequence).await;
                }
            }
            seen
        });

        let delivery = sender.send_reliable(b"ping", 9).await.unwrap();
        assert_eq!(delivery.attempts, 2);
        assert_eq!(delivery.sequence, 9);

        drop(sender);
        assert_eq!(responder.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_sequence_ack_ignored() {
        let (sender, mut rx, acks) = sender(2);

        let responder = tokio::spawn(async move {
            while let Some(frame) = rx.pop().await {
                acks.deliver(frame.sequence.wrapping_sub(1)).await;
            }
        });

        let err = sender.send_reliable(b"ping", 0).await.unwrap_err();
        assert!(matches!(err, BridgeError::DeliveryExhausted { attempts: 2, .. }));
        drop(sender);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_payload_never_queued() {
        let (sender, mut rx, _acks) = sender(3);

        let err = sender.send_reliable(&[0u8; 252], 1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Frame(FrameError::PayloadTooLarge { .. })));
        assert!(rx.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_is_reported() {
        let (sender, rx, _acks) = sender(3);
        drop(rx);

        let err = sender.send_reliable(b"ping", 1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Radio(loratap_radio::RadioError::Closed)));
    }
}
