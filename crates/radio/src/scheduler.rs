//! Half-duplex transmit scheduler

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::{FrameType, RadioError, RadioTransport};

/// An encoded frame waiting for the radio.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub frame_type: FrameType,
    pub sequence: u8,
    pub bytes: Bytes,
}

/// Producer handle of the outbound FIFO. Cheap to clone; every role that emits
/// frames holds one.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    depth: Arc<AtomicU64>,
}

/// The single consumer end, owned by the [`TransmitScheduler`].
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
    depth: Arc<AtomicU64>,
}

impl OutboundQueue {
    pub fn new() -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicU64::new(0));
        (
            Self { tx, depth: depth.clone() },
            OutboundReceiver { rx, depth },
        )
    }

    pub fn push(&self, frame: OutboundFrame) -> Result<(), RadioError> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.tx.send(frame).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            RadioError::Closed
        })
    }

    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Relaxed)
    }
}

impl OutboundReceiver {
    pub async fn pop(&mut self) -> Option<OutboundFrame> {
        let frame = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn try_pop(&mut self) -> Option<OutboundFrame> {
        let frame = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(frame)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_transmitted: u64,
    pub bytes_transmitted: u64,
    pub transmit_failures: u64,
    pub airtime: Duration,
}

/// Sole owner of the radio's transmit path.
pub struct TransmitScheduler<T> {
    transport: T,
    queue: OutboundReceiver,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl<T: RadioTransport + 'static> TransmitScheduler<T> {
    pub fn new(transport: T, queue: OutboundReceiver) -> Self {
        Self {
            transport,
            queue,
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }

    /// Shared view of the counters; stays valid after `run` consumes the scheduler.
    pub fn stats(&self) -> Arc<Mutex<SchedulerStats>> {
        self.stats.clone()
    }

    /// Drain the queue until every producer handle is gone.
    ///
    /// Each frame is transmitted to completion and the radio is put back into
    /// continuous receive before the next frame is popped.
    pub async fn run(mut self) -> Result<(), RadioError> {
        self.transport.set_receive_mode().await?;
        info!("Transmit scheduler started");

        while let Some(frame) = self.queue.pop().await {
            match self.transport.transmit(&frame.bytes).await {
                Ok(done) => {
                    debug!(
                        "Transmitted {:?} seq {} ({} bytes, {:?} on air)",
                        frame.frame_type, frame.sequence, done.bytes, done.airtime
                    );
                    let mut stats = self.stats.lock().await;
                    stats.frames_transmitted += 1;
                    stats.bytes_transmitted += done.bytes as u64;
                    stats.airtime += done.airtime;
                }
                Err(e) => {
                    warn!(
                        "Dropping {:?} seq {} after transmit failure: {}",
                        frame.frame_type, frame.sequence, e
                    );
                    self.stats.lock().await.transmit_failures += 1;
                }
            }

            self.transport.set_receive_mode().await?;
        }

        info!("Outbound queue closed, transmit scheduler stopping");
        Ok(())
    }

    pub fn spawn(self) -> JoinHandle<Result<(), RadioError>> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RadioConfig, RadioMode, TransmitComplete};
    use async_trait::async_trait;

    /// Records the order of radio operations.
    #[derive(Default)]
    struct RecordingRadio {
        log: Arc<std::sync::Mutex<Vec<String>>>,
        fail_on: Option<u8>,
    }

    #[async_trait]
    impl RadioTransport for RecordingRadio {
        async fn configure(&mut self, _config: &RadioConfig) -> Result<(), RadioError> {
            Ok(())
        }

        async fn transmit(&mut self, frame: &[u8]) -> Result<TransmitComplete, RadioError> {
            if Some(frame[3]) == self.fail_on {
                return Err(RadioError::TransmissionFailed("test".into()));
            }
            self.log.lock().unwrap().push(format!("tx {}", frame[3]));
            Ok(TransmitComplete {
                bytes: frame.len(),
                airtime: Duration::from_millis(10),
            })
        }

        async fn set_receive_mode(&mut self) -> Result<(), RadioError> {
            self.log.lock().unwrap().push(format!("{:?}", RadioMode::Receive));
            Ok(())
        }
    }

    fn frame(sequence: u8) -> OutboundFrame {
        OutboundFrame {
            frame_type: FrameType::Data,
            sequence,
            bytes: Bytes::from(vec![1, 1, 1, sequence]),
        }
    }

    #[tokio::test]
    async fn test_fifo_with_receive_turnaround() {
        let radio = RecordingRadio::default();
        let log = radio.log.clone();
        let (queue, rx) = OutboundQueue::new();

        for seq in [3, 1, 2] {
            queue.push(frame(seq)).unwrap();
        }
        assert_eq!(queue.depth(), 3);

        let scheduler = TransmitScheduler::new(radio, rx);
        let stats = scheduler.stats();
        drop(queue);
        scheduler.run().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["Receive", "tx 3", "Receive", "tx 1", "Receive", "tx 2", "Receive"]
        );
        let stats = *stats.lock().await;
        assert_eq!(stats.frames_transmitted, 3);
        assert_eq!(stats.bytes_transmitted, 12);
        assert_eq!(stats.airtime, Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_failed_transmit_is_dropped() {
        let radio = RecordingRadio {
            fail_on: Some(2),
            ..Default::default()
        };
        let log = radio.log.clone();
        let (queue, rx) = OutboundQueue::new();
        for seq in 1..=3 {
            queue.push(frame(seq)).unwrap();
        }
        drop(queue);

        let scheduler = TransmitScheduler::new(radio, rx);
        let stats = scheduler.stats();
        scheduler.run().await.unwrap();

        let sent: Vec<_> = log.lock().unwrap().iter().filter(|l| l.starts_with("tx")).cloned().collect();
        assert_eq!(sent, vec!["tx 1", "tx 3"]);
        assert_eq!(stats.lock().await.transmit_failures, 1);
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let (queue, mut rx) = OutboundQueue::new();
        let mut producers = Vec::new();
        for p in 0..4u8 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50u8 {
                    queue.push(frame(p * 50 + i)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        drop(queue);

        let mut seen = Vec::new();
        while let Some(f) = rx.pop().await {
            seen.push(f.sequence);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..200).map(|s| s as u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_after_close() {
        let (queue, rx) = OutboundQueue::new();
        drop(rx);
        assert!(matches!(queue.push(frame(1)), Err(RadioError::Closed)));
        assert_eq!(queue.depth(), 0);
    }
}
