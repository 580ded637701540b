//! Gateway side of the protocol: acknowledge, route, relay, respond.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use loratap_radio::{Frame, FrameError, FrameType, OutboundQueue, RadioError};
use tokio::sync::mpsc;

use crate::session::{DeviceTable, Session};
use crate::upstream::UpstreamRelay;
use crate::BridgeError;

/// A payload waiting for the upstream call.
#[derive(Debug, Clone)]
pub struct RelayJob {
    pub device_id: u8,
    pub sequence: u8,
    pub address: SocketAddr,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// ACKed and handed to the relay worker.
    Relayed,
    /// ACKed, but the device has no route.
    Unrouted,
    /// Not a DATA frame.
    Ignored,
}

/// Runs on the receive path and never blocks on the network.
pub struct GatewayRouter {
    session: Arc<Session>,
    devices: Arc<DeviceTable>,
    queue: OutboundQueue,
    jobs: mpsc::UnboundedSender<RelayJob>,
}

impl GatewayRouter {
    pub fn new(
        session: Arc<Session>,
        devices: Arc<DeviceTable>,
        queue: OutboundQueue,
    ) -> (Self, mpsc::UnboundedReceiver<RelayJob>) {
        let (jobs, rx) = mpsc::unbounded_channel();
        (
            Self {
                session,
                devices,
                queue,
                jobs,
            },
            rx,
        )
    }

    pub fn handle_frame(&self, frame: Frame) -> Result<Routed, BridgeError> {
        if frame.frame_type != FrameType::Data {
            debug!("Ignoring {:?} frame from device {}", frame.frame_type, frame.source);
            return Ok(Routed::Ignored);
        }

        info!(
            "DATA from device {}, seq {} ({} bytes)",
            frame.source,
            frame.sequence,
            frame.payload.len()
        );

        // acknowledged whether or not the device is known
        let ack = self.session.encode(FrameType::Ack, frame.sequence, &[])?;
        self.queue.push(ack)?;

        let Some(address) = self.devices.lookup(frame.source) else {
            warn!("Unknown device id {}, frame acknowledged but not relayed", frame.source);
            return Ok(Routed::Unrouted);
        };

        self.jobs
            .send(RelayJob {
                device_id: frame.source,
                sequence: frame.sequence,
                address,
                payload: frame.payload,
            })
            .map_err(|_| RadioError::Closed)?;
        Ok(Routed::Relayed)
    }
}

/// Performs upstream calls one at a time and queues RESPONSE frames.
pub struct RelayWorker<U> {
    session: Arc<Session>,
    queue: OutboundQueue,
    upstream: U,
    jobs: mpsc::UnboundedReceiver<RelayJob>,
}

impl<U: UpstreamRelay> RelayWorker<U> {
    pub fn new(
        session: Arc<Session>,
        queue: OutboundQueue,
        upstream: U,
        jobs: mpsc::UnboundedReceiver<RelayJob>,
    ) -> Self {
        Self {
            session,
            queue,
            upstream,
            jobs,
        }
    }

    pub async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            match self.relay(&job).await {
                Ok(response_sequence) => debug!(
                    "Relayed seq {} from device {}, RESPONSE seq {}",
                    job.sequence, job.device_id, response_sequence
                ),
                Err(e) => warn!(
                    "No RESPONSE for device {} seq {}: {}",
                    job.device_id, job.sequence, e
                ),
            }
        }
        debug!("Relay worker stopping");
    }

    /// Forward one job and queue the reply. Returns the RESPONSE sequence.
    pub async fn relay(&self, job: &RelayJob) -> Result<u8, BridgeError> {
        let reply = self.upstream.forward(job.address, &job.payload).await?;
        // an unsendable reply must not consume a RESPONSE sequence
        let max = self.session.codec().max_plaintext_len();
        if reply.len() > max {
            return Err(FrameError::PayloadTooLarge {
                len: reply.len(),
                max,
            }
            .into());
        }
        let sequence = self.session.next_sequence();
        let frame = self.session.encode(FrameType::Response, sequence, &reply)?;
        self.queue.push(frame)?;
        Ok(sequence)
    }
}
