//! Gateway role: receive path plus relay worker.

use std::sync::Arc;

use bytes::Bytes;
use log::{info, warn};
use loratap_radio::OutboundQueue;
use tokio::sync::mpsc;

use crate::router::{GatewayRouter, RelayWorker, Routed};
use crate::session::{DeviceTable, Session};
use crate::upstream::UpstreamRelay;

pub struct GatewayNode<U> {
    inbound: GatewayInbound,
    worker: RelayWorker<U>,
}

/// Decode-and-route step run for every received frame.
pub struct GatewayInbound {
    session: Arc<Session>,
    router: GatewayRouter,
}

impl GatewayInbound {
    /// Failures are logged, never fatal.
    pub fn handle(&self, bytes: &[u8]) -> Option<Routed> {
        let frame = match self.session.codec().decode(bytes) {
            Ok(frame) => frame,
            Err(e) if e.is_malformed() => {
                warn!("Dropping malformed frame: {}", e);
                return None;
            }
            Err(e) => {
                warn!("Dropping frame that failed to decrypt: {}", e);
                return None;
            }
        };
        match self.router.handle_frame(frame) {
            Ok(routed) => Some(routed),
            Err(e) => {
                warn!("Routing failed: {}", e);
                None
            }
        }
    }
}

impl<U: UpstreamRelay + 'static> GatewayNode<U> {
    pub fn new(
        session: Arc<Session>,
        devices: Arc<DeviceTable>,
        queue: OutboundQueue,
        upstream: U,
    ) -> Self {
        info!(
            "Gateway {} serving {} routed device(s)",
            session.device_id(),
            devices.len()
        );
        let (router, jobs) = GatewayRouter::new(session.clone(), devices, queue.clone());
        let worker = RelayWorker::new(session.clone(), queue, upstream, jobs);
        Self {
            inbound: GatewayInbound { session, router },
            worker,
        }
    }

    pub fn handle(&self, bytes: &[u8]) -> Option<Routed> {
        self.inbound.handle(bytes)
    }

    /// Serve until the radio's receive channel closes. The relay worker runs
    /// on its own task so upstream calls never stall reception.
    pub async fn run(self, mut received: mpsc::UnboundedReceiver<Bytes>) {
        let GatewayNode { inbound, worker } = self;
        let relay = tokio::spawn(worker.run());

        while let Some(bytes) = received.recv().await {
            inbound.handle(&bytes);
        }

        info!("Radio receive channel closed, gateway stopping");
        // closes the job channel so the worker drains and exits
        drop(inbound);
        if let Err(e) = relay.await {
            warn!("Relay worker panicked: {}", e);
        }
    }
}
