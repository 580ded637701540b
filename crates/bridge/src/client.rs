//! Client role: interface frames out through the reliable sender, ACKs and
//! RESPONSE frames in from the gateway.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, trace, warn};
use loratap_radio::{FrameType, OutboundQueue};
use tokio::sync::mpsc;

use crate::delivery::{DeliveryPolicy, ReliableSender};
use crate::interface::VirtualInterface;
use crate::rendezvous::AckRendezvous;
use crate::session::Session;
use crate::BridgeError;

pub struct ClientNode<I> {
    session: Arc<Session>,
    sender: ReliableSender,
    acks: Arc<AckRendezvous>,
    interface: Arc<I>,
}

impl<I: VirtualInterface + 'static> ClientNode<I> {
    pub fn new(
        session: Arc<Session>,
        queue: OutboundQueue,
        policy: DeliveryPolicy,
        interface: Arc<I>,
    ) -> Self {
        let acks = Arc::new(AckRendezvous::new());
        let sender = ReliableSender::new(session.clone(), queue, acks.clone(), policy);
        Self {
            session,
            sender,
            acks,
            interface,
        }
    }

    /// Handler for frames the radio receives on behalf of this client.
    pub fn inbound(&self) -> ClientInbound<I> {
        ClientInbound::new(self.session.clone(), self.acks.clone(), self.interface.clone())
    }

    /// Read interface frames forever, one reliable send each.
    ///
    /// Returns when the interface or the outbound queue closes. Failed
    /// deliveries drop the frame and move on.
    pub async fn run(self) -> Result<(), BridgeError> {
        info!(
            "Client {} running, gateway {}, {:?}",
            self.session.device_id(),
            self.session.gateway_id(),
            self.sender.policy()
        );

        loop {
            let packet = self.interface.read_frame().await?;
            // consumed even if the send fails
            let sequence = self.session.next_sequence();
            trace!("Interface frame of {} bytes, seq {}", packet.len(), sequence);

            match self.sender.send_reliable(&packet, sequence).await {
                Ok(delivery) => debug!(
                    "Seq {} acknowledged after {} attempt(s)",
                    delivery.sequence, delivery.attempts
                ),
                Err(BridgeError::Radio(e)) => return Err(e.into()),
                Err(e) => warn!("Dropping interface frame seq {}: {}", sequence, e),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Ack { sequence: u8, matched: bool },
    Response { sequence: u8, payload: Bytes },
    Ignored,
    Dropped,
}

pub struct ClientInbound<I> {
    session: Arc<Session>,
    acks: Arc<AckRendezvous>,
    interface: Arc<I>,
}

impl<I: VirtualInterface> ClientInbound<I> {
    pub fn new(session: Arc<Session>, acks: Arc<AckRendezvous>, interface: Arc<I>) -> Self {
        Self {
            session,
            acks,
            interface,
        }
    }

    pub async fn handle(&self, bytes: &[u8]) -> InboundEvent {
        let frame = match self.session.codec().decode(bytes) {
            Ok(frame) => frame,
            Err(e) if e.is_malformed() => {
                warn!("Dropping malformed frame: {}", e);
                return InboundEvent::Dropped;
            }
            Err(e) => {
                warn!("Dropping frame that failed to decrypt: {}", e);
                return InboundEvent::Dropped;
            }
        };

        if frame.source != self.session.gateway_id() {
            trace!("Ignoring {:?} from device {}", frame.frame_type, frame.source);
            return InboundEvent::Ignored;
        }

        match frame.frame_type {
            FrameType::Ack => {
                let matched = self.acks.deliver(frame.sequence).await;
                if matched {
                    debug!("ACK received for seq {}", frame.sequence);
                } else {
                    debug!("Stale ACK for seq {} discarded", frame.sequence);
                }
                InboundEvent::Ack {
                    sequence: frame.sequence,
                    matched,
                }
            }
            FrameType::Response => {
                debug!(
                    "RESPONSE seq {} ({} bytes) to interface",
                    frame.sequence,
                    frame.payload.len()
                );
                if let Err(e) = self.interface.write_frame(&frame.payload).await {
                    warn!("Interface write failed: {}", e);
                }
                InboundEvent::Response {
                    sequence: frame.sequence,
                    payload: frame.payload,
                }
            }
            FrameType::Data => InboundEvent::Ignored,
        }
    }

    pub async fn run(self, mut received: mpsc::UnboundedReceiver<Bytes>) {
        while let Some(bytes) = received.recv().await {
            self.handle(&bytes).await;
        }
        debug!("Radio receive channel closed, client inbound stopping");
    }
}
