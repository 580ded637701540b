//! Store-and-forward bridge between a virtual interface and the LoRa link.
//!
//! Clients push interface frames through the [`ReliableSender`]; the gateway
//! acknowledges them, relays payloads upstream and returns the replies as
//! RESPONSE frames. Everything that transmits goes through the radio crate's
//! outbound queue.

use std::net::SocketAddr;

use loratap_radio::{FrameError, RadioError};
use thiserror::Error;

pub mod client;
pub mod delivery;
pub mod gateway;
pub mod interface;
pub mod rendezvous;
pub mod router;
pub mod session;
pub mod upstream;

pub use client::{ClientInbound, ClientNode, InboundEvent};
pub use delivery::{Delivery, DeliveryPolicy, ReliableSender};
pub use gateway::{GatewayInbound, GatewayNode};
pub use interface::{MemoryInterface, MemoryPeer, StreamInterface, VirtualInterface};
pub use rendezvous::{AckReceipt, AckRendezvous, AckWait};
pub use router::{GatewayRouter, RelayJob, RelayWorker, Routed};
pub use session::{DeviceTable, SequenceCounter, Session};
pub use upstream::{TcpRelay, UpstreamRelay};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("no ACK for sequence {sequence} after {attempts} attempt(s)")]
    DeliveryExhausted { sequence: u8, attempts: u32 },

    #[error("upstream relay to {address} failed: {source}")]
    UpstreamForward {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream relay to {0} timed out")]
    UpstreamTimeout(SocketAddr),

    #[error("invalid route `{route}`: {reason}")]
    InvalidRoute { route: String, reason: String },

    #[error("virtual interface: {0}")]
    Interface(#[from] std::io::Error),
}
