//! Per-process state: identity, codec, sequence counter and the gateway's device table.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};

use loratap_radio::{FrameCodec, FrameError, FrameType, OutboundFrame, GATEWAY_DEVICE_ID};

use crate::BridgeError;

/// Wrapping 8-bit counter. Not persisted.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU8);

impl SequenceCounter {
    pub fn starting_at(value: u8) -> Self {
        Self(AtomicU8::new(value))
    }

    /// Returns the current value and advances, wrapping after 255.
    pub fn next(&self) -> u8 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    pub fn peek(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Static map from device id to the upstream address its traffic is relayed to.
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    routes: HashMap<u8, SocketAddr>,
}

impl DeviceTable {
    pub const DEFAULT_PORT: u16 = 80;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, device_id: u8, address: SocketAddr) -> Self {
        self.routes.insert(device_id, address);
        self
    }

    pub fn insert(&mut self, device_id: u8, address: SocketAddr) -> Option<SocketAddr> {
        self.routes.insert(device_id, address)
    }

    pub fn lookup(&self, device_id: u8) -> Option<SocketAddr> {
        self.routes.get(&device_id).copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Parse `ID=ADDR`, where ADDR is `ip` or `ip:port`.
    pub fn parse_route(route: &str) -> Result<(u8, SocketAddr), BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidRoute {
            route: route.to_string(),
            reason: reason.to_string(),
        };

        let (id, address) = route.split_once('=').ok_or_else(|| invalid("expected ID=ADDR"))?;
        let id: u8 = id.trim().parse().map_err(|_| invalid("device id must be 0-255"))?;
        let address = parse_address(address.trim()).ok_or_else(|| invalid("bad address"))?;
        Ok((id, address))
    }

    /// Load a JSON object of `"id": "addr"` entries.
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let raw: HashMap<u8, String> =
            serde_json::from_str(json).map_err(|e| BridgeError::InvalidRoute {
                route: "<routes file>".to_string(),
                reason: e.to_string(),
            })?;

        let mut table = Self::new();
        for (id, address) in raw {
            let parsed = parse_address(&address).ok_or_else(|| BridgeError::InvalidRoute {
                route: format!("{id}={address}"),
                reason: "bad address".to_string(),
            })?;
            table.insert(id, parsed);
        }
        Ok(table)
    }
}

fn parse_address(address: &str) -> Option<SocketAddr> {
    address.parse::<SocketAddr>().ok().or_else(|| {
        address
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, DeviceTable::DEFAULT_PORT))
    })
}

/// Identity and framing shared by every component of one node.
#[derive(Debug)]
pub struct Session {
    device_id: u8,
    gateway_id: u8,
    codec: FrameCodec,
    sequence: SequenceCounter,
}

impl Session {
    pub fn new(device_id: u8, codec: FrameCodec) -> Self {
        Self {
            device_id,
            gateway_id: GATEWAY_DEVICE_ID,
            codec,
            sequence: SequenceCounter::default(),
        }
    }

    pub fn with_gateway_id(mut self, gateway_id: u8) -> Self {
        self.gateway_id = gateway_id;
        self
    }

    pub fn with_first_sequence(mut self, sequence: u8) -> Self {
        self.sequence = SequenceCounter::starting_at(sequence);
        self
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn gateway_id(&self) -> u8 {
        self.gateway_id
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn next_sequence(&self) -> u8 {
        self.sequence.next()
    }

    /// Encode a frame sourced from this node.
    pub fn encode(
        &self,
        frame_type: FrameType,
        sequence: u8,
        payload: &[u8],
    ) -> Result<OutboundFrame, FrameError> {
        let bytes = self.codec.encode(self.device_id, frame_type, sequence, payload)?;
        Ok(OutboundFrame {
            frame_type,
            sequence,
            bytes,
        })
    }
}
