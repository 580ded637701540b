//! Radio transport contract.
//!
//! Transmitting needs `&mut self`, so whoever owns the transport owns the
//! transmit path. In practice that is the [`crate::TransmitScheduler`]. Received
//! frames leave the transport through the channel handed out when it is built.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{RadioConfig, RadioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitComplete {
    pub bytes: usize,
    pub airtime: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RadioMode {
    Standby = 0,
    Transmit = 1,
    Receive = 2,
}

/// Half-duplex mode shared between the transmit side of a transport and its
/// receive path. A frame arriving while the mode is not `Receive` is lost.
#[derive(Debug, Clone, Default)]
pub struct ModeState(Arc<AtomicU8>);

impl ModeState {
    pub fn get(&self) -> RadioMode {
        match self.0.load(Ordering::Acquire) {
            1 => RadioMode::Transmit,
            2 => RadioMode::Receive,
            _ => RadioMode::Standby,
        }
    }

    pub fn set(&self, mode: RadioMode) {
        self.0.store(mode as u8, Ordering::Release);
    }

    pub fn is_receiving(&self) -> bool {
        self.get() == RadioMode::Receive
    }
}

#[async_trait]
pub trait RadioTransport: Send {
    /// Apply modulation parameters. Leaves the radio in standby.
    async fn configure(&mut self, config: &RadioConfig) -> Result<(), RadioError>;

    /// Send one frame, resolving once the radio reports transmission done.
    async fn transmit(&mut self, frame: &[u8]) -> Result<TransmitComplete, RadioError>;

    /// Switch to continuous receive.
    async fn set_receive_mode(&mut self) -> Result<(), RadioError>;
}
