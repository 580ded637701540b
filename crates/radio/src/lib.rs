//! radio layer for the LoRa TAP bridge

use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cipher;
pub mod framing;
pub mod scheduler;
pub mod simulated;
pub mod transport;
pub mod udp;

pub use cipher::{CipherError, PayloadCipher};
pub use framing::{Frame, FrameCodec, FrameError, FrameType, GATEWAY_DEVICE_ID};
pub use scheduler::{OutboundFrame, OutboundQueue, OutboundReceiver, SchedulerStats, TransmitScheduler};
pub use simulated::{ChannelConditions, SimulatedAir, SimulatedRadio};
pub use transport::{ModeState, RadioMode, RadioTransport, TransmitComplete};
pub use udp::UdpRadio;

/// Largest frame the radio FIFO accepts: a 4 byte header plus 251 payload bytes.
pub const RADIO_MTU: usize = 255;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("frame of {len} bytes exceeds radio MTU of {mtu}")]
    PacketTooLarge { len: usize, mtu: usize },

    #[error("radio transmission failed: {0}")]
    TransmissionFailed(String),

    #[error("radio channel closed")]
    Closed,

    #[error("unknown LoRa mode `{0}`, expected LongFast or ShortSlow")]
    UnknownMode(String),

    #[error("radio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Modulation presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoraMode {
    /// 500 kHz, SF7.
    #[default]
    LongFast,
    /// 125 kHz, SF12.
    ShortSlow,
}

impl LoraMode {
    pub fn bandwidth_hz(self) -> u32 {
        match self {
            LoraMode::LongFast => 500_000,
            LoraMode::ShortSlow => 125_000,
        }
    }

    pub fn spreading_factor(self) -> u8 {
        match self {
            LoraMode::LongFast => 7,
            LoraMode::ShortSlow => 12,
        }
    }
}

impl FromStr for LoraMode {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "longfast" => Ok(LoraMode::LongFast),
            "shortslow" => Ok(LoraMode::ShortSlow),
            _ => Err(RadioError::UnknownMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    pub frequency_mhz: f64,
    pub channel: u8,
    pub mode: LoraMode,
    pub output_power: u8,
    pub max_power: u8,
    /// Coding rate denominator offset: 1 means 4/5.
    pub coding_rate: u8,
    pub preamble_symbols: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 915.0,
            channel: 1,
            mode: LoraMode::LongFast,
            output_power: 0x0F,
            max_power: 0x04,
            coding_rate: 1,
            preamble_symbols: 8,
        }
    }
}

impl RadioConfig {
    pub const CHANNEL_SPACING_MHZ: f64 = 0.2;

    /// Carrier frequency after applying the channel offset. Channel 1 is the base frequency.
    pub fn carrier_mhz(&self) -> f64 {
        if self.channel == 1 {
            self.frequency_mhz
        } else {
            self.frequency_mhz + f64::from(self.channel) * Self::CHANNEL_SPACING_MHZ
        }
    }

    /// LoRa time on air for a frame of `len` bytes (explicit header, CRC on).
    pub fn time_on_air(&self, len: usize) -> Duration {
        let sf = f64::from(self.mode.spreading_factor());
        let bw = f64::from(self.mode.bandwidth_hz());
        let symbol = 2f64.powf(sf) / bw;
        // low data rate optimisation is mandated above 16 ms symbols
        let de = if symbol > 0.016 { 1.0 } else { 0.0 };

        let preamble = (f64::from(self.preamble_symbols) + 4.25) * symbol;
        let numerator = 8.0 * len as f64 - 4.0 * sf + 28.0 + 16.0;
        let denominator = 4.0 * (sf - 2.0 * de);
        let payload_symbols =
            8.0 + ((numerator / denominator).ceil() * (f64::from(self.coding_rate) + 4.0)).max(0.0);

        Duration::from_secs_f64(preamble + payload_symbols * symbol)
    }
}
