//! simulation tools for the LoRa TAP bridge

pub mod scenarios;

use std::time::Duration;

use loratap_radio::ChannelConditions;

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn ideal_conditions() -> ChannelConditions {
        ChannelConditions::ideal()
    }

    pub fn good_conditions() -> ChannelConditions {
        ChannelConditions {
            packet_loss: 0.02,
            latency: Duration::from_millis(10),
            airtime_scale: 1.0,
        }
    }

    pub fn average_conditions() -> ChannelConditions {
        ChannelConditions {
            packet_loss: 0.10,
            latency: Duration::from_millis(30),
            airtime_scale: 1.0,
        }
    }

    /// Edge of range, one frame in four lost.
    pub fn poor_conditions() -> ChannelConditions {
        ChannelConditions {
            packet_loss: 0.25,
            latency: Duration::from_millis(80),
            airtime_scale: 1.0,
        }
    }
}
