//! Simulated shared air for testing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, trace};
use rand::Rng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;

use crate::{ModeState, RadioConfig, RadioError, RadioMode, RadioTransport, TransmitComplete, RADIO_MTU};

#[derive(Debug, Clone)]
pub struct ChannelConditions {
    /// Probability that a frame is lost on its way to one station.
    pub packet_loss: f32,
    /// Propagation plus demodulation delay added after airtime.
    pub latency: Duration,
    /// Multiplier on LoRa airtime. 0 disables airtime sleeps.
    pub airtime_scale: f64,
}

impl ChannelConditions {
    pub fn ideal() -> Self {
        Self {
            packet_loss: 0.0,
            latency: Duration::ZERO,
            airtime_scale: 0.0,
        }
    }
}

impl Default for ChannelConditions {
    fn default() -> Self {
        Self {
            packet_loss: 0.05,
            latency: Duration::from_millis(20),
            airtime_scale: 1.0,
        }
    }
}

struct Station {
    mode: ModeState,
    inbox: mpsc::UnboundedSender<Bytes>,
}

#[derive(Debug, Default)]
struct AirStats {
    frames_sent: u64,
    frames_dropped: u64,
    frames_delivered: u64,
}

/// Every joined station hears every other station's transmissions.
#[derive(Clone)]
pub struct SimulatedAir {
    conditions: ChannelConditions,
    stations: Arc<RwLock<HashMap<u8, Station>>>,
    stats: Arc<Mutex<AirStats>>,
}

impl SimulatedAir {
    pub fn new(conditions: ChannelConditions) -> Self {
        info!("Simulated air initialized with {:?}", conditions);
        Self {
            conditions,
            stations: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(Mutex::new(AirStats::default())),
        }
    }

    /// Add a station; returns its radio and the channel its received frames arrive on.
    pub async fn join(&self, station: u8) -> (SimulatedRadio, mpsc::UnboundedReceiver<Bytes>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let mode = ModeState::default();
        self.stations.write().await.insert(
            station,
            Station {
                mode: mode.clone(),
                inbox,
            },
        );
        let radio = SimulatedRadio {
            station,
            air: self.clone(),
            mode,
            config: RadioConfig::default(),
        };
        (radio, rx)
    }

    /// (sent, dropped, delivered)
    pub async fn get_stats(&self) -> (u64, u64, u64) {
        let stats = self.stats.lock().await;
        (stats.frames_sent, stats.frames_dropped, stats.frames_delivered)
    }

    async fn broadcast(&self, from: u8, frame: Bytes) {
        let stations = self.stations.read().await;
        let mut stats = self.stats.lock().await;
        stats.frames_sent += 1;

        for (&id, station) in stations.iter() {
            if id == from {
                continue;
            }
            if !station.mode.is_receiving() {
                trace!("Station {} not listening, frame from {} missed", id, from);
                stats.frames_dropped += 1;
                continue;
            }
            if self.conditions.packet_loss > 0.0
                && rand::rng().random::<f32>() < self.conditions.packet_loss
            {
                debug!("Simulated loss of frame from {} to {}", from, id);
                stats.frames_dropped += 1;
                continue;
            }

            stats.frames_delivered += 1;
            if self.conditions.latency.is_zero() {
                let _ = station.inbox.send(frame.clone());
            } else {
                let inbox = station.inbox.clone();
                let frame = frame.clone();
                let latency = self.conditions.latency;
                tokio::spawn(async move {
                    sleep(latency).await;
                    let _ = inbox.send(frame);
                });
            }
        }
    }
}

pub struct SimulatedRadio {
    station: u8,
    air: SimulatedAir,
    mode: ModeState,
    config: RadioConfig,
}

impl SimulatedRadio {
    pub fn mode(&self) -> RadioMode {
        self.mode.get()
    }
}

#[async_trait]
impl RadioTransport for SimulatedRadio {
    async fn configure(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        self.config = config.clone();
        self.mode.set(RadioMode::Standby);
        debug!(
            "Station {} configured: {:.1} MHz {:?}",
            self.station,
            config.carrier_mhz(),
            config.mode
        );
        Ok(())
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<TransmitComplete, RadioError> {
        if frame.len() > RADIO_MTU {
            return Err(RadioError::PacketTooLarge {
                len: frame.len(),
                mtu: RADIO_MTU,
            });
        }

        self.mode.set(RadioMode::Transmit);
        let airtime = self.config.time_on_air(frame.len());
        let scale = self.air.conditions.airtime_scale;
        if scale > 0.0 {
            sleep(airtime.mul_f64(scale)).await;
        }
        self.air.broadcast(self.station, Bytes::copy_from_slice(frame)).await;
        self.mode.set(RadioMode::Standby);

        Ok(TransmitComplete {
            bytes: frame.len(),
            airtime,
        })
    }

    async fn set_receive_mode(&mut self) -> Result<(), RadioError> {
        self.mode.set(RadioMode::Receive);
        Ok(())
    }
}
