//! Gateway and client wired together over simulated air

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use tokio::time::{timeout, Instant};

use loratap_bridge::{
    AckRendezvous, BridgeError, ClientInbound, DeliveryPolicy, DeviceTable, GatewayNode,
    MemoryInterface, MemoryPeer, ReliableSender, Session, UpstreamRelay,
};
use loratap_radio::{
    ChannelConditions, FrameCodec, LoraMode, OutboundQueue, PayloadCipher, RadioConfig,
    RadioTransport, SimulatedAir, TransmitScheduler, GATEWAY_DEVICE_ID,
};

pub const CLIENT_ID: u8 = 1;

/// Upstream that answers "ping" with "pong" and echoes anything else.
#[derive(Default)]
pub struct EchoUpstream {
    exchanges: AtomicU64,
}

impl EchoUpstream {
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UpstreamRelay for EchoUpstream {
    async fn forward(&self, _address: SocketAddr, payload: &[u8]) -> Result<Bytes, BridgeError> {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        Ok(if payload == b"ping" {
            Bytes::from_static(b"pong")
        } else {
            Bytes::copy_from_slice(payload)
        })
    }
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub conditions: ChannelConditions,
    pub radio: RadioConfig,
    pub rounds: u8,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub key: Option<Vec<u8>>,
}

impl Scenario {
    pub fn new(conditions: ChannelConditions, mode: LoraMode) -> Self {
        Self {
            conditions,
            radio: RadioConfig {
                mode,
                ..Default::default()
            },
            rounds: 10,
            payload: b"ping".to_vec(),
            attempts: 3,
            key: None,
        }
    }

    /// Room for a DATA and an ACK on the air plus propagation both ways.
    pub fn ack_timeout(&self) -> Duration {
        let sealed = match self.key {
            Some(_) => PayloadCipher::sealed_len(self.payload.len()),
            None => self.payload.len(),
        };
        let data = self.radio.time_on_air(sealed + 4);
        let ack = self.radio.time_on_air(4);
        (data + ack).mul_f64(self.conditions.airtime_scale.max(0.0) * 1.5)
            + self.conditions.latency * 2
            + Duration::from_millis(250)
    }

    pub fn policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            attempts: self.attempts,
            ack_timeout: self.ack_timeout(),
        }
    }

    fn codec(&self) -> Result<FrameCodec> {
        let cipher = self
            .key
            .as_deref()
            .map(PayloadCipher::new)
            .transpose()
            .context("scenario key")?;
        Ok(FrameCodec::new(cipher))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScenarioReport {
    pub rounds: u8,
    pub acked: u8,
    pub responses: u8,
    pub transmissions: u32,
    pub upstream_exchanges: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_delivered: u64,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn ack_rate(&self) -> f64 {
        if self.rounds == 0 {
            return 0.0;
        }
        f64::from(self.acked) / f64::from(self.rounds)
    }
}

struct Client {
    sender: ReliableSender,
    peer: MemoryPeer,
}

async fn start_gateway(
    air: &SimulatedAir,
    scenario: &Scenario,
    upstream: Arc<EchoUpstream>,
) -> Result<()> {
    let (mut radio, received) = air.join(GATEWAY_DEVICE_ID).await;
    radio.configure(&scenario.radio).await?;
    let (queue, outbound) = OutboundQueue::new();
    TransmitScheduler::new(radio, outbound).spawn();

    let session = Arc::new(Session::new(GATEWAY_DEVICE_ID, scenario.codec()?));
    let devices = DeviceTable::new().with_route(CLIENT_ID, SocketAddr::from(([192, 0, 2, 10], 80)));
    let node = GatewayNode::new(session, Arc::new(devices), queue, upstream);
    tokio::spawn(node.run(received));
    Ok(())
}

async fn start_client(air: &SimulatedAir, scenario: &Scenario) -> Result<Client> {
    let (mut radio, received) = air.join(CLIENT_ID).await;
    radio.configure(&scenario.radio).await?;
    let (queue, outbound) = OutboundQueue::new();
    TransmitScheduler::new(radio, outbound).spawn();

    let session = Arc::new(Session::new(CLIENT_ID, scenario.codec()?));
    let (iface, peer) = MemoryInterface::pair();
    let acks = Arc::new(AckRendezvous::new());
    let sender = ReliableSender::new(session.clone(), queue, acks.clone(), scenario.policy());
    tokio::spawn(ClientInbound::new(session, acks, Arc::new(iface)).run(received));
    Ok(Client { sender, peer })
}

/// One client sends `rounds` payloads to the gateway, each acknowledged
/// and relayed upstream, and waits for the RESPONSE after every ACK.
pub async fn ping_pong(scenario: &Scenario) -> Result<ScenarioReport> {
    info!(
        "ping_pong: {} round(s) on {:?}, loss {:.0}%",
        scenario.rounds,
        scenario.radio.mode,
        scenario.conditions.packet_loss * 100.0
    );

    let air = SimulatedAir::new(scenario.conditions.clone());
    let upstream = Arc::new(EchoUpstream::default());
    start_gateway(&air, scenario, upstream.clone()).await?;
    let mut client = start_client(&air, scenario).await?;

    let response_wait = scenario.ack_timeout() * 2;
    let mut report = ScenarioReport {
        rounds: scenario.rounds,
        ..Default::default()
    };
    let start = Instant::now();

    for sequence in 0..scenario.rounds {
        match client.sender.send_reliable(&scenario.payload, sequence).await {
            Ok(delivery) => {
                report.acked += 1;
                report.transmissions += delivery.attempts;
            }
            Err(e) => {
                debug!("Round {} undelivered: {}", sequence, e);
                report.transmissions += scenario.attempts;
                continue;
            }
        }

        if let Ok(Some(_)) = timeout(response_wait, client.peer.from_bridge.recv()).await {
            report.responses += 1;
        }
    }

    report.elapsed = start.elapsed();
    report.upstream_exchanges = upstream.exchanges();
    (report.frames_sent, report.frames_dropped, report.frames_delivered) = air.get_stats().await;
    Ok(report)
}

/// Time on air of a DATA frame carrying `payload_len` bytes, per preset.
pub fn airtime_table(payload_len: usize, encrypted: bool) -> Vec<(LoraMode, Duration)> {
    let on_air = 4 + if encrypted {
        PayloadCipher::sealed_len(payload_len)
    } else {
        payload_len
    };
    [LoraMode::LongFast, LoraMode::ShortSlow]
        .into_iter()
        .map(|mode| {
            let config = RadioConfig {
                mode,
                ..Default::default()
            };
            (mode, config.time_on_air(on_air))
        })
        .collect()
}
