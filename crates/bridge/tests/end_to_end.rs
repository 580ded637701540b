use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{timeout, Instant};

use loratap_bridge::{
    AckRendezvous, BridgeError, ClientInbound, ClientNode, DeliveryPolicy, DeviceTable, GatewayNode,
    MemoryInterface, MemoryPeer, ReliableSender, Session, UpstreamRelay,
};
use loratap_radio::{
    ChannelConditions, FrameCodec, OutboundQueue, PayloadCipher, RadioConfig, RadioTransport,
    SimulatedAir, TransmitScheduler, GATEWAY_DEVICE_ID,
};

const CLIENT_ID: u8 = 1;

/// Answers "ping" with "pong", echoes anything else.
#[derive(Default)]
struct PingPong {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl UpstreamRelay for PingPong {
    async fn forward(&self, address: SocketAddr, payload: &[u8]) -> Result<Bytes, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BridgeError::UpstreamTimeout(address));
        }
        Ok(if payload == b"ping" {
            Bytes::from_static(b"pong")
        } else {
            Bytes::copy_from_slice(payload)
        })
    }
}

async fn start_gateway(air: &SimulatedAir, codec: FrameCodec, devices: DeviceTable, upstream: Arc<PingPong>) {
    let (mut radio, received) = air.join(GATEWAY_DEVICE_ID).await;
    radio.configure(&RadioConfig::default()).await.unwrap();
    let (queue, outbound) = OutboundQueue::new();
    TransmitScheduler::new(radio, outbound).spawn();

    let session = Arc::new(Session::new(GATEWAY_DEVICE_ID, codec));
    let node = GatewayNode::new(session, Arc::new(devices), queue, upstream);
    tokio::spawn(node.run(received));
}

struct TestClient {
    sender: ReliableSender,
    peer: MemoryPeer,
}

async fn start_client(air: &SimulatedAir, codec: FrameCodec, policy: DeliveryPolicy) -> TestClient {
    let (radio, received) = air.join(CLIENT_ID).await;
    let (queue, outbound) = OutboundQueue::new();
    TransmitScheduler::new(radio, outbound).spawn();

    let session = Arc::new(Session::new(CLIENT_ID, codec));
    let (iface, peer) = MemoryInterface::pair();
    let acks = Arc::new(AckRendezvous::new());
    let sender = ReliableSender::new(session.clone(), queue, acks.clone(), policy);
    tokio::spawn(ClientInbound::new(session, acks, Arc::new(iface)).run(received));

    TestClient { sender, peer }
}

fn routed() -> DeviceTable {
    DeviceTable::new().with_route(CLIENT_ID, "192.0.2.10:80".parse().unwrap())
}

fn policy() -> DeliveryPolicy {
    DeliveryPolicy {
        attempts: 3,
        ack_timeout: Duration::from_secs(1),
    }
}

async fn ping_pong(codec: FrameCodec) {
    let air = SimulatedAir::new(ChannelConditions::ideal());
    let upstream = Arc::new(PingPong::default());
    start_gateway(&air, codec.clone(), routed(), upstream.clone()).await;
    let mut client = start_client(&air, codec, policy()).await;

    let start = Instant::now();
    let delivery = client.sender.send_reliable(b"ping", 5).await.unwrap();
    assert_eq!(delivery.sequence, 5);
    assert_eq!(delivery.attempts, 1);
    assert!(start.elapsed() < Duration::from_secs(1));

    let response = timeout(Duration::from_secs(2), client.peer.from_bridge.recv())
        .await
        .expect("RESPONSE within two seconds")
        .unwrap();
    assert_eq!(response, Bytes::from_static(b"pong"));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ping_is_acked_then_answered() {
    ping_pong(FrameCodec::plaintext()).await;
}

#[tokio::test]
async fn ping_is_acked_then_answered_encrypted() {
    let cipher = PayloadCipher::new(b"sixteen byte key").unwrap();
    ping_pong(FrameCodec::new(Some(cipher))).await;
}

#[tokio::test]
async fn unknown_device_is_acked_but_not_relayed() {
    let air = SimulatedAir::new(ChannelConditions::ideal());
    let upstream = Arc::new(PingPong::default());
    start_gateway(&air, FrameCodec::plaintext(), DeviceTable::new(), upstream.clone()).await;
    let mut client = start_client(&air, FrameCodec::plaintext(), policy()).await;

    let delivery = client.sender.send_reliable(b"ping", 0).await.unwrap();
    assert_eq!(delivery.attempts, 1);

    let response = timeout(Duration::from_millis(300), client.peer.from_bridge.recv()).await;
    assert!(response.is_err(), "no RESPONSE for an unrouted device");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_upstream_produces_no_response() {
    let air = SimulatedAir::new(ChannelConditions::ideal());
    let upstream = Arc::new(PingPong {
        fail: true,
        ..Default::default()
    });
    start_gateway(&air, FrameCodec::plaintext(), routed(), upstream.clone()).await;
    let mut client = start_client(&air, FrameCodec::plaintext(), policy()).await;

    client.sender.send_reliable(b"ping", 1).await.unwrap();
    let response = timeout(Duration::from_millis(300), client.peer.from_bridge.recv()).await;
    assert!(response.is_err());
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn key_mismatch_exhausts_retries() {
    let air = SimulatedAir::new(ChannelConditions::ideal());
    let gateway_codec = FrameCodec::new(Some(PayloadCipher::new(b"gateway key 0001").unwrap()));
    let client_codec = FrameCodec::new(Some(PayloadCipher::new(b"client key 00001").unwrap()));
    start_gateway(&air, gateway_codec, routed(), Arc::new(PingPong::default())).await;
    let client = start_client(
        &air,
        client_codec,
        DeliveryPolicy {
            attempts: 2,
            ack_timeout: Duration::from_millis(100),
        },
    )
    .await;

    let err = client.sender.send_reliable(b"ping", 3).await.unwrap_err();
    assert!(matches!(err, BridgeError::DeliveryExhausted { sequence: 3, attempts: 2 }));
}

#[tokio::test]
async fn client_node_round_trips_interface_frames() {
    let air = SimulatedAir::new(ChannelConditions::ideal());
    start_gateway(&air, FrameCodec::plaintext(), routed(), Arc::new(PingPong::default())).await;

    let (radio, received) = air.join(CLIENT_ID).await;
    let (queue, outbound) = OutboundQueue::new();
    TransmitScheduler::new(radio, outbound).spawn();
    let session = Arc::new(Session::new(CLIENT_ID, FrameCodec::plaintext()).with_first_sequence(5));
    let (iface, mut peer) = MemoryInterface::pair();
    let node = ClientNode::new(session, queue, policy(), Arc::new(iface));
    tokio::spawn(node.inbound().run(received));
    tokio::spawn(node.run());

    for payload in [&b"ping"[..], b"hello", b"ping"] {
        peer.to_bridge.send(Bytes::copy_from_slice(payload)).unwrap();
    }

    let mut replies = Vec::new();
    for _ in 0..3 {
        let reply = timeout(Duration::from_secs(2), peer.from_bridge.recv())
            .await
            .unwrap()
            .unwrap();
        replies.push(reply);
    }
    assert_eq!(
        replies,
        vec![
            Bytes::from_static(b"pong"),
            Bytes::from_static(b"hello"),
            Bytes::from_static(b"pong"),
        ]
    );
}
