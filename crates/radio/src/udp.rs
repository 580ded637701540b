//! LoRa air emulated over UDP datagrams, for bench setups without RF hardware.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::{ModeState, RadioConfig, RadioError, RadioMode, RadioTransport, TransmitComplete, RADIO_MTU};

pub struct UdpRadio {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    mode: ModeState,
    config: RadioConfig,
}

impl UdpRadio {
    /// Bind the local end and start the receive task.
    pub async fn bind(
        local: SocketAddr,
        peers: Vec<SocketAddr>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Bytes>), RadioError> {
        let socket = Arc::new(UdpSocket::bind(local).await?);
        let mode = ModeState::default();
        let (tx, rx) = mpsc::unbounded_channel();

        info!("UDP radio bound to {}, {} peer(s)", socket.local_addr()?, peers.len());
        tokio::spawn(receive_loop(socket.clone(), mode.clone(), tx));

        Ok((
            Self {
                socket,
                peers,
                mode,
                config: RadioConfig::default(),
            },
            rx,
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RadioError> {
        Ok(self.socket.local_addr()?)
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, mode: ModeState, tx: mpsc::UnboundedSender<Bytes>) {
    let mut buf = vec![0u8; RADIO_MTU + 1];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("UDP radio receive error: {}", e);
                continue;
            }
        };
        if len > RADIO_MTU {
            debug!("Discarding oversized datagram from {}", from);
            continue;
        }
        if !mode.is_receiving() {
            trace!("Radio not listening, datagram from {} lost", from);
            continue;
        }
        if tx.send(Bytes::copy_from_slice(&buf[..len])).is_err() {
            debug!("Receive channel closed, UDP radio receive task stopping");
            return;
        }
    }
}

#[async_trait]
impl RadioTransport for UdpRadio {
    async fn configure(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        self.config = config.clone();
        self.mode.set(RadioMode::Standby);
        info!(
            "Radio configured: {:.1} MHz, {} kHz, SF{}, power {:#04x}",
            config.carrier_mhz(),
            config.mode.bandwidth_hz() / 1000,
            config.mode.spreading_factor(),
            config.output_power
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
        sleep(airtime).await;
        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(frame, peer).await {
                self.mode.set(RadioMode::Standby);
                return Err(RadioError::TransmissionFailed(format!("{peer}: {e}")));
            }
        }
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
