mod opt;
#[cfg(target_os = "linux")]
mod tap;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::signal;

use loratap_bridge::{ClientNode, GatewayNode, Session, StreamInterface, TcpRelay};
use loratap_radio::{OutboundQueue, RadioTransport, TransmitScheduler, UdpRadio};

use crate::opt::{Mode, Opt};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::parse();
    opt.validate()?;

    let codec = opt.codec()?;
    let radio_config = opt.radio_config();
    info!(
        "Starting {:?} {} on {:.1} MHz, {:?}, encryption {}",
        opt.mode,
        opt.device_id,
        radio_config.carrier_mhz(),
        radio_config.mode,
        if codec.is_encrypted() { "on" } else { "off" }
    );

    let (mut radio, received) = UdpRadio::bind(opt.radio_bind, opt.radio_peers.clone())
        .await
        .with_context(|| format!("binding radio on {}", opt.radio_bind))?;
    radio.configure(&radio_config).await.context("configuring radio")?;

    let (queue, outbound) = OutboundQueue::new();
    let scheduler = TransmitScheduler::new(radio, outbound);
    let stats = scheduler.stats();
    let transmitter = scheduler.spawn();

    let session = Arc::new(Session::new(opt.device_id, codec).with_gateway_id(opt.gateway_id));

    let role = match opt.mode {
        Mode::Gateway => {
            let devices = Arc::new(opt.device_table()?);
            let node = GatewayNode::new(session, devices, queue, TcpRelay::new(opt.upstream_timeout()));
            tokio::spawn(async move {
                node.run(received).await;
                Ok::<_, anyhow::Error>(())
            })
        }
        Mode::Client => {
            let interface = open_interface(&opt.tap_device)?;
            let node = ClientNode::new(session, queue, opt.policy(), Arc::new(interface));
            tokio::spawn(node.inbound().run(received));
            tokio::spawn(async move { node.run().await.map_err(anyhow::Error::from) })
        }
    };

    tokio::select! {
        res = role => match res {
            Ok(Ok(())) => info!("Node stopped"),
            Ok(Err(e)) => error!("Node failed: {:#}", e),
            Err(e) => error!("Node task panicked: {}", e),
        },
        res = transmitter => match res {
            Ok(Ok(())) => info!("Transmit scheduler stopped"),
            Ok(Err(e)) => error!("Transmit scheduler failed: {}", e),
            Err(e) => error!("Transmit scheduler panicked: {}", e),
        },
        _ = signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    let stats = stats.lock().await;
    info!(
        "Transmitted {} frame(s), {} bytes, {} failure(s), {:?} on air",
        stats.frames_transmitted, stats.bytes_transmitted, stats.transmit_failures, stats.airtime
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_interface(
    name: &str,
) -> Result<StreamInterface<tokio::io::ReadHalf<tap::TapDevice>, tokio::io::WriteHalf<tap::TapDevice>>> {
    let device = tap::TapDevice::open(name).with_context(|| format!("opening TAP device {name}"))?;
    info!("Bridging {}", device.name());
    let (reader, writer) = tokio::io::split(device);
    Ok(StreamInterface::new(reader, writer))
}

#[cfg(not(target_os = "linux"))]
fn open_interface(name: &str) -> Result<StreamInterface<tokio::io::Stdin, tokio::io::Stdout>> {
    anyhow::bail!("TAP device {name} is only supported on Linux")
}
