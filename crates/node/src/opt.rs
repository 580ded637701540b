use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use loratap_bridge::{DeliveryPolicy, DeviceTable};
use loratap_radio::{FrameCodec, LoraMode, PayloadCipher, RadioConfig, GATEWAY_DEVICE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Gateway,
    Client,
}

/// Bridges a TAP interface over a half-duplex LoRa link
#[derive(Parser, Debug)]
#[clap(name = "loratap", long_about = None)]
pub struct Opt {
    /// Run as the gateway or as a client
    #[clap(long, value_enum)]
    pub mode: Mode,
    /// This node's device id
    #[clap(long)]
    pub device_id: u8,
    /// Device id the gateway transmits with
    #[clap(long, default_value_t = GATEWAY_DEVICE_ID)]
    pub gateway_id: u8,
    /// Base frequency in MHz
    #[clap(long, default_value = "915.0")]
    pub lora_freq: f64,
    /// Channel number; channels other than 1 add 0.2 MHz per step
    #[clap(long, default_value = "1")]
    pub lora_channel: u8,
    /// Modulation preset: LongFast or ShortSlow
    #[clap(long, default_value = "LongFast")]
    pub lora_mode: LoraMode,
    /// PA output power register value
    #[clap(long, default_value = "15")]
    pub tx_power: u8,
    /// Transmissions per payload before giving up
    #[clap(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..))]
    pub retries: u32,
    /// Seconds to wait for an ACK
    #[clap(long, default_value = "2.0")]
    pub timeout: f64,
    /// TAP device name (client mode)
    #[clap(long, default_value = "tap0")]
    pub tap_device: String,
    /// Pre-shared key, 16, 24 or 32 bytes
    #[clap(long)]
    pub encryption_key: Option<String>,
    /// Static route ID=ADDR for the gateway; repeatable
    #[clap(long = "route", value_parser = parse_route)]
    pub routes: Vec<(u8, SocketAddr)>,
    /// JSON file of {"id": "addr"} routes
    #[clap(long)]
    pub routes_file: Option<PathBuf>,
    /// Seconds allowed for one upstream exchange
    #[clap(long, default_value = "10")]
    pub upstream_timeout: f64,
    /// Local UDP address of the emulated air
    #[clap(long, default_value = "0.0.0.0:7300")]
    pub radio_bind: SocketAddr,
    /// UDP address of another station; repeatable
    #[clap(long = "radio-peer")]
    pub radio_peers: Vec<SocketAddr>,
}

fn parse_route(route: &str) -> Result<(u8, SocketAddr), String> {
    DeviceTable::parse_route(route).map_err(|e| e.to_string())
}

impl Opt {
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            Mode::Client if self.device_id == self.gateway_id => {
                bail!("device id {} is reserved for the gateway", self.gateway_id);
            }
            // clients only accept ACK and RESPONSE frames sent from --gateway-id
            Mode::Gateway if self.device_id != self.gateway_id => {
                bail!(
                    "gateway device id {} does not match --gateway-id {}",
                    self.device_id,
                    self.gateway_id
                );
            }
            _ => {}
        }
        if !(self.timeout > 0.0) {
            bail!("--timeout must be positive");
        }
        if !(self.upstream_timeout > 0.0) {
            bail!("--upstream-timeout must be positive");
        }
        Ok(())
    }

    pub fn radio_config(&self) -> RadioConfig {
        RadioConfig {
            frequency_mhz: self.lora_freq,
            channel: self.lora_channel,
            mode: self.lora_mode,
            output_power: self.tx_power,
            ..Default::default()
        }
    }

    pub fn codec(&self) -> Result<FrameCodec> {
        let cipher = self
            .encryption_key
            .as_deref()
            .map(|key| PayloadCipher::new(key.as_bytes()))
            .transpose()
            .context("invalid --encryption-key")?;
        Ok(FrameCodec::new(cipher))
    }

    pub fn policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            attempts: self.retries,
            ack_timeout: Duration::from_secs_f64(self.timeout),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.upstream_timeout)
    }

    pub fn device_table(&self) -> Result<DeviceTable> {
        let mut table = match &self.routes_file {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                DeviceTable::from_json(&json)?
            }
            None => DeviceTable::new(),
        };
        for &(id, address) in &self.routes {
            table.insert(id, address);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opt {
        Opt::try_parse_from(std::iter::once("loratap").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let opt = parse(&["--mode", "client", "--device-id", "1"]);
        assert_eq!(opt.policy(), DeliveryPolicy::default());
        assert_eq!(opt.lora_mode, LoraMode::LongFast);
        assert_eq!(opt.tap_device, "tap0");
        assert!(!opt.codec().unwrap().is_encrypted());
        opt.validate().unwrap();
    }

    #[test]
    fn test_gateway_routes() {
        let opt = parse(&[
            "--mode", "gateway", "--device-id", "0",
            "--route", "1=192.0.2.1", "--route", "2=192.0.2.2:8080",
            "--lora-mode", "ShortSlow", "--lora-channel", "2",
        ]);
        let table = opt.device_table().unwrap();
        assert_eq!(table.lookup(1), Some("192.0.2.1:80".parse().unwrap()));
        assert_eq!(table.lookup(2), Some("192.0.2.2:8080".parse().unwrap()));

        let radio = opt.radio_config();
        assert_eq!(radio.mode, LoraMode::ShortSlow);
        assert!((radio.carrier_mhz() - 915.4).abs() < 1e-9);
    }

    #[test]
    fn test_rejections() {
        let opt = parse(&["--mode", "client", "--device-id", "0"]);
        assert!(opt.validate().is_err());

        let opt = parse(&["--mode", "gateway", "--device-id", "3"]);
        assert!(opt.validate().is_err());
        let opt = parse(&["--mode", "gateway", "--device-id", "3", "--gateway-id", "3"]);
        opt.validate().unwrap();

        let opt = parse(&["--mode", "client", "--device-id", "1", "--encryption-key", "short"]);
        assert!(opt.codec().is_err());

        assert!(Opt::try_parse_from(["loratap", "--mode", "client", "--device-id", "1", "--retries", "0"]).is_err());
        assert!(Opt::try_parse_from(["loratap", "--mode", "gateway", "--device-id", "0", "--route", "x"]).is_err());
    }
}
