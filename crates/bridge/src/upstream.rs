//! Upstream relay used by the gateway to reach the conventional network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::trace;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::BridgeError;

#[async_trait]
pub trait UpstreamRelay: Send + Sync {
    /// Send `payload` to `address` and return its reply.
    async fn forward(&self, address: SocketAddr, payload: &[u8]) -> Result<Bytes, BridgeError>;
}

#[async_trait]
impl<T: UpstreamRelay + ?Sized> UpstreamRelay for Arc<T> {
    async fn forward(&self, address: SocketAddr, payload: &[u8]) -> Result<Bytes, BridgeError> {
        (**self).forward(address, payload).await
    }
}

/// One TCP exchange per payload: connect, write, read a single reply, close.
#[derive(Debug, Clone)]
pub struct TcpRelay {
    timeout: Duration,
    max_response: usize,
}

impl Default for TcpRelay {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_response: 2048,
        }
    }
}

impl TcpRelay {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    async fn exchange(&self, address: SocketAddr, payload: &[u8]) -> std::io::Result<Bytes> {
        let mut stream = TcpStream::connect(address).await?;
        stream.write_all(payload).await?;

        let mut buf = vec![0u8; self.max_response];
        let len = stream.read(&mut buf).await?;
        buf.truncate(len);
        trace!("Upstream {} answered {} bytes", address, len);
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl UpstreamRelay for TcpRelay {
    async fn forward(&self, address: SocketAddr, payload: &[u8]) -> Result<Bytes, BridgeError> {
        timeout(self.timeout, self.exchange(address, payload))
            .await
            .map_err(|_| BridgeError::UpstreamTimeout(address))?
            .map_err(|source| BridgeError::UpstreamForward { address, source })
    }
}
