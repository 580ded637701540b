//! Virtual network interface contract and adapters.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

/// Largest frame read from an interface in one call.
pub const INTERFACE_MTU: usize = 2048;

#[async_trait]
pub trait VirtualInterface: Send + Sync {
    /// Block until the OS hands over one frame.
    async fn read_frame(&self) -> io::Result<Bytes>;

    async fn write_frame(&self, frame: &[u8]) -> io::Result<()>;
}

/// Interface backed by a byte stream pair, e.g. the two halves of a TAP device.
/// Every successful read is treated as exactly one frame.
pub struct StreamInterface<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl<R, W> StreamInterface<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<R, W> VirtualInterface for StreamInterface<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_frame(&self) -> io::Result<Bytes> {
        let mut buf = vec![0u8; INTERFACE_MTU];
        let len = self.reader.lock().await.read(&mut buf).await?;
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "interface closed"));
        }
        buf.truncate(len);
        Ok(Bytes::from(buf))
    }

    async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    }
}

/// In-process interface: frames pushed into the peer come out of `read_frame`
/// and frames written by the bridge come out of the peer.
pub struct MemoryInterface {
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// The host side of a [`MemoryInterface`].
pub struct MemoryPeer {
    pub to_bridge: mpsc::UnboundedSender<Bytes>,
    pub from_bridge: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryInterface {
    pub fn pair() -> (Self, MemoryPeer) {
        let (to_bridge, inbound) = mpsc::unbounded_channel();
        let (outbound, from_bridge) = mpsc::unbounded_channel();
        (
            Self {
                inbound: Mutex::new(inbound),
                outbound,
            },
            MemoryPeer {
                to_bridge,
                from_bridge,
            },
        )
    }
}

#[async_trait]
impl VirtualInterface for MemoryInterface {
    async fn read_frame(&self) -> io::Result<Bytes> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "interface closed"))
    }

    async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        self.outbound
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "interface closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_stream_reads_one_frame_per_read() {
        let reader = Builder::new().read(b"first").read(b"second").build();
        let writer = Builder::new().build();
        let iface = StreamInterface::new(reader, writer);

        assert_eq!(iface.read_frame().await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(iface.read_frame().await.unwrap(), Bytes::from_static(b"second"));
        let eof = iface.read_frame().await.unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_stream_write() {
        let reader = Builder::new().build();
        let writer = Builder::new().write(b"pong").build();
        let iface = StreamInterface::new(reader, writer);

        iface.write_frame(b"pong").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_pair() {
        let (iface, mut peer) = MemoryInterface::pair();

        peer.to_bridge.send(Bytes::from_static(b"out")).unwrap();
        assert_eq!(iface.read_frame().await.unwrap(), Bytes::from_static(b"out"));

        iface.write_frame(b"in").await.unwrap();
        assert_eq!(peer.from_bridge.recv().await.unwrap(), Bytes::from_static(b"in"));

        drop(peer);
        assert!(iface.read_frame().await.is_err());
        assert!(iface.write_frame(b"lost").await.is_err());
    }
}
