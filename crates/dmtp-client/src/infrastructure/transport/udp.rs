//! Simplex transport over UDP.
//!
//! Nothing touches the network until `close(true)`: every packet written
//! during the session is appended to one buffer, and the buffer is sent as a
//! single datagram on close.  The server therefore sees a simplex session
//! atomically or not at all.

use async_trait::async_trait;
use dmtp_core::TransportType;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::application::transport::{Transport, TransportError};

/// Largest datagram the transport will send.
pub const MAX_DATAGRAM: usize = 1400;

/// UDP transport for simplex sessions.
pub struct UdpSimplexTransport {
    addr: String,
    buffer: Vec<u8>,
    open: bool,
}

impl UdpSimplexTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            buffer: Vec::new(),
            open: false,
        }
    }

    /// Bytes buffered for the next flush.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[async_trait]
impl Transport for UdpSimplexTransport {
    fn kind(&self) -> TransportType {
        TransportType::Simplex
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.buffer.clear();
        self.open = true;
        Ok(())
    }

    async fn close(&mut self, send_pending: bool) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let datagram = std::mem::take(&mut self.buffer);
        if !send_pending || datagram.is_empty() {
            debug!("simplex close without send ({} bytes discarded)", datagram.len());
            return Ok(());
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(&self.addr)
            .await
            .map_err(|source| TransportError::ConnectFailed {
                addr: self.addr.clone(),
                source,
            })?;
        let sent = socket.send(&datagram).await?;
        info!("simplex datagram sent to {} ({sent} bytes)", self.addr);
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Unsupported(TransportType::Simplex))
    }

    async fn write_packet(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.buffer.len() + bytes.len() > MAX_DATAGRAM {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("simplex datagram would exceed {MAX_DATAGRAM} bytes"),
            )));
        }
        self.buffer.extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_sends_one_datagram() {
        // Arrange
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = server.local_addr().unwrap().to_string();
        let mut t = UdpSimplexTransport::new(addr);

        // Act
        t.open().await.unwrap();
        t.write_packet(&[0xE0, 0x30, 0x00]).await.unwrap();
        t.write_packet(&[0xE0, 0x00, 0x00]).await.unwrap();
        t.close(true).await.unwrap();

        // Assert
        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xE0, 0x30, 0x00, 0xE0, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_close_without_send_discards() {
        let mut t = UdpSimplexTransport::new("127.0.0.1:9");
        t.open().await.unwrap();
        t.write_packet(&[1, 2, 3]).await.unwrap();
        assert_eq!(t.pending_len(), 3);

        t.close(false).await.unwrap();

        assert_eq!(t.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_read_is_unsupported() {
        let mut t = UdpSimplexTransport::new("127.0.0.1:9");
        assert!(matches!(t.read_packet().await, Err(TransportError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_oversized_block_is_rejected() {
        let mut t = UdpSimplexTransport::new("127.0.0.1:9");
        t.open().await.unwrap();
        let big = vec![0u8; 258];
        for _ in 0..5 {
            t.write_packet(&big).await.unwrap();
        }
        assert!(t.write_packet(&big).await.is_err());
    }

    #[tokio::test]
    async fn test_write_requires_open() {
        let mut t = UdpSimplexTransport::new("127.0.0.1:9");
        assert!(matches!(t.write_packet(&[1]).await, Err(TransportError::NotOpen)));
    }
}
