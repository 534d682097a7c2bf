//! Duplex transport over TCP.

use std::time::Duration;

use async_trait::async_trait;
use dmtp_core::protocol::{ASCII_PACKET_END, ASCII_PACKET_START, HEADER_BASIC};
use dmtp_core::TransportType;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time,
};
use tracing::{debug, info};

use crate::application::transport::{Transport, TransportError};

/// Longest ASCII packet line accepted: `$HHTT=` plus base64 of 255 bytes,
/// a checksum and the line end, with headroom.
const MAX_ASCII_LINE: u64 = 512;

/// TCP client transport for duplex sessions.
pub struct TcpDuplexTransport {
    addr: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpDuplexTransport {
    /// Creates a (not yet connected) transport for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            read_timeout,
            stream: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

fn is_frame_start(b: u8) -> bool {
    b == HEADER_BASIC || b == ASCII_PACKET_START
}

/// Reads one packet whose first byte is already buffered.
///
/// Buffered bytes that cannot start a packet are returned together as one
/// frame up to the next `0xE0` or `$`, which the decoder rejects with a
/// single header error.  The stream is then aligned on the next packet.
async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let buf = reader.fill_buf().await?;
    let Some(&first) = buf.first() else {
        return Err(TransportError::Closed);
    };
    if !is_frame_start(first) {
        let run = buf.iter().position(|b| is_frame_start(*b)).unwrap_or(buf.len());
        let junk = buf[..run].to_vec();
        reader.consume(run);
        debug!(bytes = run, "discarding unframed bytes");
        return Ok(junk);
    }
    reader.consume(1);

    if first == HEADER_BASIC {
        let mut hdr = [0u8; 2];
        reader.read_exact(&mut hdr).await?;
        let len = hdr[1] as usize;
        let mut frame = Vec::with_capacity(3 + len);
        frame.push(first);
        frame.extend_from_slice(&hdr);
        frame.resize(3 + len, 0);
        reader.read_exact(&mut frame[3..]).await?;
        Ok(frame)
    } else {
        let mut line = vec![first];
        let mut limited = reader.take(MAX_ASCII_LINE);
        let n = limited.read_until(ASCII_PACKET_END, &mut line).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(line)
    }
}

#[async_trait]
impl Transport for TcpDuplexTransport {
    fn kind(&self) -> TransportType {
        TransportType::Duplex
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = match time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Err(_) => return Err(TransportError::ConnectTimeout(self.addr.clone())),
            Ok(Err(source)) => {
                return Err(TransportError::ConnectFailed {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Ok(Ok(s)) => s,
        };
        stream.set_nodelay(true).ok();
        info!("duplex connection open to {}", self.addr);
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn close(&mut self, _send_pending: bool) -> Result<(), TransportError> {
        if let Some(mut reader) = self.stream.take() {
            if let Err(e) = reader.get_mut().shutdown().await {
                debug!("shutdown of {} failed: {e}", self.addr);
            }
            info!("duplex connection to {} closed", self.addr);
        }
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        let timeout = self.read_timeout;
        let reader = self.stream.as_mut().ok_or(TransportError::NotOpen)?;

        // Wait for the first byte without consuming it, so a timeout here
        // leaves the stream aligned on a packet boundary.
        match time::timeout(timeout, reader.fill_buf()).await {
            Err(_) => return Err(TransportError::Timeout),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok([])) => return Err(TransportError::Closed),
            Ok(Ok(_)) => {}
        }

        match time::timeout(timeout, read_frame(reader)).await {
            Ok(Err(TransportError::Io(e))) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TransportError::Closed)
            }
            Ok(result) => result,
            Err(_) => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out inside a packet",
            ))),
        }
    }

    async fn write_packet(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let reader = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        reader.get_mut().write_all(bytes).await?;
        Ok(bytes.len())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let l = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = l.local_addr().expect("addr").to_string();
        (l, addr)
    }

    #[tokio::test]
    async fn test_reads_binary_and_ascii_frames() {
        // Arrange
        let (l, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut s, _) = l.accept().await.expect("accept");
            s.write_all(&[0xE0, 0xA0, 0x01, 0x07]).await.unwrap();
            s.write_all(b"$E0FF:#1F\n").await.unwrap();
            let mut buf = [0u8; 3];
            s.read_exact(&mut buf).await.unwrap();
            buf
        });
        let mut t = TcpDuplexTransport::new(addr, Duration::from_secs(2), Duration::from_secs(2));

        // Act
        t.open().await.expect("open");
        let a = t.read_packet().await.expect("binary");
        let b = t.read_packet().await.expect("ascii");
        t.write_packet(&[0xE0, 0x00, 0x00]).await.expect("write");

        // Assert
        assert_eq!(a, vec![0xE0, 0xA0, 0x01, 0x07]);
        assert_eq!(b, b"$E0FF:#1F\n".to_vec());
        assert_eq!(server.await.unwrap(), [0xE0, 0x00, 0x00]);
        t.close(true).await.unwrap();
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn test_read_frame_skips_stray_run_to_next_header() {
        // Arrange
        let mut input: &[u8] = &[0x41, 0x42, 0x43, 0xE0, 0xA0, 0x01, 0x07, b'!', b'$', b'E', b'0', b'F', b'F', b':', b'\n'];

        // Act
        let junk = read_frame(&mut input).await.expect("junk run");
        let binary = read_frame(&mut input).await.expect("binary frame");
        let stray = read_frame(&mut input).await.expect("single stray byte");
        let ascii = read_frame(&mut input).await.expect("ascii frame");

        // Assert
        assert_eq!(junk, vec![0x41, 0x42, 0x43]);
        assert_eq!(binary, vec![0xE0, 0xA0, 0x01, 0x07]);
        assert_eq!(stray, vec![b'!']);
        assert_eq!(ascii, b"$E0FF:\n".to_vec());
        assert!(matches!(read_frame(&mut input).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_stray_bytes_are_one_frame_before_the_next_packet() {
        // Arrange
        let (l, addr) = listener().await;
        let _server = tokio::spawn(async move {
            let (mut s, _) = l.accept().await.expect("accept");
            s.write_all(&[0x41, 0x42, 0x0D, 0x0A, 0xE0, 0xA0, 0x00]).await.unwrap();
            time::sleep(Duration::from_secs(1)).await;
        });
        let mut t = TcpDuplexTransport::new(addr, Duration::from_secs(2), Duration::from_secs(2));
        t.open().await.expect("open");

        // Act
        let mut frames = vec![t.read_packet().await.expect("first frame")];
        while frames.last().map(|f| f[0]) != Some(HEADER_BASIC) {
            frames.push(t.read_packet().await.expect("next frame"));
        }

        // Assert
        let ack = frames.pop().expect("valid frame");
        assert_eq!(ack, vec![0xE0, 0xA0, 0x00]);
        assert_eq!(frames.concat(), vec![0x41, 0x42, 0x0D, 0x0A]);
        let errors: Vec<_> = frames
            .iter()
            .map(|f| dmtp_core::protocol::decode_packet(f, false).unwrap_err().kind)
            .collect();
        assert!(errors.iter().all(|k| *k == dmtp_core::protocol::PacketErrorKind::Header));
        assert!(dmtp_core::protocol::decode_packet(&ack, false).is_ok());
    }

    #[tokio::test]
    async fn test_read_times_out_when_server_is_silent() {
        let (l, addr) = listener().await;
        let _server = tokio::spawn(async move {
            let (s, _) = l.accept().await.expect("accept");
            time::sleep(Duration::from_secs(5)).await;
            drop(s);
        });
        let mut t = TcpDuplexTransport::new(addr, Duration::from_secs(2), Duration::from_millis(50));
        t.open().await.expect("open");

        let err = t.read_packet().await.unwrap_err();

        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_read_reports_closed_connection() {
        let (l, addr) = listener().await;
        tokio::spawn(async move {
            let (s, _) = l.accept().await.expect("accept");
            drop(s);
        });
        let mut t = TcpDuplexTransport::new(addr, Duration::from_secs(2), Duration::from_secs(2));
        t.open().await.expect("open");

        let err = t.read_packet().await.unwrap_err();

        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_write_before_open_fails() {
        let mut t = TcpDuplexTransport::new("127.0.0.1:1", Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(t.write_packet(&[1]).await, Err(TransportError::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_refused_is_connect_failed() {
        // Arrange – bind then drop to get a port nobody listens on
        let (l, addr) = listener().await;
        drop(l);
        let mut t = TcpDuplexTransport::new(addr, Duration::from_secs(2), Duration::from_secs(1));

        // Act / Assert
        assert!(matches!(t.open().await, Err(TransportError::ConnectFailed { .. })));
    }
}
