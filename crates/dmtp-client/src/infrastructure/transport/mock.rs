//! Scripted transport for tests.
//!
//! # Why a scripted transport?
//!
//! A protocol session is a conversation: the client writes a block, the
//! server answers, the client reacts.  Testing that against a real server is
//! slow and non-deterministic.  `MockTransport` replaces the server with a
//! queue of [`ScriptStep`]s replayed one per `read_packet`, and records every
//! packet the session writes so assertions can inspect the exact exchange.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, handle) = MockTransport::new(TransportType::Duplex);
//! handle.push_server(ServerPacketType::Ack, &[2]);
//! handle.push_server(ServerPacketType::Eot, &[]);
//!
//! session.set_duplex_transport(Box::new(transport));
//! session.run_duplex().await?;
//!
//! let written = handle.written_packets();
//! ```
//!
//! The handle shares state with the transport, so it stays usable after the
//! transport has been moved into the session.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dmtp_core::protocol::{decode_packet, encode_packet, Encoding, Packet, ServerPacketType};
use dmtp_core::TransportType;
use parking_lot::Mutex;

use crate::application::transport::{Transport, TransportError};

/// What the next `read_packet` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Raw bytes of one server packet.
    Packet(Vec<u8>),
    /// A read timeout.
    Timeout,
    /// The server closed the connection.
    Closed,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<ScriptStep>,
    written: Vec<Vec<u8>>,
    opens: usize,
    closes: Vec<bool>,
    is_open: bool,
    fail_open: bool,
    fail_close: bool,
    fail_write_at: Option<usize>,
}

/// Inspection and scripting handle for a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransportHandle {
    pub fn push(&self, step: ScriptStep) {
        self.state.lock().script.push_back(step);
    }

    /// Queues a binary-encoded server packet.
    pub fn push_server(&self, packet_type: ServerPacketType, payload: &[u8]) {
        let p = Packet::server(packet_type as u8, payload);
        if let Ok(bytes) = encode_packet(&p, Encoding::Binary) {
            self.push(ScriptStep::Packet(bytes));
        }
    }

    /// Raw bytes of every packet written, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Every written packet decoded as a client packet.  Undecodable
    /// writes are skipped.
    pub fn written_packets(&self) -> Vec<Packet> {
        self.state
            .lock()
            .written
            .iter()
            .filter_map(|b| decode_packet(b, true).ok())
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// The `send_pending` argument of every `close` call.
    pub fn closes(&self) -> Vec<bool> {
        self.state.lock().closes.clone()
    }

    pub fn remaining_steps(&self) -> usize {
        self.state.lock().script.len()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Makes the `n`-th write (0-based, counted across the transport's life) fail.
    pub fn set_fail_write_at(&self, n: Option<usize>) {
        self.state.lock().fail_write_at = n;
    }
}

/// A [`Transport`] that replays a script and records writes.
pub struct MockTransport {
    kind: TransportType,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(kind: TransportType) -> (Self, MockTransportHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                kind,
                state: Arc::clone(&state),
            },
            MockTransportHandle { state },
        )
    }
}

fn injected(what: &str) -> TransportError {
    TransportError::Io(std::io::Error::other(format!("injected {what} failure")))
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportType {
        self.kind
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let mut s = self.state.lock();
        s.opens += 1;
        if s.fail_open {
            return Err(injected("open"));
        }
        s.is_open = true;
        Ok(())
    }

    async fn close(&mut self, send_pending: bool) -> Result<(), TransportError> {
        let mut s = self.state.lock();
        s.closes.push(send_pending);
        s.is_open = false;
        if s.fail_close {
            return Err(injected("close"));
        }
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut s = self.state.lock();
        if !s.is_open {
            return Err(TransportError::NotOpen);
        }
        if self.kind == TransportType::Simplex {
            return Err(TransportError::Unsupported(TransportType::Simplex));
        }
        match s.script.pop_front() {
            Some(ScriptStep::Packet(bytes)) => Ok(bytes),
            Some(ScriptStep::Timeout) => Err(TransportError::Timeout),
            Some(ScriptStep::Closed) | None => Err(TransportError::Closed),
        }
    }

    async fn write_packet(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut s = self.state.lock();
        if !s.is_open {
            return Err(TransportError::NotOpen);
        }
        if s.fail_write_at == Some(s.written.len()) {
            return Err(injected("write"));
        }
        s.written.push(bytes.to_vec());
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_script_then_reports_closed() {
        // Arrange
        let (mut t, h) = MockTransport::new(TransportType::Duplex);
        h.push_server(ServerPacketType::EobSpeakFreely, &[]);
        h.push(ScriptStep::Timeout);

        // Act
        t.open().await.unwrap();
        let first = t.read_packet().await.unwrap();
        let second = t.read_packet().await;
        let third = t.read_packet().await;

        // Assert
        assert_eq!(first, vec![0xE0, 0x01, 0x00]);
        assert!(matches!(second, Err(TransportError::Timeout)));
        assert!(matches!(third, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_records_writes_and_closes() {
        let (mut t, h) = MockTransport::new(TransportType::Simplex);
        t.open().await.unwrap();
        t.write_packet(&[0xE0, 0x00, 0x00]).await.unwrap();
        t.close(true).await.unwrap();

        assert_eq!(h.written(), vec![vec![0xE0, 0x00, 0x00]]);
        assert_eq!(h.written_packets().len(), 1);
        assert_eq!(h.closes(), vec![true]);
        assert_eq!(h.opens(), 1);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let (mut t, h) = MockTransport::new(TransportType::Duplex);
        h.set_fail_write_at(Some(1));
        t.open().await.unwrap();

        assert!(t.write_packet(&[1]).await.is_ok());
        assert!(t.write_packet(&[2]).await.is_err());
    }
}
