//! The transport seam between the protocol session and the network.
//!
//! The session never touches a socket.  It drives a [`Transport`] trait
//! object that moves whole encoded packets; the concrete implementations
//! (TCP duplex, UDP simplex, scripted mock) live in the infrastructure layer.

use async_trait::async_trait;
use dmtp_core::TransportType;
use thiserror::Error;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting to the server failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// Connecting to the server did not complete in time.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
    /// An I/O error occurred on an open transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No packet arrived within the read timeout.
    #[error("read timed out")]
    Timeout,
    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,
    /// The transport was used before `open` or after `close`.
    #[error("transport is not open")]
    NotOpen,
    /// The transport cannot perform this operation (e.g. reading from simplex).
    #[error("operation not supported by {0} transport")]
    Unsupported(TransportType),
}

/// A packet-oriented connection to the server.
///
/// # Contract
///
/// - `open` must precede any read or write and may be called again after
///   `close` to start a new session.
/// - `write_packet` receives one fully encoded packet.  A simplex transport
///   may buffer it until `close(true)`; `close(false)` discards anything
///   buffered.
/// - `read_packet` returns exactly one encoded packet or
///   [`TransportError::Timeout`] when none arrives in time.
#[async_trait]
pub trait Transport: Send {
    /// Which channel this transport provides.
    fn kind(&self) -> TransportType;

    async fn open(&mut self) -> Result<(), TransportError>;

    /// Closes the transport.  With `send_pending` a simplex transport
    /// flushes its buffered packets before closing.
    async fn close(&mut self, send_pending: bool) -> Result<(), TransportError>;

    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Writes one encoded packet and returns the number of bytes accepted.
    async fn write_packet(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;
}
