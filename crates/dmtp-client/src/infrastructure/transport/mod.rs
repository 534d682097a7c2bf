//! Concrete [`Transport`](crate::application::transport::Transport)
//! implementations.
//!
//! - **`tcp`** – Duplex transport over a TCP stream with connect and read
//!   timeouts.  Incoming bytes are framed into packets by their first byte:
//!   `0xE0` starts a binary packet, `$` an ASCII line.
//! - **`udp`** – Simplex transport.  Packets are buffered and sent as a single
//!   datagram when the transport is closed with `send_pending`.
//! - **`mock`** – Scripted transport for tests: replays a list of server
//!   packets and records everything written.

pub mod mock;
pub mod tcp;
pub mod udp;

pub use mock::{MockTransport, MockTransportHandle, ScriptStep};
pub use tcp::TcpDuplexTransport;
pub use udp::UdpSimplexTransport;
