//! # dmtp-core
//!
//! Device-side protocol engine for OpenDMTP, the compact telemetry protocol
//! used to ship GPS events from a mobile client to a tracking server.
//!
//! This crate has no I/O: it never opens a socket, file or clock.  Time is
//! passed in as seconds, and storage and transports are traits implemented
//! by the client application.
//!
//! # Architecture overview
//!
//! A device collects GPS fixes, turns some of them into *events* (motion
//! started, odometer limit reached, ...) and sends those events to a server
//! over either a one-shot UDP datagram (*simplex*) or a TCP conversation
//! (*duplex*).  Connections are metered, so the device also decides *when*
//! it is allowed to connect.
//!
//! - **`protocol`** – The wire format.  A packet is `[0xE0][type][len][payload]`
//!   in binary, or `$E0TT=<base64>#CS\n` / `$E0TT:<hex>#CS\n` in ASCII.
//!   Event payloads follow a *template*: an ordered list of typed fields.
//!
//! - **`domain`** – GPS points, events, and the status codes that classify
//!   them.
//!
//! - **`props`** – The property store: ~50 typed settings (limits, intervals,
//!   identifiers, odometers) that the server can read and write remotely.
//!
//! - **`queue`** – Outgoing packet FIFOs with a per-packet `sent` flag.
//!
//! - **`accounting`** – Per-minute connection counters and the quota checks
//!   that choose between no connection, simplex and duplex.
//!
//! - **`gps`** – Odometer and motion-detection modules that generate events
//!   from raw fixes.

pub mod accounting;
pub mod domain;
pub mod gps;
pub mod props;
pub mod protocol;
pub mod queue;

pub use accounting::{Accounting, AccountingMask, TransportType};
pub use domain::event::{status, GeoEvent};
pub use domain::geo::GeoPoint;
pub use gps::{GpsModule, GpsModules};
pub use props::{PropError, PropertyStore};
pub use protocol::codec::{decode_packet, encode_packet};
pub use protocol::messages::{Encoding, Priority};
pub use protocol::packet::{Packet, PacketError};
pub use queue::PacketQueue;
