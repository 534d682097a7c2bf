//! dmtp-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does dmtp-client do?
//!
//! The client is the device side of an OpenDMTP deployment, typically a
//! vehicle tracker.  It:
//!
//! 1. Receives GPS fixes from a location source and runs them through the
//!    GPS modules (odometer, motion detection), queueing the resulting
//!    event packets.
//! 2. Decides, from connection quotas and the priority of what is queued,
//!    whether to connect now and over which channel: a one-shot UDP
//!    datagram (*simplex*) or a TCP conversation (*duplex*).
//! 3. Runs the protocol session: identifies itself, sends blocks of
//!    packets, answers property requests and reacts to server errors.
//! 4. Persists changed properties to a local file between runs.

/// Application layer: device state, protocol session, worker loop.
pub mod application;

/// Infrastructure layer: transports and storage.
pub mod infrastructure;
