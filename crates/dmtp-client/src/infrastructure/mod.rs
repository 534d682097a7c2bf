//! Infrastructure layer for the device client.
//!
//! Contains the OS-facing adapters: sockets and files.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `dmtp_core`, but MUST NOT be imported by the `application` layer outside
//! of tests.
//!
//! # Sub-modules
//!
//! - **`transport`** – TCP (duplex) and UDP (simplex) implementations of
//!   [`Transport`](crate::application::transport::Transport), plus a
//!   scripted `MockTransport` for tests.
//!
//! - **`storage`** – The TOML configuration file and the flat file that
//!   persists changed properties between runs.

pub mod storage;
pub mod transport;
