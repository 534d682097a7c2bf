//! Application layer of the device client.
//!
//! # What lives here?
//!
//! - **`state`** – [`DeviceState`](state::DeviceState), the state shared by
//!   the event producer and the session worker: properties, the three packet
//!   queues, the sequence counter and the registered templates.
//!
//! - **`commands`** – Handlers for the COMMAND properties the server may set.
//!
//! - **`transport`** – The [`Transport`](transport::Transport) trait the
//!   session talks through.  Implementations live in `infrastructure`.
//!
//! - **`session`** – One simplex or duplex protocol session: block writing,
//!   server packet dispatch and acknowledgement bookkeeping.
//!
//! - **`error_policy`** – What the device does about each server error.
//!
//! - **`producer`** – Runs GPS fixes through the GPS modules and queues the
//!   resulting events.
//!
//! - **`worker`** – The loop that decides when to connect.

pub mod commands;
pub mod error_policy;
pub mod producer;
pub mod session;
pub mod state;
pub mod transport;
pub mod worker;
