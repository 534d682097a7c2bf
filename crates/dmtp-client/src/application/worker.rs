//! The session worker: decides when to connect and runs the sessions.
//!
//! # Loop (for beginners)
//!
//! ```text
//! while running {
//!     kind = transport_type()          // quota + priority decision
//!     None    -> wait for a wake-up or the idle poll interval
//!     Simplex -> run simplex session
//!     Duplex  -> run duplex session
//!     failure -> sleep the retry backoff
//!     save changed properties if the server asked for it
//! }
//! ```
//!
//! The running flag is only checked between iterations.  To stop promptly,
//! clear it and then call
//! [`DeviceState::request_transport`](super::state::DeviceState::request_transport)
//! to wake a waiting worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dmtp_core::props::AuxStore;
use dmtp_core::TransportType;
use tokio::{task::JoinHandle, time};
use tracing::{debug, info, warn};

use super::session::{ProtocolSession, SessionError};

/// Timing of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Pause after a failed session.
    pub retry_backoff: Duration,
    /// Longest wait between transport decisions without a wake-up.
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(15),
            idle_poll: Duration::from_secs(30),
        }
    }
}

/// Owns the protocol session and drives it from a tokio task.
pub struct SessionWorker {
    session: ProtocolSession,
    aux_store: Option<Box<dyn AuxStore>>,
    config: WorkerConfig,
}

impl SessionWorker {
    pub fn new(session: ProtocolSession, config: WorkerConfig) -> Self {
        Self {
            session,
            aux_store: None,
            config,
        }
    }

    /// Store that receives changed properties on a save request.
    pub fn with_aux_store(mut self, store: Box<dyn AuxStore>) -> Self {
        self.aux_store = Some(store);
        self
    }

    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    /// Makes one transport decision and runs the session it calls for.
    ///
    /// Returns `None` when no connection was due.
    pub async fn tick(&mut self) -> Option<Result<(), SessionError>> {
        let kind = self.session.transport_type();
        let result = if kind == TransportType::None {
            None
        } else {
            debug!(transport = %kind, "starting session");
            Some(self.session.run(kind).await)
        };
        self.session.state().publish_queue_length();
        self.persist_if_requested();
        result
    }

    /// Spawns [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self, running: Arc<AtomicBool>) -> JoinHandle<Self> {
        tokio::spawn(self.run(running))
    }

    /// Loops until `running` is cleared.  Returns the worker so the caller
    /// can inspect the final statistics.
    pub async fn run(mut self, running: Arc<AtomicBool>) -> Self {
        info!("session worker started");
        let state = Arc::clone(self.session.state());
        while running.load(Ordering::Relaxed) {
            match self.tick().await {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    warn!(error = %e, backoff = ?self.config.retry_backoff, "session failed; retrying later");
                    time::sleep(self.config.retry_backoff).await;
                }
                None => {
                    tokio::select! {
                        _ = state.transport_requested() => debug!("transport requested"),
                        _ = time::sleep(self.config.idle_poll) => {}
                    }
                }
            }
        }
        self.persist_if_requested();
        let stats = self.session.stats();
        info!(
            sessions = stats.sessions,
            events_sent = stats.events_sent,
            severe_errors = stats.severe_errors,
            "session worker stopped"
        );
        self
    }

    fn persist_if_requested(&mut self) {
        let state = self.session.state();
        if !state.take_save_request() {
            return;
        }
        let Some(store) = self.aux_store.as_mut() else {
            warn!("property save requested but no store is configured");
            return;
        };
        match state.props.lock().save_to_store(store.as_mut()) {
            Ok(n) => info!(count = n, "properties saved"),
            Err(e) => warn!(error = %e, "property save failed"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
