//! OpenDMTP device client entry point.
//!
//! Loads the configuration, restores persisted properties and runs the
//! session worker until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()                 -- TOML file + CLI overrides
//!  └─ PropertyStore                 -- identity, custom formats, saved values
//!  └─ DeviceState::new()            -- queues, templates, command handlers
//!  └─ ProtocolSession               -- TCP duplex + UDP simplex transports
//!  └─ SessionWorker::spawn()        -- connect when the queues call for it
//! ```
//!
//! Location sources feed fixes through an
//! [`EventProducer`](dmtp_client::application::producer::EventProducer)
//! built on the same `DeviceState`.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dmtp_client::application::session::ProtocolSession;
use dmtp_client::application::state::{system_clock, DeviceState};
use dmtp_client::application::worker::{SessionWorker, WorkerConfig};
use dmtp_client::infrastructure::storage::config::default_config_path;
use dmtp_client::infrastructure::storage::{load_config, ClientConfig, FileAuxStore};
use dmtp_client::infrastructure::transport::{TcpDuplexTransport, UdpSimplexTransport};
use dmtp_core::props::keys::{
    PROP_COMM_CUSTOM_FORMATS, PROP_STATE_ACCOUNT_ID, PROP_STATE_DEVICE_ID, PROP_STATE_UNIQUE_ID,
};
use dmtp_core::protocol::TemplateRegistry;
use dmtp_core::PropertyStore;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// OpenDMTP device client.
///
/// Values given on the command line override the configuration file.
#[derive(Debug, Parser)]
#[command(name = "dmtp-client", about = "OpenDMTP device-side protocol client", version)]
struct Cli {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(long, env = "DMTP_CONFIG")]
    config: Option<PathBuf>,

    /// Server host name or IP address.
    #[arg(long, env = "DMTP_HOST")]
    host: Option<String>,

    /// Server port, used for both TCP and UDP.
    #[arg(long, env = "DMTP_PORT")]
    port: Option<u16>,

    /// Account id sent in identification packets.
    #[arg(long, env = "DMTP_ACCOUNT")]
    account: Option<String>,

    /// Device id sent in identification packets.
    #[arg(long, env = "DMTP_DEVICE")]
    device: Option<String>,
}

impl Cli {
    fn apply(self, cfg: &mut ClientConfig) {
        if let Some(host) = self.host {
            cfg.server.host = host;
        }
        if let Some(port) = self.port {
            cfg.server.duplex_port = port;
            cfg.server.simplex_port = port;
        }
        if let Some(account) = self.account {
            cfg.client.account = account;
        }
        if let Some(device) = self.device {
            cfg.client.device = device;
        }
    }
}

/// Builds the property store and template registry described by `cfg`.
///
/// Values persisted by an earlier run are applied last and win over the
/// configuration file.
fn build_properties(cfg: &ClientConfig) -> anyhow::Result<(PropertyStore, TemplateRegistry)> {
    let mut props = PropertyStore::new();
    props.set_string(PROP_STATE_ACCOUNT_ID, &cfg.client.account)?;
    props.set_string(PROP_STATE_DEVICE_ID, &cfg.client.device)?;
    if let Some(uid) = cfg.client.unique_id_bytes()? {
        props.set_bytes(PROP_STATE_UNIQUE_ID, &uid)?;
    }

    let mut templates = TemplateRegistry::new();
    for t in &cfg.custom_templates {
        templates
            .register(t.to_template()?)
            .with_context(|| format!("registering custom template 0x{:02X}", t.packet_type))?;
    }
    if !cfg.custom_templates.is_empty() {
        props.set_long(PROP_COMM_CUSTOM_FORMATS, 1)?;
    }

    let mut store = FileAuxStore::new(&cfg.client.property_file);
    match props.load_from_store(&mut store) {
        Ok(n) => info!(count = n, file = %cfg.client.property_file.display(), "restored saved properties"),
        Err(e) => warn!(error = %e, "could not read saved properties"),
    }
    Ok((props, templates))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config.clone() {
        Some(p) => p,
        None => default_config_path()?,
    };
    let mut cfg = load_config(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    cli.apply(&mut cfg);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.client.log_level)),
        )
        .init();

    info!(
        config = %config_path.display(),
        server = %cfg.server.duplex_addr(),
        account = %cfg.client.account,
        device = %cfg.client.device,
        "OpenDMTP client starting"
    );

    // ── Device state ──────────────────────────────────────────────────────────
    let (props, templates) = build_properties(&cfg)?;
    let state = DeviceState::new(props, templates, system_clock());
    state.set_event_type(cfg.protocol.event_type);

    // ── Protocol session ──────────────────────────────────────────────────────
    let mut session = ProtocolSession::new(Arc::clone(&state), cfg.protocol.wire_encoding()?);
    session.set_duplex_transport(Box::new(TcpDuplexTransport::new(
        cfg.server.duplex_addr(),
        cfg.server.connect_timeout(),
        cfg.server.read_timeout(),
    )));
    session.set_simplex_transport(Box::new(UdpSimplexTransport::new(cfg.server.simplex_addr())));

    let worker_cfg = WorkerConfig {
        retry_backoff: cfg.protocol.retry_backoff(),
        idle_poll: cfg.protocol.idle_poll(),
    };
    let worker = SessionWorker::new(session, worker_cfg)
        .with_aux_store(Box::new(FileAuxStore::new(&cfg.client.property_file)));

    // ── Run until Ctrl-C ──────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let handle = worker.spawn(Arc::clone(&running));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for Ctrl-C: {e}"),
    }
    running.store(false, Ordering::Relaxed);
    state.request_transport();

    let worker = handle.await.context("session worker panicked")?;
    let stats = worker.session().stats();
    info!(
        sessions = stats.sessions,
        events_sent = stats.events_sent,
        bytes_written = stats.bytes_written,
        "OpenDMTP client stopped"
    );
    Ok(())
}
