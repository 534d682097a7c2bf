//! TOML-based configuration for the client application.
//!
//! The default location is the platform config directory:
//! - Windows:  `%APPDATA%\OpenDMTP\client.toml`
//! - Linux:    `~/.config/opendmtp/client.toml`
//! - macOS:    `~/Library/Application Support/OpenDMTP/client.toml`
//!
//! Example:
//!
//! ```toml
//! [client]
//! account = "acme"
//! device = "truck-07"
//! log_level = "info"
//!
//! [server]
//! host = "dmtp.example.com"
//! duplex_port = 31000
//!
//! [protocol]
//! encoding = "base64"
//! event_type = 0x70
//!
//! [[custom_template]]
//! packet_type = 0x70
//! fields = [
//!     { name = "status", length = 2 },
//!     { name = "timestamp", length = 4 },
//!     { name = "gps", hi_res = true, length = 8 },
//!     { name = "odometer", hi_res = true, index = 1, length = 3 },
//! ]
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = ...)]`, so a missing file, a
//! missing section or a missing key all fall back to working defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dmtp_core::protocol::{client_types, Encoding, Field, FieldType, PayloadTemplate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The config parsed but describes something the client cannot do.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default, rename = "custom_template")]
    pub custom_templates: Vec<CustomTemplateConfig>,
}

/// Device identity and local files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// File the changed properties are persisted to.
    #[serde(default = "default_property_file")]
    pub property_file: PathBuf,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub device: String,
    /// 6-byte unique id as 12 hex digits; empty to identify by account/device.
    #[serde(default)]
    pub unique_id: String,
}

/// Server endpoints and socket timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port for duplex sessions.
    #[serde(default = "default_port")]
    pub duplex_port: u16,
    /// UDP port for simplex sessions.
    #[serde(default = "default_port")]
    pub simplex_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

/// Wire encoding and worker timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolSection {
    #[serde(default)]
    pub encoding: EncodingChoice,
    /// Append a checksum to ASCII packets.
    #[serde(default = "default_true")]
    pub ascii_checksum: bool,
    /// Packet type used for GPS events: 0x30, 0x31 or a configured custom type.
    #[serde(default = "default_event_type")]
    pub event_type: u8,
    /// Pause after a failed session before the next attempt.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    /// How often the worker re-evaluates the queues without being notified.
    #[serde(default = "default_idle_poll")]
    pub idle_poll_secs: u64,
}

/// Wire encoding as written in the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncodingChoice {
    #[default]
    Binary,
    Base64,
    Hex,
    /// Parsed so the error message can name it; rejected by validation.
    Csv,
}

/// One custom event template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomTemplateConfig {
    /// 0x70..=0x7F.
    pub packet_type: u8,
    pub fields: Vec<FieldConfig>,
}

/// One field of a custom template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldConfig {
    /// Field type name (`status`, `timestamp`, `gps`, `speed`, `odometer`, ...).
    pub name: String,
    #[serde(default)]
    pub hi_res: bool,
    #[serde(default)]
    pub index: u8,
    pub length: u8,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_property_file() -> PathBuf {
    PathBuf::from("dmtp-props.conf")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    31000
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_event_type() -> u8 {
    client_types::FIXED_FMT_STD
}
fn default_retry_backoff() -> u64 {
    15
}
fn default_idle_poll() -> u64 {
    30
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            property_file: default_property_file(),
            account: String::new(),
            device: String::new(),
            unique_id: String::new(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            duplex_port: default_port(),
            simplex_port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            encoding: EncodingChoice::default(),
            ascii_checksum: default_true(),
            event_type: default_event_type(),
            retry_backoff_secs: default_retry_backoff(),
            idle_poll_secs: default_idle_poll(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl ServerSection {
    pub fn duplex_addr(&self) -> String {
        format!("{}:{}", self.host, self.duplex_port)
    }

    pub fn simplex_addr(&self) -> String {
        format!("{}:{}", self.host, self.simplex_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl ProtocolSection {
    /// The wire encoding to use.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for `csv`, which the protocol engine does not
    /// speak.
    pub fn wire_encoding(&self) -> Result<Encoding, ConfigError> {
        let checksum = self.ascii_checksum;
        match self.encoding {
            EncodingChoice::Binary => Ok(Encoding::Binary),
            EncodingChoice::Base64 => Ok(Encoding::Base64 { checksum }),
            EncodingChoice::Hex => Ok(Encoding::Hex { checksum }),
            EncodingChoice::Csv => Err(ConfigError::Invalid("csv encoding is not supported".into())),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs.max(1))
    }
}

impl ClientSection {
    /// The configured unique id, if set.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] unless the value is exactly 12 hex digits.
    pub fn unique_id_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let s = self.unique_id.trim();
        if s.is_empty() {
            return Ok(None);
        }
        if s.len() != 12 {
            return Err(ConfigError::Invalid(format!("unique_id must be 12 hex digits, got {s:?}")));
        }
        (0..12)
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("unique_id is not hex: {s:?}")))
    }
}

impl CustomTemplateConfig {
    /// Builds the payload template.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for an unknown field name or a packet type
    /// outside the custom range.
    pub fn to_template(&self) -> Result<PayloadTemplate, ConfigError> {
        if !client_types::is_custom_format(self.packet_type) {
            return Err(ConfigError::Invalid(format!(
                "custom template type 0x{:02X} is outside 0x70..=0x7F",
                self.packet_type
            )));
        }
        let fields = self
            .fields
            .iter()
            .map(|f| {
                FieldType::from_name(&f.name)
                    .map(|t| Field::new(t, f.hi_res, f.index, f.length))
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown field name {:?}", f.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PayloadTemplate::new(self.packet_type, fields))
    }
}

impl ClientConfig {
    /// Checks everything serde cannot: encoding, templates, event type.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.wire_encoding()?;
        self.client.unique_id_bytes()?;
        let mut custom = Vec::new();
        for t in &self.custom_templates {
            custom.push(t.to_template()?.packet_type);
        }
        let et = self.protocol.event_type;
        if et != client_types::FIXED_FMT_STD && et != client_types::FIXED_FMT_HIGH && !custom.contains(&et) {
            return Err(ConfigError::Invalid(format!(
                "event_type 0x{et:02X} is neither a fixed format nor a configured custom template"
            )));
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|d| d.join("client.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `ClientConfig` from `path`, returning defaults if the file does not
/// yet exist.  The result is validated.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<ClientConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientConfig::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Writes `config` to `path` as pretty TOML, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory plus the `OpenDMTP` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("OpenDMTP"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("opendmtp"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("OpenDMTP"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
