//! Configuration loading and validation.
//!
//! The transport reads a single TOML file (default
//! `~/.vxwhatsapp/config.toml`). Secrets are never stored in it: the account
//! password is read from the environment variable named by
//! `whatsapp.password_env`, optionally populated from a `.env` file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use base64::Engine as _;
use serde::Deserialize;

use crate::address::DEFAULT_DOMAIN;
use crate::lifecycle::RunLoopSettings;
use crate::whatsapp::DEFAULT_BRIDGE_URL;

/// Top-level transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// WhatsApp account settings.
    pub whatsapp: WhatsAppConfig,

    /// Sidecar connection settings.
    #[serde(default)]
    pub sidecar: SidecarConfig,

    /// Correlation store settings.
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Run-loop tuning.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Log level and file retention.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WhatsApp account settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    /// Country code of the host phone number.
    #[serde(default = "default_cc")]
    pub cc: String,

    /// Phone number, excluding "+", including country code.
    pub phone: String,

    /// Environment variable holding the base64 password from registration.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Domain suffix of individual JIDs.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Echo every inbound text to this address.
    #[serde(default)]
    pub echo_to: Option<String>,
}

impl WhatsAppConfig {
    /// Our own subscriber address (`+<phone>`).
    pub fn own_address(&self) -> String {
        format!("+{}", self.phone)
    }
}

/// Sidecar connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SidecarConfig {
    /// Base URL of the sidecar HTTP API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Which key/value backend holds correlations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationBackendKind {
    /// In-process map; lost on restart.
    Memory,
    /// SQLite file.
    Sqlite,
}

/// Correlation store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    /// Backend kind.
    #[serde(default = "default_backend")]
    pub backend: CorrelationBackendKind,

    /// Entry lifetime in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// SQLite file; relative paths resolve against the config directory.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Namespace prepended to every key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl CorrelationConfig {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            ttl_secs: default_ttl_secs(),
            sqlite_path: default_sqlite_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Run-loop tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Delay between disconnect and forced termination, in milliseconds.
    #[serde(default = "default_kill_delay_ms")]
    pub kill_delay_ms: u64,

    /// Poll timeout of the run loop, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the queues between the bus side and the run loop.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl LifecycleConfig {
    /// Settings for [`crate::lifecycle::LifecycleController`].
    pub fn run_loop_settings(&self) -> RunLoopSettings {
        RunLoopSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            kill_delay: Duration::from_millis(self.kill_delay_ms),
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            kill_delay_ms: default_kill_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Log level and file retention.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level for this crate's events (`trace` … `error`); `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Number of daily log files kept.
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_log_max_files(),
        }
    }
}

// Default value functions for serde

fn default_cc() -> String {
    "27".to_owned()
}
fn default_password_env() -> String {
    "VXWHATSAPP_PASSWORD".to_owned()
}
fn default_domain() -> String {
    DEFAULT_DOMAIN.to_owned()
}
fn default_base_url() -> String {
    DEFAULT_BRIDGE_URL.to_owned()
}
fn default_backend() -> CorrelationBackendKind {
    CorrelationBackendKind::Memory
}
fn default_ttl_secs() -> u64 {
    86_400
}
fn default_sqlite_path() -> PathBuf {
    PathBuf::from("correlations.db")
}
fn default_key_prefix() -> String {
    "whatsapp".to_owned()
}
fn default_kill_delay_ms() -> u64 {
    1_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_channel_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_log_max_files() -> usize {
    14
}

impl Config {
    /// Check values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        let wa = &self.whatsapp;
        if wa.phone.is_empty() || !wa.phone.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("whatsapp.phone must be digits only, got {:?}", wa.phone);
        }
        if wa.cc.is_empty() || !wa.cc.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("whatsapp.cc must be digits only, got {:?}", wa.cc);
        }
        if !wa.phone.starts_with(&wa.cc) {
            anyhow::bail!(
                "whatsapp.phone {:?} does not start with country code {:?}",
                wa.phone,
                wa.cc
            );
        }
        if wa.domain.is_empty() {
            anyhow::bail!("whatsapp.domain must not be empty");
        }
        if let Some(echo_to) = &wa.echo_to {
            crate::address::to_protocol_address(echo_to, &wa.domain)
                .context("invalid whatsapp.echo_to")?;
        }
        url::Url::parse(&self.sidecar.base_url)
            .with_context(|| format!("invalid sidecar.base_url {:?}", self.sidecar.base_url))?;
        if self.correlation.ttl_secs == 0 {
            anyhow::bail!("correlation.ttl_secs must be greater than zero");
        }
        if self.lifecycle.channel_capacity == 0 {
            anyhow::bail!("lifecycle.channel_capacity must be greater than zero");
        }
        self.logging
            .level
            .parse::<tracing::Level>()
            .map_err(|_| anyhow::anyhow!("invalid logging.level {:?}", self.logging.level))?;
        if self.logging.max_files == 0 {
            anyhow::bail!("logging.max_files must be greater than zero");
        }
        Ok(())
    }

    /// Resolve the correlation SQLite path against `base_dir`.
    pub fn sqlite_path(&self, base_dir: &Path) -> PathBuf {
        if self.correlation.sqlite_path.is_absolute() {
            self.correlation.sqlite_path.clone()
        } else {
            base_dir.join(&self.correlation.sqlite_path)
        }
    }
}

/// Decode the base64 account password.
///
/// # Errors
///
/// Returns an error if the value is not base64 or not UTF-8.
pub fn decode_password(encoded: &str) -> anyhow::Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim().as_bytes())
        .context("password is not valid base64")?;
    String::from_utf8(bytes).context("password is not valid UTF-8")
}

/// Read and decode the password from the environment variable named in config.
///
/// # Errors
///
/// Returns an error if the variable is unset or its value does not decode.
pub fn resolve_password(
    config: &WhatsAppConfig,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<String> {
    let encoded = env(&config.password_env)
        .ok_or_else(|| anyhow::anyhow!("missing required credential: {}", config.password_env))?;
    decode_password(&encoded)
}

/// Load the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.vxwhatsapp/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".vxwhatsapp"))
}
