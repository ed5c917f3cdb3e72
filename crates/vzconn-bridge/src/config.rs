//! Bridge configuration: TOML file with every field defaulted.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use vzconn_core::topics::{DEFAULT_INBOUND_PREFIX, DEFAULT_OUTBOUND_PREFIX};
use vzconn_core::{VzError, VzResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub registration: RegistrationSection,
}

/// `[bridge]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_outbound_prefix")]
    pub outbound_prefix: String,
    #[serde(default = "default_inbound_prefix")]
    pub inbound_prefix: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_status_stale_after")]
    pub status_stale_after_secs: u64,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            outbound_prefix: default_outbound_prefix(),
            inbound_prefix: default_inbound_prefix(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            status_stale_after_secs: default_status_stale_after(),
            send_queue_capacity: default_send_queue_capacity(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// `[registration]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSection {
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for RegistrationSection {
    fn default() -> Self {
        Self {
            ack_timeout_secs: default_ack_timeout(),
            max_retries: 0,
        }
    }
}

fn default_outbound_prefix() -> String {
    DEFAULT_OUTBOUND_PREFIX.to_string()
}
fn default_inbound_prefix() -> String {
    DEFAULT_INBOUND_PREFIX.to_string()
}
fn default_heartbeat_interval() -> u64 {
    5
}
fn default_status_stale_after() -> u64 {
    30
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_drain_timeout() -> u64 {
    5
}
fn default_ack_timeout() -> u64 {
    30
}

/// How the bridge follows up on an unacknowledged registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPolicy {
    /// How long to wait for an OK ack before resending.
    pub ack_timeout: Duration,
    /// Resends after the initial registration. 0 sends it exactly once.
    pub max_retries: u32,
}

/// Resolved bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub outbound_prefix: String,
    pub inbound_prefix: String,
    pub heartbeat_interval: Duration,
    /// A liveness result older than this reports the cluster as degraded.
    pub status_stale_after: Duration,
    pub send_queue_capacity: usize,
    /// Upper bound on waiting for tasks to wind down after teardown starts.
    pub drain_timeout: Duration,
    pub registration: RegistrationPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from(ConfigFile::default())
    }
}

impl From<ConfigFile> for BridgeConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            outbound_prefix: file.bridge.outbound_prefix,
            inbound_prefix: file.bridge.inbound_prefix,
            heartbeat_interval: Duration::from_secs(file.bridge.heartbeat_interval_secs),
            status_stale_after: Duration::from_secs(file.bridge.status_stale_after_secs),
            send_queue_capacity: file.bridge.send_queue_capacity,
            drain_timeout: Duration::from_secs(file.bridge.drain_timeout_secs),
            registration: RegistrationPolicy {
                ack_timeout: Duration::from_secs(file.registration.ack_timeout_secs),
                max_retries: file.registration.max_retries,
            },
        }
    }
}

impl BridgeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> VzResult<Self> {
        let file = toml::from_str::<ConfigFile>(content)
            .map_err(|e| VzError::Config(format!("config parse error: {e}")))?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> VzResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        info!(path = %path.display(), "loading config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> VzResult<()> {
        for (name, prefix) in [
            ("outbound_prefix", &self.outbound_prefix),
            ("inbound_prefix", &self.inbound_prefix),
        ] {
            if prefix.is_empty() {
                return Err(VzError::Config(format!("{name} must not be empty")));
            }
            if prefix.contains(['*', '>']) || prefix.starts_with('.') || prefix.ends_with('.') {
                return Err(VzError::Config(format!(
                    "{name} must be a plain subject prefix, got {prefix:?}"
                )));
            }
        }
        if self.outbound_prefix == self.inbound_prefix {
            return Err(VzError::Config(
                "inbound and outbound prefixes must differ".into(),
            ));
        }
        if is_nested(&self.outbound_prefix, &self.inbound_prefix)
            || is_nested(&self.inbound_prefix, &self.outbound_prefix)
        {
            // Republished inbound traffic would match the outbound wildcard.
            return Err(VzError::Config(format!(
                "prefixes {:?} and {:?} must not nest",
                self.outbound_prefix, self.inbound_prefix
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(VzError::Config("heartbeat interval must be non-zero".into()));
        }
        if self.send_queue_capacity == 0 {
            return Err(VzError::Config("send queue capacity must be non-zero".into()));
        }
        if self.registration.max_retries > 0 && self.registration.ack_timeout.is_zero() {
            return Err(VzError::Config(
                "registration ack timeout must be non-zero when retries are enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Whether `inner` lies under `outer` in the subject hierarchy.
fn is_nested(inner: &str, outer: &str) -> bool {
    inner
        .strip_prefix(outer)
        .is_some_and(|rest| rest.starts_with('.'))
}
