//! Client configuration.
//!
//! Where the server lives, which protocol version to announce, and how
//! patiently to wait. Loaded from a JSON file, then overridden from the
//! environment, then validated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TransportError};
use crate::rpc::message::DEFAULT_PROTOCOL_VERSION;
use crate::rpc::transport::{Endpoint, DEFAULT_ADDRESS, DEFAULT_PORT};

pub const ENV_SERVER_ADDRESS: &str = "AEPSYCH_SERVER_ADDRESS";
pub const ENV_SERVER_PORT: &str = "AEPSYCH_SERVER_PORT";
pub const ENV_PROTOCOL_VERSION: &str = "AEPSYCH_PROTOCOL_VERSION";

/// Core client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // --- Server ---
    /// Scheme and host, e.g. `tcp://localhost`
    pub server_address: String,
    /// Port as text, e.g. `5555`
    pub server_port: String,
    /// Version string sent with setup and resume
    pub protocol_version: String,

    // --- Timing ---
    /// Bound on the TCP connect (milliseconds)
    pub connect_timeout_ms: u64,
    /// Pause between reply polls (milliseconds)
    pub tick_interval_ms: u64,
    /// Give up waiting for a reply after this long (milliseconds)
    pub reply_deadline_ms: Option<u64>,

    // --- Experiment ---
    /// Experiment configuration file sent verbatim by `setup`
    pub setup_config_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_ADDRESS.to_owned(),
            server_port: DEFAULT_PORT.to_owned(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),

            connect_timeout_ms: 2000,
            tick_interval_ms: 16, // ~60 Hz
            reply_deadline_ms: None,

            setup_config_path: None,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let cfg = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        info!("Config: loaded {}", path.display());
        Ok(cfg)
    }

    /// Apply `AEPSYCH_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut String); 3] = [
            (ENV_SERVER_ADDRESS, &mut self.server_address),
            (ENV_SERVER_PORT, &mut self.server_port),
            (ENV_PROTOCOL_VERSION, &mut self.protocol_version),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                debug!("Config: {} overrides '{}' with '{}'", key, field, value);
                *field = value;
            }
        }
    }

    /// Range-check every setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server_address.starts_with("tcp://") {
            return Err(ConfigError::Invalid("server_address must start with tcp://"));
        }
        match self.server_port.trim().parse::<u16>() {
            Ok(p) if p != 0 => {}
            _ => return Err(ConfigError::Invalid("server_port must be a port in 1..=65535")),
        }
        if self.protocol_version.is_empty() {
            return Err(ConfigError::Invalid("protocol_version must not be empty"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be non-zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be non-zero"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint, TransportError> {
        Endpoint::from_parts(&self.server_address, &self.server_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reply_deadline(&self) -> Option<Duration> {
        self.reply_deadline_ms.map(Duration::from_millis)
    }
}

/// Read the experiment configuration text. The content is passed to the
/// server untouched.
pub fn read_setup_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })
}
