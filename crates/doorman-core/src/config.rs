//! Configuration parsing and validation.
//!
//! The daemon is configured from one TOML file. The listen address,
//! credential file path, and actuation command are required; everything
//! else has a default matching the thresholds documented on the
//! individual components. Unknown keys are rejected so a typo cannot
//! silently disable a setting.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::actuator::{
    ActuatorConfig, DEFAULT_GRACE_DELAY_MS, DEFAULT_SETTLE_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
use crate::scoreboard::ScoreboardConfig;

/// Top-level doorman configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DoormanConfig {
    /// Event listener configuration.
    pub listener: ListenerConfig,

    /// Credential file configuration.
    pub credentials: CredentialsConfig,

    /// Actuation command configuration.
    pub actuator: ActuationConfig,

    /// Failure scoreboard thresholds.
    #[serde(default)]
    pub blocklist: BlocklistConfig,

    /// Audit log configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl DoormanConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a required field is
    /// missing.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validates cross-field constraints the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.channel.trim().is_empty() {
            return Err(ConfigError::Validation(
                "listener.channel must not be empty".to_string(),
            ));
        }
        if self.listener.event.trim().is_empty() {
            return Err(ConfigError::Validation(
                "listener.event must not be empty".to_string(),
            ));
        }
        if self.credentials.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "credentials.path must not be empty".to_string(),
            ));
        }
        if self.actuator.command.split_whitespace().next().is_none() {
            return Err(ConfigError::Validation(
                "actuator.command must contain at least a program name".to_string(),
            ));
        }
        if self.actuator.timeout_ms <= self.actuator.grace_delay_ms {
            return Err(ConfigError::Validation(format!(
                "actuator.timeout_ms ({}) must exceed actuator.grace_delay_ms ({})",
                self.actuator.timeout_ms, self.actuator.grace_delay_ms
            )));
        }
        Ok(())
    }

    /// Scoreboard thresholds as the scoreboard consumes them.
    #[must_use]
    pub const fn scoreboard_config(&self) -> ScoreboardConfig {
        ScoreboardConfig {
            block_after_failures: self.blocklist.block_after_failures,
            block_window_secs: self.blocklist.block_window_secs,
            expire_age_secs: self.blocklist.expire_age_secs,
        }
    }

    /// Actuator settings as the command actuator consumes them.
    #[must_use]
    pub fn actuator_config(&self) -> ActuatorConfig {
        ActuatorConfig::new(self.actuator.command.clone())
            .with_grace_delay_ms(self.actuator.grace_delay_ms)
            .with_timeout_ms(self.actuator.timeout_ms)
            .with_settle_delay_ms(self.actuator.settle_delay_ms)
    }
}

/// Event listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Address the HTTP ingress binds to.
    ///
    /// Required field - the daemon refuses to start without it.
    pub bind: SocketAddr,

    /// Channel whose events are processed; envelopes for any other
    /// channel are acknowledged and ignored.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Event name within the channel that carries access attempts.
    #[serde(default = "default_event")]
    pub event: String,

    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Credential file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Path of the `passcode = identity` file, re-read on every event.
    ///
    /// Required field - the daemon refuses to start if the file cannot
    /// be loaded.
    pub path: PathBuf,
}

/// Actuation command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuationConfig {
    /// Command to run on a successful attempt, tokenized on whitespace.
    ///
    /// Required field.
    pub command: String,

    /// Milliseconds between starting the command and waiting on it.
    #[serde(default = "default_grace_delay_ms")]
    pub grace_delay_ms: u64,

    /// Milliseconds after which a running command is killed.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Milliseconds the actuation lingers after the command exits.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Failure scoreboard thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BlocklistConfig {
    /// Failure count a source must exceed before valid attempts are
    /// blocked.
    pub block_after_failures: u32,

    /// Block window length in seconds after the most recent failure.
    pub block_window_secs: u64,

    /// Record expiry age in seconds after the most recent failure.
    pub expire_age_secs: u64,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        let defaults = ScoreboardConfig::default();
        Self {
            block_after_failures: defaults.block_after_failures,
            block_window_secs: defaults.block_window_secs,
            expire_age_secs: defaults.expire_age_secs,
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct AuditConfig {
    /// Path of the append-only audit log.
    ///
    /// When omitted, a fresh `access.<unix millis>.log` in the working
    /// directory is used.
    pub path: Option<PathBuf>,
}

fn default_channel() -> String {
    "my-channel".to_string()
}

fn default_event() -> String {
    "my-event".to_string()
}

const fn default_max_body_bytes() -> usize {
    64 * 1024
}

const fn default_grace_delay_ms() -> u64 {
    DEFAULT_GRACE_DELAY_MS
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

const fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
