//! External actuation command.
//!
//! An actuation runs the configured command once, with no arguments
//! appended and no event data passed through. The command string is
//! split on whitespace; the first token is the program, the rest are
//! its arguments. No shell is involved.
//!
//! Timing around the command matters more than the command itself. A
//! grace delay elapses between starting the command and waiting on it,
//! and a settle delay after it exits; together they put a floor on how
//! long one actuation occupies the gate, debouncing duplicate event
//! deliveries. A hard timeout bounds the grace delay plus the wait, and
//! a timed-out command is killed so a wedged external process cannot
//! hold the gate forever.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

// =============================================================================
// Defaults
// =============================================================================

/// Delay between starting the command and waiting on it (1 second).
pub const DEFAULT_GRACE_DELAY_MS: u64 = 1_000;

/// Delay after the command exits before the actuation completes
/// (1 second).
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;

/// Hard bound on the grace delay plus the command's runtime
/// (30 seconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// ActuatorConfig
// =============================================================================

/// Configuration for the command actuator.
#[derive(Debug, Clone)]
pub struct ActuatorConfig {
    /// The command to run, tokenized on whitespace.
    pub command: String,

    /// Milliseconds to sleep between spawning and waiting.
    pub grace_delay_ms: u64,

    /// Milliseconds after which the command is killed. Covers the grace
    /// delay and the wait, not the settle delay.
    pub timeout_ms: u64,

    /// Milliseconds to sleep after the command exits.
    pub settle_delay_ms: u64,
}

impl ActuatorConfig {
    /// Creates a config for `command` with default timing.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            grace_delay_ms: DEFAULT_GRACE_DELAY_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }

    /// Creates a config with a custom grace delay.
    #[must_use]
    pub const fn with_grace_delay_ms(mut self, ms: u64) -> Self {
        self.grace_delay_ms = ms;
        self
    }

    /// Creates a config with a custom timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Creates a config with a custom settle delay.
    #[must_use]
    pub const fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from running the actuation command.
///
/// All of these are terminal for the triggering event only; the caller
/// logs them and keeps serving.
#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    /// The configured command string has no tokens.
    #[error("actuation command is empty")]
    EmptyCommand,

    /// The command could not be started.
    #[error("failed to start actuation command `{command}`: {source}")]
    SpawnFailed {
        /// The configured command string.
        command: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the running command failed.
    #[error("failed to wait for actuation command: {0}")]
    WaitFailed(#[source] std::io::Error),

    /// The command exited with a non-success status.
    #[error("actuation command exited with {status}")]
    CommandFailed {
        /// The command's exit status.
        status: ExitStatus,
    },

    /// The command was killed after exceeding the timeout.
    #[error("actuation command did not finish within {timeout_ms}ms")]
    TimedOut {
        /// The configured timeout.
        timeout_ms: u64,
    },
}

// =============================================================================
// Actuator
// =============================================================================

/// One execution of the external "open" action.
///
/// The trait seam exists so the decision pipeline can be exercised
/// without spawning processes.
#[async_trait::async_trait]
pub trait Actuator: Send + Sync {
    /// Runs the action once and returns its exit status.
    ///
    /// # Errors
    ///
    /// Returns an [`ActuationError`] if the command cannot be started,
    /// exits unsuccessfully, or exceeds the timeout.
    async fn execute(&self) -> Result<ExitStatus, ActuationError>;
}

/// Production actuator running a configured OS command.
#[derive(Debug)]
pub struct CommandActuator {
    config: ActuatorConfig,
}

impl CommandActuator {
    /// Creates an actuator for the given configuration.
    #[must_use]
    pub fn new(config: ActuatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Actuator for CommandActuator {
    async fn execute(&self) -> Result<ExitStatus, ActuationError> {
        let mut parts = self.config.command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(ActuationError::EmptyCommand);
        };

        tracing::info!(command = %self.config.command, "starting actuation command");
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ActuationError::SpawnFailed {
                command: self.config.command.clone(),
                source,
            })?;

        let waited = tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), async {
            tokio::time::sleep(Duration::from_millis(self.config.grace_delay_ms)).await;
            child.wait().await
        })
        .await;

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => return Err(ActuationError::WaitFailed(source)),
            Err(_elapsed) => {
                tracing::warn!(
                    command = %self.config.command,
                    timeout_ms = self.config.timeout_ms,
                    "actuation command timed out, killing it"
                );
                if let Err(error) = child.kill().await {
                    tracing::warn!(%error, "failed to kill timed-out actuation command");
                }
                return Err(ActuationError::TimedOut {
                    timeout_ms: self.config.timeout_ms,
                });
            }
        };

        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;

        if status.success() {
            tracing::debug!(command = %self.config.command, "actuation command completed");
            Ok(status)
        } else {
            Err(ActuationError::CommandFailed { status })
        }
    }
}
