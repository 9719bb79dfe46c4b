//! Core decision engine for a passcode-gated actuation daemon.
//!
//! Events carrying a passcode and an optional source address flow
//! through the [`pipeline::AccessPipeline`], which consults the
//! reloadable [`credentials::CredentialStore`], tracks repeated
//! failures per source in the [`scoreboard::FailureScoreboard`],
//! serializes hardware actuation through the [`gate::ActuationGate`],
//! appends an [`audit::AuditLog`] line for every accountable outcome
//! and drives the configured [`actuator::Actuator`].
//!
//! The crate is transport-agnostic: it consumes raw payload strings
//! plus receive timestamps, and leaves listening, configuration
//! loading and process wiring to the daemon binary.

#![deny(unsafe_code)]

pub mod actuator;
pub mod audit;
pub mod config;
pub mod credentials;
pub mod event;
pub mod gate;
pub mod pipeline;
pub mod scoreboard;

pub use actuator::{
    ActuationError, Actuator, ActuatorConfig, CommandActuator, DEFAULT_GRACE_DELAY_MS,
    DEFAULT_SETTLE_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
pub use audit::{AuditError, AuditLog, Outcome, default_audit_path};
pub use config::{
    ActuationConfig, AuditConfig, BlocklistConfig, ConfigError, CredentialsConfig, DoormanConfig,
    ListenerConfig,
};
pub use credentials::{CredentialError, CredentialStore};
pub use event::{AccessAttempt, DecodeError};
pub use gate::{ActuationGate, GatePermit};
pub use pipeline::{AccessPipeline, Disposition, SharedPipeline, new_shared_pipeline};
pub use scoreboard::{
    DEFAULT_BLOCK_AFTER_FAILURES, DEFAULT_BLOCK_WINDOW_SECS, DEFAULT_EXPIRE_AGE_SECS,
    FailureRecord, FailureScoreboard, ScoreboardConfig, Verdict,
};
