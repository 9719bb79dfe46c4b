//! The per-event access decision pipeline.
//!
//! For each incoming event, in order:
//!
//! 1. Reload credentials (best effort; a failed reload keeps the
//!    previous snapshot and the event proceeds).
//! 2. Decode the payload. An unusable passcode field kills the event
//!    with a warning and no audit line; an unusable source field only
//!    disables failure tracking for this event.
//! 3. Look up the identity for the passcode.
//! 4. When a source is present, evaluate the failure scoreboard. A
//!    blocked verdict is logged and ends the event before the gate, so
//!    blocked outcomes are never suppressed by a running actuation.
//! 5. Take the actuation gate. Losing the race drops the event with no
//!    audit line.
//! 6. With the gate held: a known identity is logged and actuated, an
//!    unknown passcode is logged as failed. The gate releases when the
//!    permit drops, whatever the actuator did.
//!
//! No failure in one event reaches another: actuation errors, reload
//! errors, and decode errors are all absorbed here with a log line.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::actuator::Actuator;
use crate::audit::{AuditLog, Outcome};
use crate::credentials::CredentialStore;
use crate::event::{AccessAttempt, DecodeError};
use crate::gate::ActuationGate;
use crate::scoreboard::{FailureRecord, FailureScoreboard, Verdict};

/// What the pipeline did with one event.
#[derive(Debug)]
pub enum Disposition {
    /// Valid passcode, gate taken, actuation triggered.
    Allowed {
        /// Identity the passcode mapped to.
        identity: String,
    },

    /// Unknown passcode from an untracked source.
    DeniedInvalid,

    /// The failure scoreboard blocked the source.
    DeniedBlocked {
        /// The source's failure record after this attempt.
        record: FailureRecord,
    },

    /// An actuation was already in flight; the event was dropped
    /// without a log line.
    DroppedBusy,

    /// The payload could not be decoded; the event was dropped without
    /// a log line.
    DecodeFailed(DecodeError),
}

/// Orchestrates credential lookup, failure tracking, gating, audit and
/// actuation for each event.
///
/// The entry points are async and safe to call from any number of
/// tasks concurrently; all shared state lives behind the components'
/// own synchronization.
pub struct AccessPipeline {
    credentials: CredentialStore,
    scoreboard: FailureScoreboard,
    gate: ActuationGate,
    actuator: Arc<dyn Actuator>,
    audit: AuditLog,
    events_seen: AtomicU64,
}

impl AccessPipeline {
    /// Wires a pipeline from its components.
    #[must_use]
    pub fn new(
        credentials: CredentialStore,
        scoreboard: FailureScoreboard,
        actuator: Arc<dyn Actuator>,
        audit: AuditLog,
    ) -> Self {
        Self {
            credentials,
            scoreboard,
            gate: ActuationGate::new(),
            actuator,
            audit,
            events_seen: AtomicU64::new(0),
        }
    }

    /// Processes one raw payload string as delivered by the transport.
    ///
    /// `received_at` is stamped onto the decoded attempt and used for
    /// every time-dependent decision about it.
    pub async fn process_raw(&self, data: &str, received_at: DateTime<Utc>) -> Disposition {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        self.refresh_credentials();
        match AccessAttempt::parse(data, received_at) {
            Ok(attempt) => self.decide(attempt).await,
            Err(error) => {
                tracing::warn!(error = %error, "discarding undecodable event payload");
                Disposition::DecodeFailed(error)
            }
        }
    }

    /// Processes an already-decoded attempt.
    pub async fn process(&self, attempt: AccessAttempt) -> Disposition {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        self.refresh_credentials();
        self.decide(attempt).await
    }

    /// Number of events that entered the pipeline since start.
    #[must_use]
    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Relaxed)
    }

    fn refresh_credentials(&self) {
        if let Err(error) = self.credentials.reload() {
            tracing::warn!(error = %error, "credential reload failed, keeping previous snapshot");
        }
    }

    async fn decide(&self, attempt: AccessAttempt) -> Disposition {
        let identity = self.credentials.lookup(&attempt.passcode);

        if let Some(source) = attempt.source.as_deref() {
            let verdict =
                self.scoreboard
                    .evaluate(source, identity.is_some(), attempt.timestamp);
            if let Verdict::Blocked(record) = verdict {
                self.write_audit(
                    attempt.timestamp,
                    &Outcome::Blocked {
                        identity: identity.clone(),
                        source: source.to_owned(),
                        record: record.clone(),
                    },
                );
                return Disposition::DeniedBlocked { record };
            }
        }

        let Some(_permit) = self.gate.try_acquire() else {
            tracing::debug!("actuation in flight, dropping event");
            return Disposition::DroppedBusy;
        };

        match identity {
            Some(identity) => {
                tracing::info!(identity = %identity, "access granted");
                self.write_audit(
                    attempt.timestamp,
                    &Outcome::Success {
                        identity: identity.clone(),
                    },
                );
                if let Err(error) = self.actuator.execute().await {
                    tracing::warn!(error = %error, "actuation failed");
                }
                Disposition::Allowed { identity }
            }
            None => {
                tracing::info!(source = ?attempt.source, "access denied, unknown passcode");
                self.write_audit(
                    attempt.timestamp,
                    &Outcome::Failed {
                        passcode: attempt.passcode,
                    },
                );
                Disposition::DeniedInvalid
            }
        }
    }

    fn write_audit(&self, at: DateTime<Utc>, outcome: &Outcome) {
        if let Err(error) = self.audit.record(at, outcome) {
            tracing::error!(error = %error, "failed to append audit line");
        }
    }
}

impl std::fmt::Debug for AccessPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessPipeline")
            .field("credentials", &self.credentials)
            .field("events_seen", &self.events_seen())
            .finish_non_exhaustive()
    }
}

/// Shared reference to a pipeline.
pub type SharedPipeline = Arc<AccessPipeline>;

/// Wires a pipeline and wraps it for sharing across tasks.
#[must_use]
pub fn new_shared_pipeline(
    credentials: CredentialStore,
    scoreboard: FailureScoreboard,
    actuator: Arc<dyn Actuator>,
    audit: AuditLog,
) -> SharedPipeline {
    Arc::new(AccessPipeline::new(credentials, scoreboard, actuator, audit))
}
