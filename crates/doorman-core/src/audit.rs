//! Append-only audit log of access decisions.
//!
//! Every decided outcome becomes one `;`-separated line, flushed as
//! soon as it is written so external readers (and the operator tailing
//! the file) see it immediately. There is no batching and no rotation;
//! the file only ever grows.
//!
//! Line formats:
//!
//! ```text
//! <rfc3339>;Success;<identity>
//! <rfc3339>;Failed;<passcode>
//! <rfc3339>;Blocked;user=<identity or -> source=<source> count=<n> first=<rfc3339> last=<rfc3339>
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::scoreboard::FailureRecord;

/// Errors from the audit log.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The log file could not be opened for appending.
    #[error("failed to open audit log {path}: {source}")]
    Open {
        /// Path of the audit log.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line could not be appended.
    #[error("failed to append to audit log {path}: {source}")]
    Write {
        /// Path of the audit log.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// A decided outcome, ready to be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A valid passcode was presented and the actuation was triggered.
    Success {
        /// Identity the passcode mapped to.
        identity: String,
    },

    /// An unknown passcode was presented.
    Failed {
        /// The passcode as presented.
        passcode: String,
    },

    /// The source was blocked by the failure scoreboard.
    Blocked {
        /// Identity the passcode mapped to, if it was valid.
        identity: Option<String>,
        /// The claimed source identifier.
        source: String,
        /// The source's failure record after this attempt.
        record: FailureRecord,
    },
}

/// Append-only audit log file.
///
/// Writes from concurrent events are serialized by an internal mutex;
/// each write is flushed before the lock is released.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// Opens the log for appending, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Open`] if the file cannot be opened. An
    /// audit trail is not optional, so callers treat this as fatal at
    /// startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| AuditError::Open {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), "audit log open");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Appends one outcome line stamped with the event's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Write`] if the append or flush fails.
    pub fn record(&self, at: DateTime<Utc>, outcome: &Outcome) -> Result<(), AuditError> {
        let line = format_line(at, outcome);
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .map_err(|source| AuditError::Write {
                path: self.path.clone(),
                source,
            })
    }

    /// Path of the backing log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Default audit log path: `access.<unix millis>.log` in the working
/// directory.
#[must_use]
pub fn default_audit_path() -> PathBuf {
    PathBuf::from(format!("access.{}.log", Utc::now().timestamp_millis()))
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_line(at: DateTime<Utc>, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success { identity } => format!("{};Success;{identity}", stamp(at)),
        Outcome::Failed { passcode } => format!("{};Failed;{passcode}", stamp(at)),
        Outcome::Blocked {
            identity,
            source,
            record,
        } => format!(
            "{};Blocked;user={} source={source} count={} first={} last={}",
            stamp(at),
            identity.as_deref().unwrap_or("-"),
            record.count,
            stamp(record.first_failure_at),
            stamp(record.last_failure_at),
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn test_record() -> FailureRecord {
        FailureRecord {
            count: 11,
            first_failure_at: base_time(),
            last_failure_at: base_time() + chrono::Duration::seconds(30),
        }
    }

    #[test]
    fn test_success_line_format() {
        let line = format_line(
            base_time(),
            &Outcome::Success {
                identity: "Alice".to_owned(),
            },
        );
        assert_eq!(line, "2024-03-01T12:00:00.000Z;Success;Alice");
    }

    #[test]
    fn test_failed_line_format() {
        let line = format_line(
            base_time(),
            &Outcome::Failed {
                passcode: "9999".to_owned(),
            },
        );
        assert_eq!(line, "2024-03-01T12:00:00.000Z;Failed;9999");
    }

    #[test]
    fn test_blocked_line_format() {
        let line = format_line(
            base_time(),
            &Outcome::Blocked {
                identity: Some("Alice".to_owned()),
                source: "10.0.0.5".to_owned(),
                record: test_record(),
            },
        );
        assert_eq!(
            line,
            "2024-03-01T12:00:00.000Z;Blocked;user=Alice source=10.0.0.5 count=11 \
             first=2024-03-01T12:00:00.000Z last=2024-03-01T12:00:30.000Z"
        );
    }

    #[test]
    fn test_blocked_line_without_identity() {
        let line = format_line(
            base_time(),
            &Outcome::Blocked {
                identity: None,
                source: "10.0.0.5".to_owned(),
                record: test_record(),
            },
        );
        assert!(line.contains("user=- source=10.0.0.5"));
    }

    #[test]
    fn test_record_appends_and_is_immediately_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let log = AuditLog::open(&path).unwrap();

        log.record(
            base_time(),
            &Outcome::Success {
                identity: "Alice".to_owned(),
            },
        )
        .unwrap();

        // Visible without closing the log
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "2024-03-01T12:00:00.000Z;Success;Alice\n");

        log.record(
            base_time(),
            &Outcome::Failed {
                passcode: "9999".to_owned(),
            },
        )
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_open_preserves_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "existing line\n").unwrap();

        let log = AuditLog::open(&path).unwrap();
        log.record(
            base_time(),
            &Outcome::Success {
                identity: "Alice".to_owned(),
            },
        )
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("existing line\n"));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_open_fails_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = AuditLog::open(dir.path().join("no-such-dir").join("access.log"));
        assert!(matches!(result, Err(AuditError::Open { .. })));
    }

    #[test]
    fn test_default_audit_path_shape() {
        let path = default_audit_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("access."));
        assert!(name.ends_with(".log"));
    }
}
