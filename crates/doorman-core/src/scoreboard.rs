//! Per-source failure tracking and blocking.
//!
//! The scoreboard keeps one [`FailureRecord`] per source identifier and
//! decides, for every attempt, whether the source is currently blocked.
//!
//! # Blocking Model
//!
//! - Every failed attempt from a source creates or increments that
//!   source's record and is itself reported as blocked. The audit trail
//!   therefore shows a `Blocked` outcome for each failure from a known
//!   source, with the running count.
//! - A valid attempt is blocked only while the source sits inside the
//!   block window: its most recent failure is younger than
//!   `block_window_secs` *and* its failure count exceeds
//!   `block_after_failures`. Outside the window even a high count no
//!   longer blocks, so a lockout heals on its own.
//! - Records outlive the block window by `expire_age_secs` so the
//!   failure history stays available for audit lines. A record is
//!   removed only when a valid attempt finds it expired; a record still
//!   inside an active block window is never removed, whatever its age.
//!
//! # Thread Safety
//!
//! All evaluations go through one mutex over the record map, so the
//! read-modify-write for a source is atomic with respect to concurrent
//! attempts from the same source.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

// =============================================================================
// Defaults
// =============================================================================

/// Failures beyond which a source is blocked inside the block window.
pub const DEFAULT_BLOCK_AFTER_FAILURES: u32 = 10;

/// Length of the block window after the most recent failure (1 hour).
pub const DEFAULT_BLOCK_WINDOW_SECS: u64 = 60 * 60;

/// Age after the most recent failure at which a non-blocked record is
/// dropped on the next valid attempt (8 hours).
pub const DEFAULT_EXPIRE_AGE_SECS: u64 = 8 * 60 * 60;

// =============================================================================
// ScoreboardConfig
// =============================================================================

/// Configuration for the failure scoreboard.
#[derive(Debug, Clone, Copy)]
pub struct ScoreboardConfig {
    /// Failure count a source must exceed before valid attempts are
    /// blocked.
    pub block_after_failures: u32,

    /// Block window length in seconds, measured from the most recent
    /// failure.
    pub block_window_secs: u64,

    /// Record expiry age in seconds, measured from the most recent
    /// failure.
    pub expire_age_secs: u64,
}

impl Default for ScoreboardConfig {
    fn default() -> Self {
        Self {
            block_after_failures: DEFAULT_BLOCK_AFTER_FAILURES,
            block_window_secs: DEFAULT_BLOCK_WINDOW_SECS,
            expire_age_secs: DEFAULT_EXPIRE_AGE_SECS,
        }
    }
}

impl ScoreboardConfig {
    /// Creates a config with a custom block threshold.
    #[must_use]
    pub const fn with_block_after_failures(mut self, count: u32) -> Self {
        self.block_after_failures = count;
        self
    }

    /// Creates a config with a custom block window.
    #[must_use]
    pub const fn with_block_window_secs(mut self, secs: u64) -> Self {
        self.block_window_secs = secs;
        self
    }

    /// Creates a config with a custom expiry age.
    #[must_use]
    pub const fn with_expire_age_secs(mut self, secs: u64) -> Self {
        self.expire_age_secs = secs;
        self
    }

    // chrono durations are bounded at i64::MAX milliseconds; clamp so an
    // absurd config cannot panic the conversion.
    const MAX_SECS: u64 = (i64::MAX / 1000) as u64;

    fn block_window(&self) -> Duration {
        Duration::seconds(self.block_window_secs.min(Self::MAX_SECS) as i64)
    }

    fn expire_age(&self) -> Duration {
        Duration::seconds(self.expire_age_secs.min(Self::MAX_SECS) as i64)
    }
}

// =============================================================================
// FailureRecord
// =============================================================================

/// Failure history for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Failures observed since the record was created.
    pub count: u32,

    /// When the first failure was observed.
    pub first_failure_at: DateTime<Utc>,

    /// When the most recent failure was observed.
    pub last_failure_at: DateTime<Utc>,
}

impl FailureRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            first_failure_at: now,
            last_failure_at: now,
        }
    }

    fn register_failure(&mut self, now: DateTime<Utc>) {
        self.count = self.count.saturating_add(1);
        self.last_failure_at = now;
    }

    /// Whether the source is inside the block window with too many
    /// failures.
    fn is_blocked(&self, now: DateTime<Utc>, config: &ScoreboardConfig) -> bool {
        now - self.last_failure_at < config.block_window()
            && self.count > config.block_after_failures
    }

    /// Whether the record is old enough to drop.
    ///
    /// A record inside an active block window is never expired, however
    /// old it is.
    fn is_expired(&self, now: DateTime<Utc>, config: &ScoreboardConfig) -> bool {
        now - self.last_failure_at > config.expire_age() && !self.is_blocked(now, config)
    }
}

// =============================================================================
// FailureScoreboard
// =============================================================================

/// Outcome of evaluating one attempt against the scoreboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The attempt must be denied. Carries a snapshot of the source's
    /// record as it stands after the evaluation, for the audit line.
    Blocked(FailureRecord),

    /// The attempt may proceed to the credential decision.
    Clear,
}

impl Verdict {
    /// Returns `true` for [`Verdict::Blocked`].
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Tracks failed attempts per source and decides block/allow.
///
/// Records are pruned lazily: a stale record is dropped when a valid
/// attempt from its source finds it expired. There is no background
/// sweep; the map is bounded by the number of distinct sources that
/// fail, which for this deployment is the set of hosts that can reach
/// the listener.
pub struct FailureScoreboard {
    config: ScoreboardConfig,
    records: Mutex<HashMap<String, FailureRecord>>,
}

impl FailureScoreboard {
    /// Creates a scoreboard with the given configuration.
    #[must_use]
    pub fn new(config: ScoreboardConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a scoreboard with default thresholds.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ScoreboardConfig::default())
    }

    /// Evaluates one attempt from `source` and updates the failure
    /// history in the same atomic step.
    ///
    /// `valid_login` says whether the presented passcode matched a known
    /// credential; `now` is the attempt's timestamp. An invalid attempt
    /// always yields [`Verdict::Blocked`] with the updated record. A
    /// valid attempt yields [`Verdict::Blocked`] only while the source
    /// is inside the block window with too many failures; if it instead
    /// finds the record expired, the record is dropped.
    pub fn evaluate(&self, source: &str, valid_login: bool, now: DateTime<Utc>) -> Verdict {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if !valid_login {
            let record = records
                .entry(source.to_owned())
                .and_modify(|record| record.register_failure(now))
                .or_insert_with(|| FailureRecord::new(now));
            tracing::warn!(
                source,
                count = record.count,
                "failed attempt recorded, source blocked"
            );
            return Verdict::Blocked(record.clone());
        }

        let Some(record) = records.get(source) else {
            return Verdict::Clear;
        };

        if record.is_expired(now, &self.config) {
            records.remove(source);
            tracing::debug!(source, "dropped expired failure record");
            return Verdict::Clear;
        }

        if record.is_blocked(now, &self.config) {
            tracing::warn!(
                source,
                count = record.count,
                "valid attempt from blocked source denied"
            );
            return Verdict::Blocked(record.clone());
        }

        Verdict::Clear
    }

    /// Returns a snapshot of the record for `source`, if one exists.
    #[must_use]
    pub fn snapshot(&self, source: &str) -> Option<FailureRecord> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        records.get(source).cloned()
    }

    /// Returns the number of sources with a failure record on file.
    #[must_use]
    pub fn tracked_sources(&self) -> usize {
        let records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        records.len()
    }
}

impl std::fmt::Debug for FailureScoreboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureScoreboard")
            .field("config", &self.config)
            .field("tracked_sources", &self.tracked_sources())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::TimeZone;

    use super::*;

    const SOURCE: &str = "10.0.0.5";

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn at_secs(offset: i64) -> DateTime<Utc> {
        base_time() + Duration::seconds(offset)
    }

    #[test]
    fn test_valid_attempt_from_unknown_source_is_clear() {
        let board = FailureScoreboard::with_defaults();
        let verdict = board.evaluate(SOURCE, true, base_time());
        assert_eq!(verdict, Verdict::Clear);
        assert_eq!(board.tracked_sources(), 0);
    }

    #[test]
    fn test_first_failure_creates_record_and_blocks() {
        let board = FailureScoreboard::with_defaults();
        let verdict = board.evaluate(SOURCE, false, base_time());

        let Verdict::Blocked(record) = verdict else {
            panic!("expected blocked verdict, got {verdict:?}");
        };
        assert_eq!(record.count, 1);
        assert_eq!(record.first_failure_at, base_time());
        assert_eq!(record.last_failure_at, base_time());
        assert_eq!(board.tracked_sources(), 1);
    }

    #[test]
    fn test_repeated_failures_increment_count() {
        let board = FailureScoreboard::with_defaults();
        for i in 0..5 {
            board.evaluate(SOURCE, false, at_secs(i));
        }

        let record = board.snapshot(SOURCE).unwrap();
        assert_eq!(record.count, 5);
        assert_eq!(record.first_failure_at, base_time());
        assert_eq!(record.last_failure_at, at_secs(4));
    }

    #[test]
    fn test_every_failure_is_blocked_regardless_of_count() {
        let board = FailureScoreboard::with_defaults();
        for i in 0..3 {
            let verdict = board.evaluate(SOURCE, false, at_secs(i));
            assert!(verdict.is_blocked(), "failure {i} should be blocked");
        }
    }

    #[test]
    fn test_valid_attempt_below_threshold_is_clear() {
        let board = FailureScoreboard::with_defaults();
        // 10 failures: count == threshold, not above it
        for i in 0..10 {
            board.evaluate(SOURCE, false, at_secs(i));
        }

        let verdict = board.evaluate(SOURCE, true, at_secs(60));
        assert_eq!(verdict, Verdict::Clear);
        // The record stays on file
        assert_eq!(board.snapshot(SOURCE).unwrap().count, 10);
    }

    #[test]
    fn test_valid_attempt_above_threshold_in_window_is_blocked() {
        let board = FailureScoreboard::with_defaults();
        for i in 0..11 {
            board.evaluate(SOURCE, false, at_secs(i));
        }

        let verdict = board.evaluate(SOURCE, true, at_secs(60));
        let Verdict::Blocked(record) = verdict else {
            panic!("expected blocked verdict");
        };
        assert_eq!(record.count, 11);
    }

    #[test]
    fn test_block_heals_once_window_elapses() {
        let board = FailureScoreboard::with_defaults();
        for i in 0..11 {
            board.evaluate(SOURCE, false, at_secs(i));
        }

        // Just past the 1 hour window since the last failure at +10s
        let after_window = at_secs(10 + 3601);
        let verdict = board.evaluate(SOURCE, true, after_window);
        assert_eq!(verdict, Verdict::Clear);

        // Not yet expired, so the history is retained
        assert_eq!(board.snapshot(SOURCE).unwrap().count, 11);
    }

    #[test]
    fn test_valid_attempt_drops_expired_record() {
        let board = FailureScoreboard::with_defaults();
        board.evaluate(SOURCE, false, base_time());

        // Past the 8 hour expiry age and outside the block window
        let later = at_secs(8 * 3600 + 1);
        let verdict = board.evaluate(SOURCE, true, later);
        assert_eq!(verdict, Verdict::Clear);
        assert_eq!(board.tracked_sources(), 0);

        // History starts over after the drop
        let verdict = board.evaluate(SOURCE, false, at_secs(8 * 3600 + 2));
        let Verdict::Blocked(record) = verdict else {
            panic!("expected blocked verdict");
        };
        assert_eq!(record.count, 1);
    }

    #[test]
    fn test_invalid_attempt_never_drops_record() {
        let board = FailureScoreboard::with_defaults();
        board.evaluate(SOURCE, false, base_time());

        // Way past expiry, but the attempt is invalid: the record is
        // refreshed instead of dropped
        let later = at_secs(9 * 3600);
        board.evaluate(SOURCE, false, later);

        let record = board.snapshot(SOURCE).unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.last_failure_at, later);
    }

    #[test]
    fn test_blocked_record_never_expires() {
        // Block window longer than the expiry age, so a record can be
        // both old enough to expire and still blocked
        let config = ScoreboardConfig::default()
            .with_block_window_secs(10 * 3600)
            .with_expire_age_secs(8 * 3600);
        let board = FailureScoreboard::new(config);
        for i in 0..11 {
            board.evaluate(SOURCE, false, at_secs(i));
        }

        // 9 hours later: past expire_age, inside the block window
        let later = at_secs(9 * 3600);
        let verdict = board.evaluate(SOURCE, true, later);
        assert!(verdict.is_blocked());
        assert_eq!(board.tracked_sources(), 1);
    }

    #[test]
    fn test_sources_tracked_independently() {
        let board = FailureScoreboard::with_defaults();
        for i in 0..11 {
            board.evaluate("10.0.0.5", false, at_secs(i));
        }
        board.evaluate("10.0.0.6", false, at_secs(0));

        assert!(board.evaluate("10.0.0.5", true, at_secs(60)).is_blocked());
        assert_eq!(board.evaluate("10.0.0.6", true, at_secs(60)), Verdict::Clear);
        assert_eq!(board.tracked_sources(), 2);
    }

    #[test]
    fn test_count_saturates() {
        let board = FailureScoreboard::with_defaults();
        {
            let mut records = board.records.lock().unwrap();
            records.insert(
                SOURCE.to_owned(),
                FailureRecord {
                    count: u32::MAX - 1,
                    first_failure_at: base_time(),
                    last_failure_at: base_time(),
                },
            );
        }

        board.evaluate(SOURCE, false, at_secs(1));
        board.evaluate(SOURCE, false, at_secs(2));
        assert_eq!(board.snapshot(SOURCE).unwrap().count, u32::MAX);
    }

    #[test]
    fn test_default_config() {
        let config = ScoreboardConfig::default();
        assert_eq!(config.block_after_failures, 10);
        assert_eq!(config.block_window_secs, 3600);
        assert_eq!(config.expire_age_secs, 8 * 3600);
    }

    #[test]
    fn test_concurrent_failures_lose_no_updates() {
        let board = Arc::new(FailureScoreboard::with_defaults());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let board = Arc::clone(&board);
                thread::spawn(move || {
                    for _ in 0..50 {
                        board.evaluate(SOURCE, false, Utc::now());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(board.snapshot(SOURCE).unwrap().count, 8 * 50);
    }
}
