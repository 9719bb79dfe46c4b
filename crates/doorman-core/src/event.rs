//! Decoding of incoming access events.
//!
//! The transport delivers event payloads as JSON text with two fields:
//!
//! ```json
//! {"message": "<passcode>", "ip": "<source identifier>"}
//! ```
//!
//! The two fields degrade differently. A payload without a usable
//! `message` cannot be decided at all and fails the decode; a payload
//! without a usable `ip` still carries a passcode, so it decodes to an
//! attempt with no source identifier (which disables failure tracking
//! for that single event). Extra fields are ignored.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Payload field holding the passcode.
const PASSCODE_FIELD: &str = "message";

/// Payload field holding the claimed source identifier.
const SOURCE_FIELD: &str = "ip";

/// Errors from decoding an event payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not a JSON document.
    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The payload has no string `message` field.
    #[error("payload field `{PASSCODE_FIELD}` is missing or not a string")]
    MissingPasscode,
}

/// A decoded access attempt.
///
/// The timestamp is stamped by the caller when the event arrives and is
/// the clock reading used for every time-dependent decision about this
/// attempt (failure windows, audit lines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessAttempt {
    /// The presented passcode.
    pub passcode: String,

    /// The claimed source identifier, if the payload carried one.
    pub source: Option<String>,

    /// When the event arrived.
    pub timestamp: DateTime<Utc>,
}

impl AccessAttempt {
    /// Creates an attempt from already-decoded parts.
    #[must_use]
    pub fn new(
        passcode: impl Into<String>,
        source: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            passcode: passcode.into(),
            source,
            timestamp,
        }
    }

    /// Decodes an attempt from a raw payload string.
    ///
    /// `received_at` becomes the attempt's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedPayload`] if the payload is not
    /// JSON, or [`DecodeError::MissingPasscode`] if the passcode field is
    /// absent or not a string. A missing or non-string source field is
    /// not an error; the attempt simply carries no source.
    pub fn parse(data: &str, received_at: DateTime<Utc>) -> Result<Self, DecodeError> {
        let payload: Value = serde_json::from_str(data)?;

        let passcode = payload
            .get(PASSCODE_FIELD)
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingPasscode)?
            .to_owned();

        let source = payload
            .get(SOURCE_FIELD)
            .and_then(Value::as_str)
            .map(str::to_owned);
        if source.is_none() {
            tracing::debug!("payload carries no usable source field, failure tracking disabled");
        }

        Ok(Self {
            passcode,
            source,
            timestamp: received_at,
        })
    }
}
