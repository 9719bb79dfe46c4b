//! HTTP ingress for channel events.
//!
//! Emitters publish events with `POST /channels/{channel}/events` and a
//! JSON envelope:
//!
//! ```text
//! { "name": "<event name>", "data": "<payload as a JSON string>" }
//! ```
//!
//! The listener is deliberately forgiving: events for other channels or
//! with other names are acknowledged with `202 Accepted` and ignored,
//! so unrelated traffic on a shared emitter never errors. Only a body
//! that is not a valid envelope is rejected with `400 Bad Request`.
//! Everything that reaches the pipeline answers `200 OK` regardless of
//! the access decision; the response never reveals whether a passcode
//! was accepted.
//!
//! Oversized bodies are cut off by [`DefaultBodyLimit`] before they
//! reach the handler.

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use chrono::Utc;
use doorman_core::pipeline::SharedPipeline;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while receiving an event.
#[derive(Debug, Error)]
pub enum IngressError {
    /// The request body is not a valid event envelope.
    #[error("invalid event envelope: {0}")]
    InvalidEnvelope(String),
}

impl IngressError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        // Generic body only; parse details stay in the logs
        let status = self.status_code();
        let body = match &self {
            Self::InvalidEnvelope(_) => "Invalid event envelope",
        };
        (status, body).into_response()
    }
}

/// The published event envelope.
///
/// `data` is a string holding the actual payload, itself JSON. The
/// envelope is decoded leniently so emitters may attach extra fields.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    name: String,
    data: String,
}

/// Shared state for the ingress handler.
#[derive(Debug)]
pub struct IngressState {
    pipeline: SharedPipeline,
    channel: String,
    event: String,
}

impl IngressState {
    /// Binds the pipeline to the channel and event name to listen for.
    #[must_use]
    pub fn new(
        pipeline: SharedPipeline,
        channel: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            channel: channel.into(),
            event: event.into(),
        }
    }
}

/// Shared reference to the ingress state.
pub type SharedIngressState = Arc<IngressState>;

/// Builds the ingress router.
pub fn router(state: SharedIngressState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/channels/:channel/events", post(publish_event))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Handles `POST /channels/{channel}/events`.
async fn publish_event(
    State(state): State<SharedIngressState>,
    Path(channel): Path<String>,
    body: String,
) -> Result<StatusCode, IngressError> {
    let received_at = Utc::now();

    if channel != state.channel {
        debug!(channel = %channel, "acknowledging event for unwatched channel");
        return Ok(StatusCode::ACCEPTED);
    }

    let envelope: EventEnvelope = serde_json::from_str(&body).map_err(|error| {
        warn!(error = %error, "rejecting malformed event envelope");
        IngressError::InvalidEnvelope(error.to_string())
    })?;

    if envelope.name != state.event {
        debug!(event = %envelope.name, "acknowledging unwatched event name");
        return Ok(StatusCode::ACCEPTED);
    }

    state.pipeline.process_raw(&envelope.data, received_at).await;
    Ok(StatusCode::OK)
}
