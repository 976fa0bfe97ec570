//! Error taxonomy for the ingestion and training pipeline.
//!
//! Mirrors the kinds enumerated in the design doc rather than introducing
//! one variant per call site: low-level transient failures are absorbed by
//! retries inside [`crate::opensensemap`], and only the permanent/terminal
//! kinds below cross component boundaries.

use thiserror::Error;

/// Errors surfaced by the OpenSenseMap client (C2).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("failed to decode response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },
}

impl ClientError {
    /// Whether a retry is worth attempting, per the §4.1 retry policy:
    /// transport/timeout/5xx/decode errors are retryable, 4xx (except 429)
    /// is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { .. } | ClientError::Decode { .. } | ClientError::Timeout { .. } => true,
            ClientError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Errors raised by the store (C3). `Persistence` in the design's taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row referenced an artifact that is not on disk: {path}")]
    MissingArtifact { path: String },
}

/// Outcome of a single (sensor, sub-interval) chunk fetch (C5). A typed
/// outcome rather than a `Result` because the orchestrator must distinguish
/// "succeeded with zero points" from "retry exhausted" without relying on
/// exceptions for control flow (per the Design Notes' redesign flag).
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub sensor_id: String,
    pub chunk_from: chrono::DateTime<chrono::Utc>,
    pub chunk_to: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub points_stored: u64,
    pub points_skipped: u64,
    pub last_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn success(
        sensor_id: impl Into<String>,
        chunk_from: chrono::DateTime<chrono::Utc>,
        chunk_to: chrono::DateTime<chrono::Utc>,
        points_stored: u64,
        points_skipped: u64,
        last_ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Self {
        ChunkOutcome {
            sensor_id: sensor_id.into(),
            chunk_from,
            chunk_to,
            success: true,
            points_stored,
            points_skipped,
            last_ts,
            error: None,
        }
    }

    pub fn failed(
        sensor_id: impl Into<String>,
        chunk_from: chrono::DateTime<chrono::Utc>,
        chunk_to: chrono::DateTime<chrono::Utc>,
        error: impl Into<String>,
    ) -> Self {
        ChunkOutcome {
            sensor_id: sensor_id.into(),
            chunk_from,
            chunk_to,
            success: false,
            points_stored: 0,
            points_skipped: 0,
            last_ts: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of training a single forecast horizon (C8). A horizon failure
/// never propagates as an exception — it is isolated and reported.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub horizon_hours: u32,
    pub model_path: Option<String>,
    pub error: Option<String>,
}

/// Result of a registry lookup (C10), modeled as a three-way outcome
/// instead of a 404-as-exception per the Design Notes.
#[derive(Debug, Clone)]
pub enum LookupOutcome<T> {
    Found(T),
    Absent,
    Errored(String),
}
