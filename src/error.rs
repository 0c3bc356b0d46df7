use thiserror::Error;

use crate::extract::ReasoningResult;

/// HTTP statuses treated as transient when opening a stream.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("backend unavailable: {backend}: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("request failed: {body}")]
    RequestFailed { status: Option<u16>, body: String },

    #[error("timed out after {0}ms before first byte")]
    Timeout(u64),

    #[error("stream stalled: no data for {idle_ms}ms")]
    StreamStalled { idle_ms: u64 },

    #[error("no response content received")]
    NoResponse,

    #[error("final answer call failed: {message}")]
    FinalAnswer {
        message: String,
        /// The reasoning obtained before the second call failed. It has
        /// independent value and is surfaced alongside the failure.
        reasoning: ReasoningResult,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl RelayError {
    /// Returns true for transient failures that may succeed on retry.
    /// Only consulted before the first byte of a response is observed —
    /// nothing is retried mid-stream.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed { status, .. } => {
                status.is_some_and(|s| RETRYABLE_STATUSES.contains(&s))
            }
            Self::Timeout(_) => true,
            Self::Request(_) => true, // connection errors may be transient
            _ => false,
        }
    }

    /// Produce a sanitized message safe for end users.
    /// Does not leak credentials, internal URLs, or raw upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => format!("configuration error: {msg}"),
            Self::BackendUnavailable { backend, .. } => {
                format!("{backend} backend is not reachable — is it running?")
            }
            Self::RequestFailed { status, .. } => match status {
                Some(s) => format!("backend request failed with status {s}"),
                None => "backend request failed".to_string(),
            },
            Self::Timeout(ms) => format!("request timed out after {ms}ms"),
            Self::StreamStalled { idle_ms } => {
                format!("stream stalled after {idle_ms}ms without data")
            }
            Self::NoResponse => "no response received from the reasoning backend".to_string(),
            Self::FinalAnswer { .. } => "failed to obtain the final answer".to_string(),
            Self::Request(_) => "request to backend failed".to_string(),
        }
    }
}
