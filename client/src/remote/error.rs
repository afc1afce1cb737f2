//! Error types for the remote service boundary.
//!
//! Transport failures abort the current turn. Side-channel failures
//! (feedback, trace) are isolated: they surface as transient notices and
//! never reach the turn state machine.

use thiserror::Error;

/// The stream failed to open or broke mid-flight.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to reach chat service: {0}")]
    Request(#[from] reqwest::Error),

    #[error("chat service returned HTTP {status}")]
    Status { status: u16 },

    #[error("stream reported an error: {0}")]
    Stream(String),

    #[error("malformed stream event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Feedback submission failed. The local feedback state is left unset so
/// the user may retry.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("failed to submit feedback: {0}")]
    Request(#[from] reqwest::Error),

    #[error("feedback rejected with code {code}")]
    Rejected { code: i64 },
}

/// Trace lookup failed. Purely informational, no state mutation.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to fetch trace link: {0}")]
    Request(#[from] reqwest::Error),

    #[error("trace is not available for this run")]
    Unavailable,
}
