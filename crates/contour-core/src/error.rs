//! Error types for the contour gateway.

use std::time::Duration;

use thiserror::Error;

/// Failure classes for one relay request.
///
/// Every outcome of an invocation is a variant here; the HTTP layer matches
/// the enum exhaustively to pick a status code. Variant messages are the
/// response bodies the caller sees.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Request body was empty or not parseable as JSON. Rejected before any
    /// subprocess is spawned.
    #[error("Invalid JSON input")]
    InvalidInput(#[source] serde_json::Error),

    /// The compute executable could not be started at all.
    #[error("Failed to start compute process: {reason}")]
    SpawnFailed { reason: String },

    /// The compute executable exited with a non-zero status. `stderr` is the
    /// captured diagnostic text.
    #[error("Computation failed: {stderr}")]
    ComputationFailed { stderr: String },

    /// The compute executable exited successfully but its stdout is not JSON.
    #[error("Computation returned invalid JSON")]
    InvalidOutput,

    /// The configured time limit elapsed before the compute process exited;
    /// the process was killed.
    #[error("Computation timed out after {0:?}")]
    TimedOut(Duration),

    /// Pipe or process-management fault.
    #[error("Compute process I/O error: {0}")]
    Io(#[from] std::io::Error),
}
