//! Progress sink abstraction for analysis runs.

use legal_mcp_types::ProgressEvent;

/// Error type for progress delivery.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("session is closed")]
    SessionClosed,

    #[error("no client is listening for notifications")]
    Disconnected,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives progress events produced by an analysis run.
///
/// Delivery failures are reported back to the caller, which logs them and
/// keeps going; a sink can never abort a run.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent) -> Result<(), SinkError>;
}
