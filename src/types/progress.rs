use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a `complete` or `stream` operation.
///
/// `Starting → {Processing | Streaming…} → {Complete | Failed}`; the last two
/// are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    Starting,
    Processing,
    Streaming,
    Complete,
    Failed,
}

impl ProgressState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressState::Complete | ProgressState::Failed)
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressState::Starting => "starting",
            ProgressState::Processing => "processing",
            ProgressState::Streaming => "streaming",
            ProgressState::Complete => "complete",
            ProgressState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Immutable snapshot emitted to progress observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub state: ProgressState,
    pub message: String,
    /// Time since the operation started.
    pub elapsed: Duration,
    /// Provider invocations made so far, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
}
