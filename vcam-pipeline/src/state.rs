//! Pipeline lifecycle state shared between the controller and its loop

use std::fmt;

/// Lifecycle of a [`PipelineController`](crate::PipelineController)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
    /// Unrecoverable source failure; cleared only by `reset()`
    Failed(String),
}

impl PipelineState {
    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineState::Failed(_))
    }

    /// Numeric code for the C ABI
    pub fn code(&self) -> i32 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Starting => 1,
            PipelineState::Running => 2,
            PipelineState::Stopping => 3,
            PipelineState::Failed(_) => 4,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Starting => f.write_str("starting"),
            PipelineState::Running => f.write_str("running"),
            PipelineState::Stopping => f.write_str("stopping"),
            PipelineState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// State plus the most recent error, written by whichever side ends a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub last_error: Option<String>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            state: PipelineState::Idle,
            last_error: None,
        }
    }
}
