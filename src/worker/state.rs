//! Worker lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, never started.
    Idle,
    /// Thread active, executing the callback.
    Running,
    /// Stop signalled; the thread may still be finishing its current iteration.
    StopRequested,
    /// Thread has exited.
    Terminated,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Idle, Running) |
            (Running, StopRequested) | (Running, Terminated) |
            (StopRequested, Terminated) |
            (Terminated, Running)
        )
    }

    /// A thread exists for this state (it may be about to exit).
    pub fn has_thread(&self) -> bool {
        matches!(self, Self::Running | Self::StopRequested)
    }

    /// Check if the worker is currently running its loop.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Passed to the callback on every iteration.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    /// Timestep in effect for this iteration.
    pub timestep: Duration,
    /// Wall-clock time the iteration started.
    pub timestamp: DateTime<Utc>,
    /// Zero-based iteration counter, reset on every start.
    pub iteration: u64,
}
