//! Worker registration options.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::worker::state::WorkerEvent;

/// Unit of work run on every iteration. Returns `false` on failure.
pub type WorkerCallback = Arc<dyn Fn(&WorkerEvent) -> bool + Send + Sync>;

/// What a worker does when its callback reports failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackFailureReaction {
    /// Log a warning and keep running.
    #[default]
    Ignore,
    /// Log an error and terminate the worker thread.
    StopWorker,
}

/// Everything needed to construct a worker.
#[derive(Clone)]
pub struct WorkerOptions {
    /// Registry key. Must be non-empty.
    pub name: String,
    /// Target period between iterations. Zero runs the callback once.
    pub timestep: Duration,
    /// Priority used by `start_workers` and autostart. Zero inherits.
    pub default_priority: i32,
    /// Start immediately after registration.
    pub autostart: bool,
    /// Keep a fixed schedule and catch up on missed periods.
    pub enforce_rate: bool,
    pub failure_reaction: CallbackFailureReaction,
    pub callback: WorkerCallback,
}

impl WorkerOptions {
    /// Create options with default priority, no autostart, relaxed rate.
    pub fn new<F>(name: impl Into<String>, timestep: Duration, callback: F) -> Self
    where
        F: Fn(&WorkerEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            timestep,
            default_priority: 0,
            autostart: false,
            enforce_rate: false,
            failure_reaction: CallbackFailureReaction::default(),
            callback: Arc::new(callback),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn with_enforce_rate(mut self, enforce_rate: bool) -> Self {
        self.enforce_rate = enforce_rate;
        self
    }

    pub fn with_failure_reaction(mut self, reaction: CallbackFailureReaction) -> Self {
        self.failure_reaction = reaction;
        self
    }
}

impl std::fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("name", &self.name)
            .field("timestep", &self.timestep)
            .field("default_priority", &self.default_priority)
            .field("autostart", &self.autostart)
            .field("enforce_rate", &self.enforce_rate)
            .field("failure_reaction", &self.failure_reaction)
            .finish_non_exhaustive()
    }
}
