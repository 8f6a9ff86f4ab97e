//! Configuration types.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::worker::{CallbackFailureReaction, WorkerEvent, WorkerOptions};

/// Serializable half of [`WorkerOptions`]; the callback is supplied in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker name (registry key).
    pub name: String,
    /// Period between iterations in seconds. Zero runs once.
    pub timestep_secs: f64,
    /// OS scheduling priority. Zero inherits the parent's policy.
    pub priority: i32,
    /// Start right after registration.
    pub autostart: bool,
    /// Keep a fixed schedule and catch up on missed periods.
    pub enforce_rate: bool,
    /// Reaction to a callback reporting failure.
    pub failure_reaction: CallbackFailureReaction,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            timestep_secs: 0.1,
            priority: 0,
            autostart: false,
            enforce_rate: false,
            failure_reaction: CallbackFailureReaction::Ignore,
        }
    }
}

impl WorkerSettings {
    /// Validated timestep.
    pub fn timestep(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.timestep_secs).map_err(|e| ConfigError::InvalidValue {
            key: format!("{}.timestep_secs", self.name),
            message: e.to_string(),
        })
    }

    /// Validate and pair with a callback.
    pub fn into_options<F>(self, callback: F) -> Result<WorkerOptions, ConfigError>
    where
        F: Fn(&WorkerEvent) -> bool + Send + Sync + 'static,
    {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "name".to_string(),
                message: "worker name must not be empty".to_string(),
            });
        }
        let timestep = self.timestep()?;

        Ok(WorkerOptions::new(self.name, timestep, callback)
            .with_priority(self.priority)
            .with_autostart(self.autostart)
            .with_enforce_rate(self.enforce_rate)
            .with_failure_reaction(self.failure_reaction))
    }
}

/// Load a JSON array of worker settings.
pub fn load_settings(path: &Path) -> Result<Vec<WorkerSettings>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let settings: Vec<WorkerSettings> = serde_json::from_str(&raw)?;
    for s in &settings {
        s.timestep()?;
    }
    Ok(settings)
}
