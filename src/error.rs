//! Error types for the worker registry.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker lifecycle and registry errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {name} already exists")]
    DuplicateName { name: String },

    #[error("Worker {name} not found")]
    NotFound { name: String },

    #[error("Worker {name} failed to spawn its thread: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid options for worker {name:?}: {reason}")]
    InvalidOptions { name: String, reason: String },

    #[error("Worker {name} cannot be restarted from its own thread")]
    RestartFromOwnThread { name: String },
}

impl WorkerError {
    /// Name of the worker this error refers to.
    pub fn worker_name(&self) -> &str {
        match self {
            Self::DuplicateName { name }
            | Self::NotFound { name }
            | Self::SpawnFailed { name, .. }
            | Self::InvalidOptions { name, .. }
            | Self::RestartFromOwnThread { name } => name,
        }
    }
}
