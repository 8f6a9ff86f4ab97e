//! any-worker: named periodic worker threads with thread-safe lifecycle control.

pub mod config;
pub mod error;
pub mod worker;

pub use config::WorkerSettings;
pub use error::{ConfigError, WorkerError};
pub use worker::{
    CallbackFailureReaction, RateStats, Worker, WorkerEvent, WorkerManager, WorkerOptions,
    WorkerState, WorkerSummary,
};
