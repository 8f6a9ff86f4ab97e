//! Worker system: named periodic threads under a shared registry.
//!
//! Core components:
//! - `options`: Registration options and callback type
//! - `state`: Worker state machine (Idle → Running → StopRequested → Terminated)
//! - `rate`: Iteration scheduling and timing statistics
//! - `priority`: OS scheduling priority for worker threads
//! - `worker`: A single worker owning one thread
//! - `manager`: Lock-guarded registry of workers keyed by name

pub mod manager;
pub mod options;
mod priority;
pub mod rate;
pub mod state;
pub mod worker;

pub use manager::{WorkerManager, WorkerSummary};
pub use options::{CallbackFailureReaction, WorkerCallback, WorkerOptions};
pub use rate::RateStats;
pub use state::{WorkerEvent, WorkerState};
pub use worker::Worker;
