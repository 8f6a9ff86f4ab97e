//! Registry of named workers.
//!
//! Every lookup, insertion, removal and sweep holds the single registry lock.
//! Sweeps (`start_workers`, `stop_workers`, `clear_workers`) keep the lock for
//! their whole duration, so the set of workers cannot change underneath them.
//! A callback that calls back into the manager while `clear_workers` or
//! `stop_workers(true)` is joining its thread will deadlock.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::options::WorkerOptions;
use crate::worker::rate::RateStats;
use crate::worker::state::WorkerState;
use crate::worker::worker::Worker;

/// Thread-safe registry of workers keyed by name.
pub struct WorkerManager {
    workers: Mutex<HashMap<String, Worker>>,
}

impl WorkerManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new worker, starting it if `options.autostart` is set.
    ///
    /// A duplicate name is rejected and the existing entry is left untouched.
    /// If autostart fails the worker stays registered in the idle state and
    /// the start error is returned.
    pub fn add_worker(&self, options: WorkerOptions) -> Result<(), WorkerError> {
        let mut workers = self.workers.lock();

        let slot = match workers.entry(options.name.clone()) {
            Entry::Occupied(entry) => {
                error!(worker = %entry.key(), "Failed to create worker, name already registered");
                return Err(WorkerError::DuplicateName {
                    name: entry.key().clone(),
                });
            }
            Entry::Vacant(slot) => slot,
        };

        let autostart = options.autostart;
        let worker = Worker::new(options).inspect_err(|e| {
            error!(worker = %e.worker_name(), "Failed to create worker: {e}");
        })?;
        let worker = slot.insert(worker);
        debug!(worker = %worker.name(), "Worker registered");

        if autostart {
            return worker.start_default();
        }
        Ok(())
    }

    /// Run `f` on the named worker under the registry lock, or report it missing.
    fn with_worker<R>(
        &self,
        name: &str,
        action: &str,
        f: impl FnOnce(&mut Worker) -> R,
    ) -> Result<R, WorkerError> {
        let mut workers = self.workers.lock();
        match workers.get_mut(name) {
            Some(worker) => Ok(f(worker)),
            None => {
                error!(worker = %name, "Cannot {action} worker, worker not found");
                Err(WorkerError::NotFound {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Start the named worker at `priority`.
    pub fn start_worker(&self, name: &str, priority: i32) -> Result<(), WorkerError> {
        self.with_worker(name, "start", |worker| worker.start(priority))?
    }

    /// Start every registered worker at its default priority.
    ///
    /// All workers are attempted; the first failure is returned.
    pub fn start_workers(&self) -> Result<(), WorkerError> {
        let mut workers = self.workers.lock();
        let mut first_error = None;
        for worker in workers.values_mut() {
            if let Err(e) = worker.start_default() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop the named worker; with `wait`, block until its thread has exited.
    pub fn stop_worker(&self, name: &str, wait: bool) -> Result<(), WorkerError> {
        self.with_worker(name, "stop", |worker| worker.stop(wait))
    }

    /// Stop every registered worker.
    ///
    /// All workers are signalled before any is joined, so they wind down in
    /// parallel.
    pub fn stop_workers(&self, wait: bool) {
        let mut workers = self.workers.lock();
        for worker in workers.values_mut() {
            worker.stop(false);
        }
        if wait {
            for worker in workers.values_mut() {
                worker.stop(true);
            }
        }
    }

    /// Change the period of the named worker without restarting it.
    pub fn set_worker_timestep(&self, name: &str, timestep: Duration) -> Result<(), WorkerError> {
        self.with_worker(name, "change timestep of", |worker| {
            worker.set_timestep(timestep)
        })
    }

    /// Stop and remove every worker. Returns after all threads have been joined.
    pub fn clear_workers(&self) {
        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }

        for worker in workers.values_mut() {
            worker.stop(false);
        }

        let count = workers.len();
        // Dropping each worker joins its thread.
        workers.clear();
        info!(count, "Cleared all workers");
    }

    /// Remove the workers whose thread has exited. Returns how many were removed.
    pub fn clean_destructible_workers(&self) -> usize {
        let mut workers = self.workers.lock();
        let before = workers.len();
        workers.retain(|name, worker| {
            let destructible = worker.is_destructible();
            if destructible {
                debug!(worker = %name, "Removing terminated worker");
            }
            !destructible
        });
        before - workers.len()
    }

    pub fn has_worker(&self, name: &str) -> bool {
        self.workers.lock().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn worker_state(&self, name: &str) -> Option<WorkerState> {
        self.workers.lock().get(name).map(Worker::state)
    }

    pub fn worker_timestep(&self, name: &str) -> Option<Duration> {
        self.workers.lock().get(name).map(Worker::timestep)
    }

    pub fn worker_stats(&self, name: &str) -> Option<RateStats> {
        self.workers.lock().get(name).map(Worker::stats)
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    /// Count of workers per lifecycle state.
    pub fn summary(&self) -> WorkerSummary {
        let workers = self.workers.lock();

        let mut summary = WorkerSummary::default();
        for worker in workers.values() {
            match worker.state() {
                WorkerState::Idle => summary.idle += 1,
                WorkerState::Running => summary.running += 1,
                WorkerState::StopRequested => summary.stop_requested += 1,
                WorkerState::Terminated => summary.terminated += 1,
            }
        }

        summary.total = workers.len();
        summary
    }
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.clear_workers();
    }
}

/// Summary of all registered workers.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub total: usize,
    pub idle: usize,
    pub running: usize,
    pub stop_requested: usize,
    pub terminated: usize,
}
