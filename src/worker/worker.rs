//! A single named worker thread.
//!
//! The `Worker` exclusively owns its OS thread. Control methods take
//! `&mut self` and are called under the registry lock; the running thread
//! only shares the small `Shared` block with them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::worker::options::{CallbackFailureReaction, WorkerCallback, WorkerOptions};
use crate::worker::priority;
use crate::worker::rate::{self, RateStats};
use crate::worker::state::{WorkerEvent, WorkerState};

/// State shared between the owning `Worker` and its thread.
struct Shared {
    name: String,
    timestep: Mutex<Duration>,
    state: Mutex<WorkerState>,
    /// Bumped under the `state` lock on every start.
    generation: AtomicU64,
    stats: Mutex<RateStats>,
}

impl Shared {
    fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn timestep(&self) -> Duration {
        *self.timestep.lock()
    }
}

/// Move `state` to `to`. The caller holds the state lock.
fn transition(state: &mut WorkerState, to: WorkerState) {
    debug_assert!(
        state.can_transition_to(to),
        "invalid worker transition {state} -> {to}"
    );
    *state = to;
}

/// A periodic (or one-shot) callback running on its own thread.
pub struct Worker {
    shared: Arc<Shared>,
    callback: WorkerCallback,
    default_priority: i32,
    enforce_rate: bool,
    failure_reaction: CallbackFailureReaction,
    thread: Option<JoinHandle<()>>,
    /// Dropping this sender is the stop signal.
    stop_tx: Option<Sender<()>>,
}

impl Worker {
    /// Create an idle worker. No thread is spawned until [`Worker::start`].
    pub fn new(options: WorkerOptions) -> Result<Self, WorkerError> {
        if options.name.trim().is_empty() {
            return Err(WorkerError::InvalidOptions {
                name: options.name,
                reason: "name must not be empty".to_string(),
            });
        }
        if options.name.contains('\0') {
            return Err(WorkerError::InvalidOptions {
                name: options.name,
                reason: "name must not contain NUL bytes".to_string(),
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                name: options.name,
                timestep: Mutex::new(options.timestep),
                state: Mutex::new(WorkerState::Idle),
                generation: AtomicU64::new(0),
                stats: Mutex::new(RateStats::default()),
            }),
            callback: options.callback,
            default_priority: options.default_priority,
            enforce_rate: options.enforce_rate,
            failure_reaction: options.failure_reaction,
            thread: None,
            stop_tx: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn timestep(&self) -> Duration {
        self.shared.timestep()
    }

    pub fn default_priority(&self) -> i32 {
        self.default_priority
    }

    /// Snapshot of the timing counters.
    pub fn stats(&self) -> RateStats {
        self.shared.stats.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// The thread has exited; dropping the worker will not block.
    pub fn is_destructible(&self) -> bool {
        self.state() == WorkerState::Terminated
    }

    /// Change the period. Picked up by the next iteration of a running loop.
    pub fn set_timestep(&self, timestep: Duration) {
        *self.shared.timestep.lock() = timestep;
        debug!(worker = %self.name(), ?timestep, "Worker timestep changed");
    }

    /// Start at the configured default priority.
    pub fn start_default(&mut self) -> Result<(), WorkerError> {
        self.start(self.default_priority)
    }

    /// Spawn the worker thread.
    ///
    /// A no-op if already running. If a previous stop is still in flight the
    /// old thread is joined first, so there is never more than one thread.
    /// Restarting from the worker's own thread is refused, since that thread
    /// cannot be joined.
    pub fn start(&mut self, priority: i32) -> Result<(), WorkerError> {
        match self.state() {
            WorkerState::Running => {
                debug!(worker = %self.name(), "Worker already running");
                return Ok(());
            }
            WorkerState::StopRequested => {
                debug!(worker = %self.name(), "Waiting for previous run to finish before restart");
            }
            WorkerState::Idle | WorkerState::Terminated => {}
        }

        if self.is_own_thread() {
            error!(worker = %self.name(), "Worker cannot restart itself from its own thread");
            return Err(WorkerError::RestartFromOwnThread {
                name: self.name().to_string(),
            });
        }
        self.join_thread();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        *self.shared.stats.lock() = RateStats::default();
        let (previous, generation) = {
            let mut state = self.shared.state.lock();
            let previous = *state;
            transition(&mut state, WorkerState::Running);
            (previous, self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1)
        };

        let run = RunLoop {
            shared: Arc::clone(&self.shared),
            generation,
            callback: Arc::clone(&self.callback),
            enforce_rate: self.enforce_rate,
            failure_reaction: self.failure_reaction,
            priority,
            stop_rx,
        };

        match thread::Builder::new()
            .name(self.name().to_string())
            .spawn(move || run.run())
        {
            Ok(handle) => {
                self.thread = Some(handle);
                self.stop_tx = Some(stop_tx);
                info!(
                    worker = %self.name(),
                    priority,
                    timestep = ?self.timestep(),
                    "Worker started"
                );
                Ok(())
            }
            Err(source) => {
                // No thread was spawned; restore the pre-start state.
                *self.shared.state.lock() = previous;
                error!(worker = %self.name(), "Failed to spawn worker thread: {source}");
                Err(WorkerError::SpawnFailed {
                    name: self.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Signal the thread to stop; with `wait`, block until it has exited.
    pub fn stop(&mut self, wait: bool) {
        if self.stop_tx.take().is_some() {
            let mut state = self.shared.state.lock();
            if *state == WorkerState::Running {
                transition(&mut state, WorkerState::StopRequested);
            }
            drop(state);
            debug!(worker = %self.name(), "Worker stop requested");
        }

        if wait {
            self.join_thread();
        }
    }

    fn is_own_thread(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    fn join_thread(&mut self) {
        if self.is_own_thread() {
            warn!(worker = %self.name(), "Worker cannot join its own thread");
            return;
        }
        let Some(handle) = self.thread.take() else {
            return;
        };

        if handle.join().is_err() {
            error!(worker = %self.name(), "Worker thread panicked outside its callback");
            let mut state = self.shared.state.lock();
            if state.has_thread() {
                transition(&mut state, WorkerState::Terminated);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop(true);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("timestep", &self.timestep())
            .finish_non_exhaustive()
    }
}

/// Marks the worker terminated when the thread leaves its loop, however it
/// leaves. A newer run owns the state and is left alone.
struct TerminateOnExit {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for TerminateOnExit {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if self.shared.generation.load(Ordering::SeqCst) == self.generation && state.has_thread() {
            transition(&mut state, WorkerState::Terminated);
        }
    }
}

/// Everything the worker thread owns.
struct RunLoop {
    shared: Arc<Shared>,
    generation: u64,
    callback: WorkerCallback,
    enforce_rate: bool,
    failure_reaction: CallbackFailureReaction,
    priority: i32,
    stop_rx: Receiver<()>,
}

impl RunLoop {
    fn run(self) {
        let name = self.shared.name.clone();
        let _terminate = TerminateOnExit {
            shared: Arc::clone(&self.shared),
            generation: self.generation,
        };

        if let Err(e) = priority::apply_to_current_thread(self.priority) {
            warn!(worker = %name, priority = self.priority, "Failed to set thread priority: {e}");
        }

        let mut deadline = Instant::now();
        let mut iteration: u64 = 0;

        loop {
            match self.stop_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => break,
            }

            let timestep = self.shared.timestep();
            let event = WorkerEvent {
                timestep,
                timestamp: Utc::now(),
                iteration,
            };

            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(&event)));
            let processing = started.elapsed();
            iteration += 1;

            let overrun = self
                .shared
                .stats
                .lock()
                .record(event.timestamp, processing, timestep);
            if overrun {
                warn!(
                    worker = %name,
                    ?processing,
                    ?timestep,
                    "Worker too slow, iteration overran its timestep"
                );
            }

            match outcome {
                Ok(true) => {}
                Ok(false) => match self.failure_reaction {
                    CallbackFailureReaction::Ignore => {
                        warn!(worker = %name, iteration = event.iteration, "Worker callback failed");
                    }
                    CallbackFailureReaction::StopWorker => {
                        error!(worker = %name, iteration = event.iteration, "Worker callback failed, stopping worker");
                        break;
                    }
                },
                Err(_) => {
                    error!(worker = %name, iteration = event.iteration, "Worker callback panicked, stopping worker");
                    break;
                }
            }

            if timestep.is_zero() {
                debug!(worker = %name, "One-shot worker finished");
                break;
            }

            let signal = match rate::next_deadline(deadline, Instant::now(), timestep, self.enforce_rate) {
                Some(next) => {
                    deadline = next;
                    self.stop_rx.recv_deadline(next)
                }
                None => {
                    debug!(worker = %name, ?timestep, "Next iteration is beyond the clock range, idling until stopped");
                    self.stop_rx
                        .recv()
                        .map_err(|_| RecvTimeoutError::Disconnected)
                }
            };
            match signal {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(worker = %name, iterations = iteration, "Worker terminated");
    }
}
