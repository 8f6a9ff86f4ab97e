//! Integration tests for the worker registry.
//!
//! Each test drives real worker threads through the public `WorkerManager`
//! API and polls with a bounded deadline instead of fixed sleeps.

use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use any_worker::config::load_settings;
use any_worker::{WorkerError, WorkerManager, WorkerOptions, WorkerState};

/// Maximum time any wait is allowed before we consider the test hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Options whose callback counts invocations and tracks live threads.
fn tracked(
    name: &str,
    timestep: Duration,
    live: &Arc<AtomicUsize>,
) -> (WorkerOptions, Arc<AtomicU64>) {
    let count = Arc::new(AtomicU64::new(0));
    let c = Arc::clone(&count);
    let live = Arc::clone(live);
    let opts = WorkerOptions::new(name, timestep, move |event| {
        if event.iteration == 0 {
            live.fetch_add(1, Ordering::SeqCst);
        }
        c.fetch_add(1, Ordering::SeqCst);
        true
    });
    (opts, count)
}

#[test]
fn registration_scenario() {
    let manager = WorkerManager::new();
    let live = Arc::new(AtomicUsize::new(0));

    let (opts, count) = tracked("A", Duration::from_millis(100), &live);
    manager.add_worker(opts.with_autostart(true)).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) >= 1));
    assert_eq!(manager.worker_state("A"), Some(WorkerState::Running));

    let (dup, dup_count) = tracked("A", Duration::from_millis(5), &live);
    let err = manager.add_worker(dup.with_autostart(true)).unwrap_err();
    assert!(matches!(err, WorkerError::DuplicateName { .. }));
    assert_eq!(manager.worker_timestep("A"), Some(Duration::from_millis(100)));
    assert_eq!(dup_count.load(Ordering::SeqCst), 0);

    manager.stop_worker("A", true).unwrap();
    assert_eq!(manager.worker_state("A"), Some(WorkerState::Terminated));

    assert_eq!(manager.clean_destructible_workers(), 1);
    assert!(!manager.has_worker("A"));

    let err = manager.start_worker("A", 0).unwrap_err();
    assert!(matches!(err, WorkerError::NotFound { ref name } if name == "A"));
}

#[test]
fn clear_workers_joins_every_thread() {
    let manager = WorkerManager::new();
    let live = Arc::new(AtomicUsize::new(0));
    let mut counters = Vec::new();

    for i in 0..4 {
        let (opts, count) = tracked(&format!("w{i}"), Duration::from_millis(5), &live);
        manager.add_worker(opts.with_autostart(true)).unwrap();
        counters.push(count);
    }
    assert!(wait_until(|| live.load(Ordering::SeqCst) == 4));

    manager.clear_workers();
    assert!(manager.is_empty());

    let snapshot: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    thread::sleep(Duration::from_millis(50));
    let later: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(snapshot, later, "no worker may run after clear_workers returns");
}

#[test]
fn dropping_manager_stops_workers() {
    let live = Arc::new(AtomicUsize::new(0));
    let (opts, count) = tracked("owned", Duration::from_millis(5), &live);
    {
        let manager = WorkerManager::new();
        manager.add_worker(opts.with_autostart(true)).unwrap();
        assert!(wait_until(|| count.load(Ordering::SeqCst) >= 1));
    }
    let after = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), after);
}

#[test]
fn concurrent_adds_are_all_visible() {
    let manager = Arc::new(WorkerManager::new());
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.add_worker(WorkerOptions::new(
                    format!("worker-{i}"),
                    Duration::from_millis(10),
                    |_| true,
                ))
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(manager.len(), threads);
    for i in 0..threads {
        assert!(manager.has_worker(&format!("worker-{i}")));
    }
}

#[test]
fn concurrent_duplicate_adds_admit_exactly_one() {
    let manager = Arc::new(WorkerManager::new());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager
                    .add_worker(WorkerOptions::new(
                        "shared",
                        Duration::from_millis(i as u64 + 1),
                        |_| true,
                    ))
                    .is_ok()
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(manager.len(), 1);
}

#[test]
fn clean_never_removes_running_workers() {
    let manager = Arc::new(WorkerManager::new());
    let live = Arc::new(AtomicUsize::new(0));

    for i in 0..6 {
        let (opts, _) = tracked(&format!("keep-{i}"), Duration::from_millis(5), &live);
        manager.add_worker(opts.with_autostart(true)).unwrap();
        let (opts, _) = tracked(&format!("drop-{i}"), Duration::from_millis(5), &live);
        manager.add_worker(opts.with_autostart(true)).unwrap();
    }

    let stopper = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            for i in 0..6 {
                manager.stop_worker(&format!("drop-{i}"), false).unwrap();
            }
        })
    };

    // Sweep while stops are in flight.
    let mut removed = 0;
    let deadline = Instant::now() + TEST_TIMEOUT;
    while removed < 6 && Instant::now() < deadline {
        removed += manager.clean_destructible_workers();
        for i in 0..6 {
            assert_eq!(
                manager.worker_state(&format!("keep-{i}")),
                Some(WorkerState::Running)
            );
        }
        thread::sleep(Duration::from_millis(1));
    }
    stopper.join().unwrap();

    assert_eq!(removed, 6);
    let names = manager.worker_names();
    assert_eq!(names.len(), 6);
    assert!(names.iter().all(|n| n.starts_with("keep-")));
}

#[test]
fn timestep_change_applies_without_restart() {
    let manager = WorkerManager::new();
    let seen: Arc<Mutex<Vec<(thread::ThreadId, u64, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);

    let opts = WorkerOptions::new("retime", Duration::from_millis(5), move |event| {
        s.lock()
            .unwrap()
            .push((thread::current().id(), event.iteration, event.timestep));
        true
    });
    manager.add_worker(opts.with_autostart(true)).unwrap();
    assert!(wait_until(|| seen.lock().unwrap().len() >= 2));

    manager
        .set_worker_timestep("retime", Duration::from_millis(20))
        .unwrap();
    assert!(wait_until(|| {
        seen.lock()
            .unwrap()
            .iter()
            .any(|(_, _, step)| *step == Duration::from_millis(20))
    }));
    manager.stop_worker("retime", true).unwrap();

    let seen = seen.lock().unwrap();
    let first_thread = seen[0].0;
    assert!(seen.iter().all(|(id, _, _)| *id == first_thread));
    for (expected, (_, iteration, _)) in seen.iter().enumerate() {
        assert_eq!(*iteration, expected as u64);
    }
    assert_eq!(manager.worker_timestep("retime"), Some(Duration::from_millis(20)));
}

#[test]
fn one_shot_workers_are_reclaimed() {
    let manager = WorkerManager::new();
    let live = Arc::new(AtomicUsize::new(0));
    let (opts, count) = tracked("once", Duration::ZERO, &live);
    manager.add_worker(opts.with_autostart(true)).unwrap();

    assert!(wait_until(|| manager.worker_state("once") == Some(WorkerState::Terminated)));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(manager.clean_destructible_workers(), 1);
    assert!(manager.is_empty());
}

#[test]
fn stats_reflect_iterations() {
    let manager = WorkerManager::new();
    manager
        .add_worker(
            WorkerOptions::new("stats", Duration::from_millis(2), |_| true).with_autostart(true),
        )
        .unwrap();
    assert!(wait_until(|| {
        manager
            .worker_stats("stats")
            .is_some_and(|s| s.iterations >= 5)
    }));
    let stats = manager.worker_stats("stats").unwrap();
    assert!(stats.last_run_at.is_some());
    assert!(manager.worker_stats("missing").is_none());
}

#[test]
fn settings_file_registers_workers() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"name": "fast", "timestep_secs": 0.01, "autostart": true}},
            {{"name": "slow", "timestep_secs": 2.5}}
        ]"#
    )
    .unwrap();

    let settings = load_settings(file.path()).unwrap();
    assert_eq!(settings.len(), 2);

    let manager = WorkerManager::new();
    for s in settings {
        manager.add_worker(s.into_options(|_| true).unwrap()).unwrap();
    }
    assert_eq!(manager.worker_state("fast"), Some(WorkerState::Running));
    assert_eq!(manager.worker_state("slow"), Some(WorkerState::Idle));
    assert_eq!(manager.worker_timestep("slow"), Some(Duration::from_millis(2500)));
}

#[test]
fn settings_file_with_bad_timestep_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"[{{"name": "neg", "timestep_secs": -0.5}}]"#).unwrap();
    assert!(load_settings(file.path()).is_err());
}

#[test]
fn callback_can_stop_its_own_worker() {
    let manager = Arc::new(WorkerManager::new());
    let result = Arc::new(Mutex::new(None));

    let (m, r) = (Arc::clone(&manager), Arc::clone(&result));
    let opts = WorkerOptions::new("self-stop", Duration::from_millis(5), move |event| {
        if event.iteration == 0 {
            *r.lock().unwrap() = Some(m.stop_worker("self-stop", true));
        }
        true
    });
    manager.add_worker(opts.with_autostart(true)).unwrap();

    assert!(wait_until(|| result.lock().unwrap().is_some()));
    assert!(matches!(*result.lock().unwrap(), Some(Ok(()))));
    assert!(wait_until(|| {
        manager.worker_state("self-stop") == Some(WorkerState::Terminated)
    }));
    assert_eq!(manager.worker_stats("self-stop").unwrap().iterations, 1);

    manager.clear_workers();
}

#[test]
fn callback_cannot_restart_its_own_worker() {
    let manager = Arc::new(WorkerManager::new());
    let restart = Arc::new(Mutex::new(None));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let (m, r) = (Arc::clone(&manager), Arc::clone(&restart));
    let (active, peak) = (Arc::clone(&in_flight), Arc::clone(&max_in_flight));
    let opts = WorkerOptions::new("phoenix", Duration::from_millis(5), move |event| {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        if event.iteration == 0 {
            m.stop_worker("phoenix", false).unwrap();
            *r.lock().unwrap() = Some(m.start_worker("phoenix", 0));
        }
        thread::sleep(Duration::from_millis(2));
        active.fetch_sub(1, Ordering::SeqCst);
        true
    });
    manager.add_worker(opts.with_autostart(true)).unwrap();

    assert!(wait_until(|| restart.lock().unwrap().is_some()));
    assert!(matches!(
        *restart.lock().unwrap(),
        Some(Err(WorkerError::RestartFromOwnThread { ref name })) if name == "phoenix"
    ));
    assert!(wait_until(|| {
        manager.worker_state("phoenix") == Some(WorkerState::Terminated)
    }));

    thread::sleep(Duration::from_millis(30));
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(manager.worker_state("phoenix"), Some(WorkerState::Terminated));

    manager.clear_workers();
}
