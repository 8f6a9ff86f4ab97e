//! Iteration scheduling and timing statistics.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timing counters for one worker, reset on every start.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RateStats {
    /// Completed callback invocations.
    pub iterations: u64,
    /// Iterations that took longer than the timestep.
    pub overruns: u64,
    /// Processing time of the most recent iteration.
    pub last_processing: Duration,
    /// Mean processing time over all iterations.
    pub mean_processing: Duration,
    /// When the most recent iteration started.
    pub last_run_at: Option<DateTime<Utc>>,
}

impl RateStats {
    /// Record one iteration. Returns `true` if it overran the timestep.
    pub(crate) fn record(
        &mut self,
        started_at: DateTime<Utc>,
        processing: Duration,
        timestep: Duration,
    ) -> bool {
        self.iterations += 1;
        self.last_processing = processing;
        self.last_run_at = Some(started_at);

        // Running mean in nanoseconds; saturates rather than overflowing.
        let n = self.iterations as u128;
        let mean = self.mean_processing.as_nanos();
        let sample = processing.as_nanos();
        let updated = if sample >= mean {
            mean + (sample - mean) / n
        } else {
            mean - (mean - sample) / n
        };
        self.mean_processing = Duration::from_nanos(updated.min(u64::MAX as u128) as u64);

        let overrun = !timestep.is_zero() && processing > timestep;
        if overrun {
            self.overruns += 1;
        }
        overrun
    }
}

/// Deadline of the iteration after the one scheduled at `previous`.
///
/// With `enforce_rate` the schedule is fixed and missed periods are caught up
/// back to back. Without it, a late loop is rescheduled from `now`.
/// `None` when the deadline is beyond what `Instant` can represent.
pub(crate) fn next_deadline(
    previous: Instant,
    now: Instant,
    timestep: Duration,
    enforce_rate: bool,
) -> Option<Instant> {
    let next = previous.checked_add(timestep)?;
    if enforce_rate || next >= now {
        Some(next)
    } else {
        Some(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_mean_and_overruns() {
        let mut stats = RateStats::default();
        let step = Duration::from_millis(10);

        assert!(!stats.record(Utc::now(), Duration::from_millis(4), step));
        assert!(!stats.record(Utc::now(), Duration::from_millis(8), step));
        assert!(stats.record(Utc::now(), Duration::from_millis(12), step));

        assert_eq!(stats.iterations, 3);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.last_processing, Duration::from_millis(12));
        assert_eq!(stats.mean_processing, Duration::from_millis(8));
        assert!(stats.last_run_at.is_some());
    }

    #[test]
    fn zero_timestep_never_overruns() {
        let mut stats = RateStats::default();
        assert!(!stats.record(Utc::now(), Duration::from_secs(1), Duration::ZERO));
        assert_eq!(stats.overruns, 0);
    }

    #[test]
    fn on_time_deadline_keeps_schedule() {
        let start = Instant::now();
        let step = Duration::from_millis(100);
        let now = start + Duration::from_millis(30);
        assert_eq!(next_deadline(start, now, step, false), Some(start + step));
        assert_eq!(next_deadline(start, now, step, true), Some(start + step));
    }

    #[test]
    fn late_deadline_depends_on_enforcement() {
        let start = Instant::now();
        let step = Duration::from_millis(100);
        let now = start + Duration::from_millis(350);
        // Enforced: stays on the fixed grid even though it is in the past.
        assert_eq!(next_deadline(start, now, step, true), Some(start + step));
        // Relaxed: skips the missed periods.
        assert_eq!(next_deadline(start, now, step, false), Some(now));
    }

    #[test]
    fn unrepresentable_deadline_is_none() {
        let now = Instant::now();
        assert_eq!(next_deadline(now, now, Duration::MAX, false), None);
        assert_eq!(next_deadline(now, now, Duration::MAX, true), None);
    }
}
