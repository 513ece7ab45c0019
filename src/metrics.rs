#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional performance counters for the scheduler.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Tasks pulled from a queue and executed.
    pub tasks_executed: AtomicU64,
    /// Steal attempts against other workers' queues.
    pub steal_attempts: AtomicU64,
    /// Steal attempts that yielded a task.
    pub steals_succeeded: AtomicU64,
    /// Fiber-to-fiber switches (waits parked plus waiters resumed).
    pub fiber_switches: AtomicU64,
    /// Fibers parked on a counter (non-pinned and pinned).
    pub waits_parked: AtomicU64,
    /// Waiters delivered to a ready list by a counter decrement.
    pub ready_wakeups: AtomicU64,
    /// When metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_executed: AtomicU64::new(0),
            steal_attempts: AtomicU64::new(0),
            steals_succeeded: AtomicU64::new(0),
            fiber_switches: AtomicU64::new(0),
            waits_parked: AtomicU64::new(0),
            ready_wakeups: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steals_succeeded: self.steals_succeeded.load(Ordering::Relaxed),
            fiber_switches: self.fiber_switches.load(Ordering::Relaxed),
            waits_parked: self.waits_parked.load(Ordering::Relaxed),
            ready_wakeups: self.ready_wakeups.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Snapshot of the metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tasks_executed: u64,
    pub steal_attempts: u64,
    pub steals_succeeded: u64,
    pub fiber_switches: u64,
    pub waits_parked: u64,
    pub ready_wakeups: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Tasks per second since startup.
    pub fn tasks_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.tasks_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fraction of steal attempts that found work.
    pub fn steal_success_rate(&self) -> f64 {
        if self.steal_attempts > 0 {
            self.steals_succeeded as f64 / self.steal_attempts as f64
        } else {
            0.0
        }
    }
}
