//! Synchronization counters.
//!
//! An [`AtomicCounter`] is the only synchronization primitive tasks interact
//! with: the scheduler decrements it as tasks complete, and a task can park
//! its fiber until the counter reaches a target value. The counter tracks
//! its non-pinned waiters itself and hands them back to the scheduler when a
//! decrement lands on their target.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::scheduler::TaskScheduler;

/// A fiber parked on this counter, waiting for `target_value`.
struct WaitingFiberEntry {
    fiber_index: usize,
    target_value: usize,
    stored_flag: Arc<AtomicBool>,
}

struct CounterInner {
    value: AtomicUsize,
    waiting: Mutex<Vec<WaitingFiberEntry>>,
}

/// An atomic counter with a waiting list of fibers.
///
/// Clones share the same underlying value, so a counter can be captured by
/// task closures and waited on from the spawning fiber. A counter must not
/// be dropped while fibers wait on it; keeping a clone alive across the wait
/// (the natural usage) guarantees this.
#[derive(Clone)]
pub struct AtomicCounter {
    inner: Arc<CounterInner>,
}

impl AtomicCounter {
    pub fn new(initial: usize) -> Self {
        AtomicCounter {
            inner: Arc::new(CounterInner {
                value: AtomicUsize::new(initial),
                waiting: Mutex::new(Vec::with_capacity(4)),
            }),
        }
    }

    pub fn load(&self) -> usize {
        self.inner.value.load(Ordering::Relaxed)
    }

    pub fn store(&self, value: usize) {
        self.inner.value.store(value, Ordering::Release);
    }

    /// Adds `n`, returning the previous value. Does not wake waiters.
    pub fn fetch_add(&self, n: usize) -> usize {
        self.inner.value.fetch_add(n, Ordering::AcqRel)
    }

    pub fn compare_exchange(&self, current: usize, new: usize) -> Result<usize, usize> {
        self.inner
            .value
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Subtracts `n`, returning the previous value.
    ///
    /// If the new value matches the target of any waiting fiber, those
    /// fibers are handed to the calling worker's ready list. The scheduler
    /// is passed in because waking a waiter needs a worker context, and a
    /// counter does not hold one.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread outside the scheduler's worker pool.
    pub fn fetch_sub(&self, n: usize, scheduler: &TaskScheduler) -> usize {
        let previous = self.inner.value.fetch_sub(n, Ordering::Release);
        debug_assert!(previous >= n, "counter underflow");
        let value = previous - n;

        // Waiters registering concurrently load the value under this lock,
        // so each registration either lands before this scan (and is found)
        // or observes the decremented value (and reports already-done).
        let mut waiting = self.inner.waiting.lock().unwrap();
        let mut i = 0;
        while i < waiting.len() {
            if waiting[i].target_value == value {
                let entry = waiting.swap_remove(i);
                scheduler.add_ready_fiber(entry.fiber_index, entry.stored_flag);
            } else {
                i += 1;
            }
        }
        drop(waiting);

        scheduler.publish_wakeup_all();
        previous
    }

    /// Registers a fiber to be woken when the value reaches `target_value`.
    ///
    /// Returns `true` without registering if the value is already there:
    /// the caller must then resume immediately instead of switching away.
    pub(crate) fn add_fiber_to_waiting_list(
        &self,
        fiber_index: usize,
        target_value: usize,
        stored_flag: Arc<AtomicBool>,
    ) -> bool {
        let mut waiting = self.inner.waiting.lock().unwrap();
        if self.inner.value.load(Ordering::Acquire) == target_value {
            return true;
        }
        waiting.push(WaitingFiberEntry {
            fiber_index,
            target_value,
            stored_flag,
        });
        false
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        AtomicCounter::new(0)
    }
}
