//! Per-worker state.
//!
//! Each worker thread owns one [`ThreadLocalState`] slot. Most fields are
//! touched only by code running on the owning OS thread; the exceptions are
//! the stealer end of the task queue and the ready-fiber list, which foreign
//! workers append to when a counter decrement wakes a waiter.

use std::cell::UnsafeCell;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam::deque::{Stealer, Worker as TaskDeque};

use crate::counter::AtomicCounter;
use crate::fiber_pool::INVALID_FIBER_INDEX;
use crate::task::TaskBundle;

/// Deferred action on the fiber a worker just switched away from.
///
/// A fiber cannot return itself to the pool (or publish itself resumable)
/// before switching: another worker could start running it while its
/// registers are still live here. The action is recorded in the worker's
/// hand-off slot and retired by the next fiber, which runs only after the
/// source has fully suspended.
pub(crate) enum FiberHandOff {
    None,
    /// Return the slot to the pool.
    ToPool(usize),
    /// Mark the parked fiber consumable by whoever holds its ready entry.
    ToWaiting(Arc<AtomicBool>),
}

/// A fiber delivered by a counter. Resumable once `stored_flag` is true.
pub(crate) struct ReadyFiber {
    pub(crate) fiber_index: usize,
    pub(crate) stored_flag: Arc<AtomicBool>,
}

/// A waiter that must resume on the worker holding it.
pub(crate) struct PinnedWaitingFiber {
    pub(crate) fiber_index: usize,
    pub(crate) counter: AtomicCounter,
    pub(crate) target_value: usize,
}

pub(crate) struct ThreadLocalState {
    /// Index of the pool fiber currently running on this worker.
    current_fiber_index: AtomicUsize,
    /// Pending hand-off. Written and consumed only by fibers running on
    /// this worker's OS thread.
    hand_off: UnsafeCell<FiberHandOff>,
    /// Owner end of the task deque. Only the owning thread pushes and pops;
    /// foreign workers go through `stealer`.
    task_queue: UnsafeCell<TaskDeque<TaskBundle>>,
    /// Thief end of the task deque, shared with every other worker.
    pub(crate) stealer: Stealer<TaskBundle>,
    /// Fibers whose counters completed. Appended by whichever worker
    /// performed the waking decrement, scanned by the owner, so access is
    /// serialized by the mutex.
    pub(crate) ready_fibers: Mutex<Vec<ReadyFiber>>,
    /// Waiters pinned to this worker. Owner-only.
    pinned_waiters: UnsafeCell<Vec<PinnedWaitingFiber>>,
    /// Victim index where the last successful steal landed; the next sweep
    /// starts there.
    pub(crate) last_successful_steal: AtomicUsize,
}

// SAFETY: the UnsafeCell fields are accessed only from the OS thread that
// owns this worker slot — the hand-off and pinned list by the fiber
// currently running on it, the deque owner end by enqueue/dispatch on the
// same thread. Cross-thread traffic is confined to `stealer`,
// `ready_fibers`, and the atomics.
unsafe impl Sync for ThreadLocalState {}

impl ThreadLocalState {
    pub(crate) fn new() -> Self {
        let task_queue = TaskDeque::new_fifo();
        let stealer = task_queue.stealer();
        ThreadLocalState {
            current_fiber_index: AtomicUsize::new(INVALID_FIBER_INDEX),
            hand_off: UnsafeCell::new(FiberHandOff::None),
            task_queue: UnsafeCell::new(task_queue),
            stealer,
            ready_fibers: Mutex::new(Vec::new()),
            pinned_waiters: UnsafeCell::new(Vec::new()),
            last_successful_steal: AtomicUsize::new(1),
        }
    }

    pub(crate) fn current_fiber_index(&self) -> usize {
        self.current_fiber_index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_fiber_index(&self, index: usize) {
        self.current_fiber_index.store(index, Ordering::Relaxed);
    }

    /// Swaps the pending hand-off out, leaving `None`.
    ///
    /// # Safety
    ///
    /// Must be called from the OS thread owning this worker slot.
    pub(crate) unsafe fn take_hand_off(&self) -> FiberHandOff {
        mem::replace(&mut *self.hand_off.get(), FiberHandOff::None)
    }

    /// # Safety
    ///
    /// Must be called from the OS thread owning this worker slot.
    pub(crate) unsafe fn set_hand_off(&self, hand_off: FiberHandOff) {
        *self.hand_off.get() = hand_off;
    }

    /// # Safety
    ///
    /// Must be called from the OS thread owning this worker slot.
    pub(crate) unsafe fn push_task(&self, bundle: TaskBundle) {
        (*self.task_queue.get()).push(bundle);
    }

    /// # Safety
    ///
    /// Must be called from the OS thread owning this worker slot.
    pub(crate) unsafe fn pop_task(&self) -> Option<TaskBundle> {
        (*self.task_queue.get()).pop()
    }

    /// # Safety
    ///
    /// Must be called from the OS thread owning this worker slot.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn pinned_waiters(&self) -> &mut Vec<PinnedWaitingFiber> {
        &mut *self.pinned_waiters.get()
    }
}

/// Counting wake-up signal backing [`EmptyQueueBehavior::Sleep`].
///
/// Publications are counted under the lock, so one can never land between a
/// worker's empty check and its park. The count is capped at the worker
/// count; tokens beyond that could only produce redundant rescans.
///
/// [`EmptyQueueBehavior::Sleep`]: crate::EmptyQueueBehavior::Sleep
pub(crate) struct WakeSignal {
    pending: Mutex<usize>,
    condvar: Condvar,
    cap: usize,
}

impl WakeSignal {
    pub(crate) fn new(cap: usize) -> Self {
        WakeSignal {
            pending: Mutex::new(0),
            condvar: Condvar::new(),
            cap,
        }
    }

    /// Parks until a publication is available, then consumes it.
    pub(crate) fn wait(&self) {
        let mut pending = self.pending.lock().unwrap();
        while *pending == 0 {
            pending = self.condvar.wait(pending).unwrap();
        }
        *pending -= 1;
    }

    /// Publishes one wake-up.
    pub(crate) fn notify_one(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = (*pending + 1).min(self.cap);
        drop(pending);
        self.condvar.notify_one();
    }

    /// Publishes `count` wake-ups and wakes every parked worker.
    pub(crate) fn notify_all(&self, count: usize) {
        let mut pending = self.pending.lock().unwrap();
        *pending = (*pending + count).min(self.cap);
        drop(pending);
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wake_signal_consumes_published_tokens() {
        let signal = WakeSignal::new(4);
        signal.notify_one();
        signal.wait();
    }

    #[test]
    fn wake_signal_caps_pending_tokens() {
        let signal = WakeSignal::new(2);
        signal.notify_all(10);
        assert_eq!(*signal.pending.lock().unwrap(), 2);
    }

    #[test]
    fn wake_signal_wakes_a_parked_thread() {
        let signal = Arc::new(WakeSignal::new(1));
        let parked = Arc::clone(&signal);
        let handle = thread::spawn(move || parked.wait());
        thread::sleep(Duration::from_millis(10));
        signal.notify_one();
        handle.join().unwrap();
    }
}
