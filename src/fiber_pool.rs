//! Fixed pool of preallocated fibers.
//!
//! Slots are claimed by CAS on a parallel array of free flags and returned
//! with a release store. Ownership of the fiber context itself follows the
//! flags: the claim CAS acquires everything the previous occupant wrote to
//! the stack before its slot was released.

use std::cell::{Cell, UnsafeCell};
use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::fiber::{FiberContext, FiberYielder};

pub(crate) const INVALID_FIBER_INDEX: usize = usize::MAX;

/// One pool slot.
///
/// The active yielder lives next to the context, not inside it, so that
/// code running *on* the fiber can suspend without touching the
/// `FiberContext` its trampoline holds exclusively during `resume`.
pub(crate) struct FiberSlot {
    context: UnsafeCell<FiberContext>,
    /// Set by the fiber's entry on first resume; valid until the coroutine
    /// completes. Read only by code executing on this fiber.
    yielder: Cell<*const FiberYielder>,
}

// SAFETY: slot exclusivity — at any instant a fiber is free (untouched),
// the current fiber of exactly one worker, or parked in exactly one
// waiting/ready/pinned list. The claim CAS and the ready-flag protocol in
// `scheduler` enforce single-threaded access to the context and yielder.
unsafe impl Sync for FiberSlot {}

impl FiberSlot {
    /// Pointer to the context. The caller must hold exclusive use of the
    /// slot under the exclusivity protocol before dereferencing.
    pub(crate) fn get(&self) -> *mut FiberContext {
        self.context.get()
    }

    /// Records the yielder of the running coroutine. Called once, by the
    /// fiber's own entry.
    pub(crate) fn set_active_yielder(&self, yielder: &FiberYielder) {
        self.yielder.set(yielder as *const FiberYielder);
    }

    /// Suspends the calling fiber, directing the trampoline to resume
    /// `next_fiber_index`. Returns when some worker resumes this fiber,
    /// possibly on a different thread.
    ///
    /// Must only be called by code currently executing on this fiber.
    pub(crate) fn switch_to(&self, next_fiber_index: usize) {
        let yielder = self.yielder.get();
        debug_assert!(!yielder.is_null(), "fiber suspended before its entry ran");
        // SAFETY: the yielder was stored by this fiber's entry and remains
        // valid while the coroutine is live; we are executing on the fiber,
        // so the coroutine cannot complete concurrently.
        let _ = unsafe { (*yielder).suspend(next_fiber_index) };
    }
}

pub(crate) struct FiberPool {
    slots: Box<[FiberSlot]>,
    free: Box<[AtomicBool]>,
}

impl FiberPool {
    pub(crate) fn new(contexts: Vec<FiberContext>) -> Self {
        let free = contexts.iter().map(|_| AtomicBool::new(true)).collect();
        let slots = contexts
            .into_iter()
            .map(|context| FiberSlot {
                context: UnsafeCell::new(context),
                yielder: Cell::new(ptr::null()),
            })
            .collect();
        FiberPool { slots, free }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> &FiberSlot {
        &self.slots[index]
    }

    /// Claims a free slot, spinning until one is available.
    ///
    /// Exhaustion means every fiber is running or parked on a counter; the
    /// only way forward is for some counter to make progress, so the scan
    /// retries indefinitely and reports a probable deadlock after a while.
    pub(crate) fn claim(&self) -> usize {
        let mut passes = 0u32;
        loop {
            for (index, flag) in self.free.iter().enumerate() {
                // Cheap pre-check before the synchronizing load.
                if !flag.load(Ordering::Relaxed) {
                    continue;
                }
                if !flag.load(Ordering::Acquire) {
                    continue;
                }
                if flag
                    .compare_exchange_weak(true, false, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return index;
                }
            }
            passes += 1;
            if passes == 10 {
                warn!(
                    pool_size = self.slots.len(),
                    "no free fibers after {passes} passes; probable deadlock"
                );
            }
            hint::spin_loop();
        }
    }

    /// Returns a slot to the pool, publishing all writes made on its stack.
    pub(crate) fn release(&self, index: usize) {
        debug_assert!(!self.free[index].load(Ordering::Relaxed));
        self.free[index].store(true, Ordering::Release);
    }
}
