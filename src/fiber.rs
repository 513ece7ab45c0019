//! Fiber contexts.
//!
//! A [`FiberContext`] owns one user-space stack, built on a `corosensei`
//! coroutine. corosensei coroutines are asymmetric (they resume from and
//! suspend to a caller), so fiber-to-fiber switching goes through the
//! worker's trampoline loop: a fiber suspends with the index of the fiber
//! that should run next, and the trampoline resumes that fiber. By the time
//! the trampoline acts on a directive, the suspending fiber's `resume` call
//! has returned, so its registers and stack are fully retired.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::error::SchedulerError;
use crate::scheduler::TaskScheduler;

/// Raw scheduler pointer handed to a fiber on every resume.
#[derive(Clone, Copy)]
pub(crate) struct SchedulerRef(pub(crate) *const TaskScheduler);

// SAFETY: the scheduler outlives every fiber resume; `TaskScheduler::run`
// joins all workers and unwinds all fibers before the scheduler is dropped.
unsafe impl Send for SchedulerRef {}

pub(crate) type FiberYielder = Yielder<SchedulerRef, usize>;

/// What the worker trampoline should do after a resume returns.
pub(crate) enum SwitchResult {
    /// Resume the pool fiber with this index next.
    Switch(usize),
    /// The fiber ran to completion; the worker is done.
    Finished,
}

/// One user-space execution context.
pub(crate) struct FiberContext {
    coroutine: Coroutine<SchedulerRef, usize, ()>,
}

// SAFETY: a suspended fiber is plain data (stack memory plus saved
// registers) and may be resumed from any thread; the pool's exclusivity
// protocol guarantees a single resumer at a time.
unsafe impl Send for FiberContext {}

impl FiberContext {
    pub(crate) fn new<F>(stack_size: usize, entry: F) -> Result<Self, SchedulerError>
    where
        F: FnOnce(&FiberYielder, SchedulerRef) + Send + 'static,
    {
        let stack = DefaultStack::new(stack_size).map_err(SchedulerError::StackAllocation)?;
        Ok(FiberContext {
            coroutine: Coroutine::with_stack(stack, move |yielder, input| entry(yielder, input)),
        })
    }

    pub(crate) fn resume(&mut self, scheduler: SchedulerRef) -> SwitchResult {
        match self.coroutine.resume(scheduler) {
            CoroutineResult::Yield(next) => SwitchResult::Switch(next),
            CoroutineResult::Return(()) => SwitchResult::Finished,
        }
    }
}
