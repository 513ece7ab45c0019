//! Task definitions.
//!
//! A task is a unit of work executed to completion on some pool fiber. Tasks
//! receive the scheduler as their argument so they can spawn further tasks
//! and wait on counters.

use crate::counter::AtomicCounter;
use crate::scheduler::TaskScheduler;

/// A unit of work for the scheduler.
///
/// The closure runs exactly once, on whichever worker pulls it from a queue.
/// It may call back into the scheduler it receives: enqueue more tasks,
/// decrement counters, or suspend in
/// [`wait_for_counter`](TaskScheduler::wait_for_counter).
pub struct Task {
    func: Box<dyn FnOnce(&TaskScheduler) + Send + 'static>,
}

impl Task {
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce(&TaskScheduler) + Send + 'static,
    {
        Task {
            func: Box::new(func),
        }
    }

    pub(crate) fn execute(self, scheduler: &TaskScheduler) {
        (self.func)(scheduler)
    }
}

/// A task paired with the counter to decrement when it completes.
pub(crate) struct TaskBundle {
    pub(crate) task: Task,
    pub(crate) counter: Option<AtomicCounter>,
}
