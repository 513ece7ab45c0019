//! Scheduler construction parameters.

use std::thread;

use crate::error::SchedulerError;

/// Default stack size for pool fibers and worker threads.
const DEFAULT_STACK_SIZE: usize = 512 * 1024;

/// What a worker does when its own queue is empty and nothing can be stolen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyQueueBehavior {
    /// Busy-poll the queues.
    #[default]
    Spin,
    /// Yield the OS thread between polls.
    Yield,
    /// Park the worker until new work or a counter decrement is published.
    Sleep,
}

/// Parameters for [`TaskScheduler::run`](crate::TaskScheduler::run).
///
/// ```
/// use weft::{EmptyQueueBehavior, SchedulerConfig};
///
/// let config = SchedulerConfig {
///     thread_pool_size: 4,
///     empty_queue_behavior: EmptyQueueBehavior::Yield,
///     ..SchedulerConfig::new(128)
/// };
/// assert_eq!(config.fiber_pool_size, 128);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of preallocated pool fibers. Must be at least 1; sizing it
    /// below the peak number of simultaneously waiting tasks will stall
    /// workers in the fiber-claim loop.
    pub fiber_pool_size: usize,
    /// Number of worker threads, including the calling thread. `0` means one
    /// per hardware thread.
    pub thread_pool_size: usize,
    /// Stack size of each pool fiber.
    pub fiber_stack_size: usize,
    /// Stack size of each spawned worker thread.
    pub worker_stack_size: usize,
    /// Idle-worker policy.
    pub empty_queue_behavior: EmptyQueueBehavior,
    /// Pin worker `i` to core `i` (mod core count). Skipped when core
    /// enumeration fails.
    pub pin_worker_threads: bool,
}

impl SchedulerConfig {
    pub fn new(fiber_pool_size: usize) -> Self {
        SchedulerConfig {
            fiber_pool_size,
            thread_pool_size: 0,
            fiber_stack_size: DEFAULT_STACK_SIZE,
            worker_stack_size: DEFAULT_STACK_SIZE,
            empty_queue_behavior: EmptyQueueBehavior::default(),
            pin_worker_threads: true,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        if self.fiber_pool_size == 0 {
            return Err(SchedulerError::ZeroFiberPoolSize);
        }
        Ok(())
    }

    pub(crate) fn resolve_thread_count(&self) -> Result<usize, SchedulerError> {
        if self.thread_pool_size != 0 {
            return Ok(self.thread_pool_size);
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .map_err(SchedulerError::NoAvailableWorkers)
    }
}
