//! Error types reported by the scheduler.

use std::io;

use thiserror::Error;

/// Errors that can abort [`TaskScheduler::run`](crate::TaskScheduler::run).
///
/// All of these are startup failures; once the main task is running the
/// scheduler has no fallible operations left.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The configured fiber pool holds no fibers.
    #[error("fiber pool size must be at least 1")]
    ZeroFiberPoolSize,

    /// The thread count was left at "one per hardware thread" but hardware
    /// concurrency could not be determined.
    #[error("worker thread count could not be determined")]
    NoAvailableWorkers(#[source] io::Error),

    /// Reserving a fiber stack failed.
    #[error("failed to reserve a fiber stack")]
    StackAllocation(#[source] io::Error),

    /// Spawning a worker thread failed. Already-spawned workers are shut
    /// down and joined before this is returned.
    #[error("failed to spawn worker thread {index}")]
    ThreadSpawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}
