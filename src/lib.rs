//! # Weft — fiber-based task scheduler
//!
//! A work-stealing runtime for CPU-parallel workloads in which tasks execute
//! on cooperatively scheduled user-space stacks (fibers). Any task can
//! suspend on a synchronization counter without blocking its worker thread:
//! the worker switches to a fresh pool fiber and keeps executing tasks, and
//! the parked fiber resumes — on the same or another worker — once the
//! counter reaches its target.
//!
//! ## Architecture
//!
//! - **Fiber pool**: a fixed array of preallocated execution contexts,
//!   claimed and released with atomic free flags.
//! - **Workers**: one OS thread per worker, each running exactly one fiber
//!   at a time; per-worker work-stealing deques hold pending tasks.
//! - **Counters**: atomic integers with waiting lists; tasks decrement them
//!   on completion and waiters resume when the value hits their target.
//!
//! ## Example
//!
//! ```no_run
//! use weft::{AtomicCounter, SchedulerConfig, Task, TaskScheduler};
//!
//! TaskScheduler::run(SchedulerConfig::new(64), |scheduler| {
//!     let counter = AtomicCounter::new(0);
//!     let tasks = (0..8)
//!         .map(|i| Task::new(move |_| println!("task {i}")))
//!         .collect();
//!     scheduler.add_tasks(tasks, Some(&counter));
//!     scheduler.wait_for_counter(&counter, 0, false);
//! })
//! .unwrap();
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod task;

mod fiber;
mod fiber_pool;
mod scheduler;
mod worker;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use config::{EmptyQueueBehavior, SchedulerConfig};
pub use counter::AtomicCounter;
pub use error::SchedulerError;
pub use scheduler::TaskScheduler;
pub use task::Task;
