//! The task scheduler: startup and shutdown, the dispatcher loop that every
//! pool fiber runs, work stealing, and the wait-on-counter protocol.
//!
//! Each worker's OS thread runs a trampoline loop that resumes pool fibers
//! and follows their switch directives (see [`crate::fiber`]). Fibers never
//! migrate between workers except while suspended in
//! [`TaskScheduler::wait_for_counter`]; between switches, execution on a
//! worker is strictly sequential.

use std::any::Any;
use std::cell::Cell;
use std::hint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::deque::Steal;
use tracing::{debug, error};

use crate::config::{EmptyQueueBehavior, SchedulerConfig};
use crate::counter::AtomicCounter;
use crate::error::SchedulerError;
use crate::fiber::{FiberContext, SchedulerRef, SwitchResult};
use crate::fiber_pool::{FiberPool, INVALID_FIBER_INDEX};
use crate::task::{Task, TaskBundle};
use crate::worker::{FiberHandOff, PinnedWaitingFiber, ReadyFiber, ThreadLocalState, WakeSignal};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

const INVALID_WORKER_INDEX: usize = usize::MAX;

thread_local! {
    /// Index of the worker owning this OS thread, or
    /// `INVALID_WORKER_INDEX` off the pool.
    static WORKER_INDEX: Cell<usize> = const { Cell::new(INVALID_WORKER_INDEX) };
}

/// A fiber-based work-stealing task scheduler.
///
/// Built and consumed by [`run`](TaskScheduler::run); user code only ever
/// sees it by reference, as the argument passed to tasks.
pub struct TaskScheduler {
    // Dropped first: unwinding abandoned fiber stacks may still touch the
    // fields below.
    fibers: FiberPool,
    tls: Box<[ThreadLocalState]>,
    num_threads: usize,
    quit: AtomicBool,
    empty_queue_behavior: EmptyQueueBehavior,
    wake_signal: WakeSignal,
    main_panic: Mutex<Option<Box<dyn Any + Send>>>,
    #[cfg(feature = "metrics")]
    metrics: Metrics,
}

impl TaskScheduler {
    /// Runs `main_task` on a pool fiber and blocks until it returns and all
    /// workers have shut down.
    ///
    /// The calling thread becomes worker 0; `thread_pool_size - 1` further
    /// workers are spawned. When `main_task` returns, the quit flag is
    /// raised, every worker finishes its current dispatch turn and exits,
    /// and the pool is torn down. Tasks still queued at that point are
    /// dropped unexecuted, and fibers still parked on counters are unwound;
    /// a main task that wants its spawned work to finish must wait on the
    /// counters tracking it.
    ///
    /// Must not be called from inside a task of a running scheduler.
    pub fn run<F>(config: SchedulerConfig, main_task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&TaskScheduler) + Send + 'static,
    {
        config.validate()?;
        let num_threads = config.resolve_thread_count()?;

        // Every pool fiber starts life in the dispatcher.
        let mut contexts = Vec::with_capacity(config.fiber_pool_size);
        for index in 0..config.fiber_pool_size {
            contexts.push(dispatcher_context(index, config.fiber_stack_size)?);
        }

        let scheduler = TaskScheduler {
            fibers: FiberPool::new(contexts),
            tls: (0..num_threads).map(|_| ThreadLocalState::new()).collect(),
            num_threads,
            quit: AtomicBool::new(false),
            empty_queue_behavior: config.empty_queue_behavior,
            wake_signal: WakeSignal::new(num_threads),
            main_panic: Mutex::new(None),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        };

        debug!(
            num_threads,
            fiber_pool_size = scheduler.fibers.len(),
            "starting task scheduler"
        );

        let core_ids = if config.pin_worker_threads {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        // The calling thread is worker 0.
        WORKER_INDEX.set(0);
        if let Some(&core) = core_ids.first() {
            core_affinity::set_for_current(core);
        }

        let result = thread::scope(|scope| {
            for index in 1..num_threads {
                let scheduler = &scheduler;
                let core = core_ids.get(index % core_ids.len().max(1)).copied();
                let spawned = thread::Builder::new()
                    .name(format!("weft-worker-{index}"))
                    .stack_size(config.worker_stack_size)
                    .spawn_scoped(scope, move || scheduler.worker_thread(index, core));
                if let Err(source) = spawned {
                    error!(index, error = %source, "failed to spawn worker thread");
                    scheduler.quit.store(true, Ordering::Release);
                    scheduler.wake_signal.notify_all(num_threads);
                    return Err(SchedulerError::ThreadSpawn { index, source });
                }
            }

            // Claim a pool fiber and repurpose it for the main task.
            let main_fiber_index = scheduler.fibers.claim();
            let main_context =
                match main_fiber_context(main_fiber_index, config.fiber_stack_size, main_task) {
                    Ok(context) => context,
                    Err(err) => {
                        scheduler.quit.store(true, Ordering::Release);
                        scheduler.wake_signal.notify_all(num_threads);
                        return Err(err);
                    }
                };
            // SAFETY: the slot was just claimed; nothing else touches it.
            unsafe {
                *scheduler.fibers.slot(main_fiber_index).get() = main_context;
            }
            scheduler.tls[0].set_current_fiber_index(main_fiber_index);
            scheduler.trampoline(main_fiber_index);
            Ok(())
        });

        let main_panic = scheduler.main_panic.lock().unwrap().take();
        // Unwind any abandoned fibers while the worker context is intact.
        drop(scheduler);
        WORKER_INDEX.set(INVALID_WORKER_INDEX);
        debug!("task scheduler shut down");

        result?;
        if let Some(payload) = main_panic {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// Enqueues a task on the current worker's queue.
    ///
    /// If `counter` is given, its value is overwritten with 1 and
    /// decremented when the task completes.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread outside the scheduler's worker pool
    /// (tasks and the main task are the only valid callers).
    pub fn add_task(&self, task: Task, counter: Option<&AtomicCounter>) {
        if let Some(counter) = counter {
            counter.store(1);
        }
        let worker_index = self.worker_index_or_panic("add_task");
        let bundle = TaskBundle {
            task,
            counter: counter.cloned(),
        };
        // SAFETY: we are the owner thread of this queue.
        unsafe { self.tls[worker_index].push_task(bundle) };
        self.publish_new_tasks(1);
    }

    /// Enqueues a batch of tasks sharing one counter.
    ///
    /// If `counter` is given, its value is overwritten with the batch size.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread outside the scheduler's worker pool.
    pub fn add_tasks(&self, tasks: Vec<Task>, counter: Option<&AtomicCounter>) {
        if let Some(counter) = counter {
            counter.store(tasks.len());
        }
        let worker_index = self.worker_index_or_panic("add_tasks");
        let count = tasks.len();
        for task in tasks {
            let bundle = TaskBundle {
                task,
                counter: counter.cloned(),
            };
            // SAFETY: we are the owner thread of this queue.
            unsafe { self.tls[worker_index].push_task(bundle) };
        }
        self.publish_new_tasks(count);
    }

    /// Suspends the current fiber until `counter` equals `target_value`,
    /// keeping the worker busy with other tasks in the meantime.
    ///
    /// If the counter is already at the target, returns without switching
    /// fibers. With `pin_to_current_thread` the fiber resumes on the worker
    /// that parked it; otherwise it resumes on whichever worker performs
    /// the completing decrement.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread outside the scheduler's worker pool.
    pub fn wait_for_counter(
        &self,
        counter: &AtomicCounter,
        target_value: usize,
        pin_to_current_thread: bool,
    ) {
        // Fast path: nothing to wait for.
        if counter.load() == target_value {
            return;
        }

        let worker_index = self.worker_index_or_panic("wait_for_counter");
        let tls = &self.tls[worker_index];
        let current_fiber_index = tls.current_fiber_index();

        // Claim the fiber that takes over this worker while we wait.
        let free_fiber_index = self.fibers.claim();

        if pin_to_current_thread {
            // The parked fiber stays reachable only through the pinned
            // list, so no hand-off fires for it.
            // SAFETY: the pinned list is owner-only and we are the owner.
            unsafe { tls.pinned_waiters() }.push(PinnedWaitingFiber {
                fiber_index: current_fiber_index,
                counter: counter.clone(),
                target_value,
            });
        } else {
            let stored_flag = Arc::new(AtomicBool::new(false));
            if counter.add_fiber_to_waiting_list(
                current_fiber_index,
                target_value,
                Arc::clone(&stored_flag),
            ) {
                // The counter finished while we were registering; hand the
                // claimed fiber straight back and carry on.
                self.fibers.release(free_fiber_index);
                return;
            }
            // SAFETY: the hand-off slot is owner-only.
            unsafe { tls.set_hand_off(FiberHandOff::ToWaiting(stored_flag)) };
        }

        tls.set_current_fiber_index(free_fiber_index);
        #[cfg(feature = "metrics")]
        {
            self.metrics.waits_parked.fetch_add(1, Ordering::Relaxed);
            self.metrics.fiber_switches.fetch_add(1, Ordering::Relaxed);
        }
        self.fibers.slot(current_fiber_index).switch_to(free_fiber_index);

        // Resumed, possibly on a different worker.
        self.cleanup_old_fiber();
    }

    /// Index of the worker executing the caller, or `None` on a thread
    /// outside the pool.
    ///
    /// Kept out of line so a fiber that migrated workers across a
    /// suspension point re-resolves the thread-local instead of reusing a
    /// value cached before the switch.
    #[inline(never)]
    pub fn current_worker_index(&self) -> Option<usize> {
        let index = WORKER_INDEX.get();
        (index < self.num_threads).then_some(index)
    }

    /// Number of worker threads, including the thread that called `run`.
    pub fn num_worker_threads(&self) -> usize {
        self.num_threads
    }

    /// Snapshot of the scheduler's performance counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Entry of every worker thread except worker 0.
    fn worker_thread(&self, index: usize, core: Option<core_affinity::CoreId>) {
        WORKER_INDEX.set(index);
        if let Some(core) = core {
            core_affinity::set_for_current(core);
        }
        let fiber_index = self.fibers.claim();
        self.tls[index].set_current_fiber_index(fiber_index);
        self.trampoline(fiber_index);
    }

    /// The worker's thread-fiber loop: resumes pool fibers and follows
    /// their switch directives until the fiber running here returns, which
    /// only happens once the quit flag is up.
    fn trampoline(&self, first_fiber_index: usize) {
        let scheduler_ref = SchedulerRef(self as *const TaskScheduler);
        let mut fiber_index = first_fiber_index;
        loop {
            // SAFETY: `fiber_index` is this worker's current fiber, claimed
            // from the pool or handed over by a switch directive; no other
            // worker can resume it.
            let context = unsafe { &mut *self.fibers.slot(fiber_index).get() };
            match context.resume(scheduler_ref) {
                SwitchResult::Switch(next) => fiber_index = next,
                SwitchResult::Finished => break,
            }
        }
    }

    /// Main loop of every pool fiber.
    ///
    /// `self_index` is the fiber this loop runs on; it stays fixed for the
    /// life of the loop even as the fiber is recycled across workers.
    fn dispatcher(&self, self_index: usize) {
        self.cleanup_old_fiber();

        while !self.quit.load(Ordering::Acquire) {
            let worker_index = self.worker_index_or_panic("dispatcher");
            let tls = &self.tls[worker_index];

            let mut waiting_fiber_index = INVALID_FIBER_INDEX;

            // Pinned waiters first; they are visible only to this worker.
            // SAFETY: the pinned list is owner-only and we are the owner.
            let pinned = unsafe { tls.pinned_waiters() };
            if let Some(pos) = pinned
                .iter()
                .position(|waiter| waiter.counter.load() == waiter.target_value)
            {
                waiting_fiber_index = pinned.remove(pos).fiber_index;
            }

            if waiting_fiber_index == INVALID_FIBER_INDEX {
                let mut ready = tls.ready_fibers.lock().unwrap();
                // A false flag means the previous holder has not finished
                // switching away; resuming now would corrupt its stack.
                if let Some(pos) = ready
                    .iter()
                    .position(|entry| entry.stored_flag.load(Ordering::Acquire))
                {
                    waiting_fiber_index = ready.swap_remove(pos).fiber_index;
                }
            }

            if waiting_fiber_index != INVALID_FIBER_INDEX {
                // Hand ourselves back to the pool once the waiter runs.
                // SAFETY: the hand-off slot is owner-only.
                unsafe { tls.set_hand_off(FiberHandOff::ToPool(self_index)) };
                tls.set_current_fiber_index(waiting_fiber_index);
                #[cfg(feature = "metrics")]
                self.metrics.fiber_switches.fetch_add(1, Ordering::Relaxed);
                self.fibers.slot(self_index).switch_to(waiting_fiber_index);

                // Back from the pool, possibly on another worker.
                self.cleanup_old_fiber();
                continue;
            }

            match self.get_next_task(worker_index) {
                Some(bundle) => self.execute_task(bundle),
                None => match self.empty_queue_behavior {
                    EmptyQueueBehavior::Spin => hint::spin_loop(),
                    EmptyQueueBehavior::Yield => thread::yield_now(),
                    EmptyQueueBehavior::Sleep => self.wake_signal.wait(),
                },
            }
        }
        // Quit: returning ends this worker's trampoline.
    }

    fn execute_task(&self, bundle: TaskBundle) {
        let TaskBundle { task, counter } = bundle;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.execute(self))) {
            error!(panic = panic_message(payload.as_ref()), "task panicked");
        }
        // Decrement even after a panic so sibling waiters stay live.
        if let Some(counter) = counter {
            counter.fetch_sub(1, self);
        }
        #[cfg(feature = "metrics")]
        self.metrics.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Pops from the current worker's queue, then sweeps the other workers
    /// starting at the last successful steal victim.
    fn get_next_task(&self, worker_index: usize) -> Option<TaskBundle> {
        let tls = &self.tls[worker_index];
        // SAFETY: owner end of our own queue.
        if let Some(bundle) = unsafe { tls.pop_task() } {
            return Some(bundle);
        }

        let start = tls.last_successful_steal.load(Ordering::Relaxed);
        for offset in 0..self.num_threads {
            let victim = (start + offset) % self.num_threads;
            if victim == worker_index {
                continue;
            }
            #[cfg(feature = "metrics")]
            self.metrics.steal_attempts.fetch_add(1, Ordering::Relaxed);
            loop {
                match self.tls[victim].stealer.steal() {
                    Steal::Success(bundle) => {
                        tls.last_successful_steal.store(victim, Ordering::Relaxed);
                        #[cfg(feature = "metrics")]
                        self.metrics.steals_succeeded.fetch_add(1, Ordering::Relaxed);
                        return Some(bundle);
                    }
                    Steal::Empty => break,
                    // Lost a race against the owner or another thief.
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    /// Retires the hand-off left by the fiber this worker switched away
    /// from. Runs as the first action of the destination fiber, strictly
    /// after the source's suspension completed.
    fn cleanup_old_fiber(&self) {
        let worker_index = self.worker_index_or_panic("fiber hand-off");
        // SAFETY: the hand-off slot is owner-only.
        match unsafe { self.tls[worker_index].take_hand_off() } {
            FiberHandOff::None => {}
            FiberHandOff::ToPool(index) => self.fibers.release(index),
            FiberHandOff::ToWaiting(stored_flag) => {
                stored_flag.store(true, Ordering::Release);
                // The fiber may already sit in a ready list whose owner gave
                // up on the false flag and went to sleep.
                self.publish_wakeup_all();
            }
        }
    }

    /// Delivers a fiber whose counter completed to the calling worker's
    /// ready list.
    pub(crate) fn add_ready_fiber(&self, fiber_index: usize, stored_flag: Arc<AtomicBool>) {
        let worker_index = self.worker_index_or_panic("AtomicCounter::fetch_sub");
        let mut ready = self.tls[worker_index].ready_fibers.lock().unwrap();
        ready.push(ReadyFiber {
            fiber_index,
            stored_flag,
        });
        drop(ready);
        #[cfg(feature = "metrics")]
        self.metrics.ready_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Wakes every sleeping worker after waiter-related progress: a counter
    /// decrement (pinned waiters are polled by their owning worker) or a
    /// parked fiber becoming consumable. Only the right worker can act on
    /// either event, so all sleepers have to look.
    pub(crate) fn publish_wakeup_all(&self) {
        if self.empty_queue_behavior == EmptyQueueBehavior::Sleep {
            self.wake_signal.notify_all(self.num_threads);
        }
    }

    fn publish_new_tasks(&self, count: usize) {
        if self.empty_queue_behavior == EmptyQueueBehavior::Sleep {
            if count == 1 {
                self.wake_signal.notify_one();
            } else {
                self.wake_signal.notify_all(count);
            }
        }
    }

    fn worker_index_or_panic(&self, operation: &str) -> usize {
        match self.current_worker_index() {
            Some(index) => index,
            None => panic!("{operation} called from a thread outside the scheduler's worker pool"),
        }
    }
}

/// Builds the coroutine for pool fiber `index`, parked at its entry.
fn dispatcher_context(index: usize, stack_size: usize) -> Result<FiberContext, SchedulerError> {
    FiberContext::new(stack_size, move |yielder, scheduler_ref: SchedulerRef| {
        // SAFETY: the scheduler outlives every resume; see `run`.
        let scheduler = unsafe { &*scheduler_ref.0 };
        scheduler.fibers.slot(index).set_active_yielder(yielder);
        scheduler.dispatcher(index);
    })
}

/// Builds the coroutine that runs the main task on pool fiber `index`.
fn main_fiber_context<F>(
    index: usize,
    stack_size: usize,
    main_task: F,
) -> Result<FiberContext, SchedulerError>
where
    F: FnOnce(&TaskScheduler) + Send + 'static,
{
    FiberContext::new(stack_size, move |yielder, scheduler_ref: SchedulerRef| {
        // SAFETY: the scheduler outlives every resume; see `run`.
        let scheduler = unsafe { &*scheduler_ref.0 };
        scheduler.fibers.slot(index).set_active_yielder(yielder);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| main_task(scheduler))) {
            error!("main task panicked; shutting down");
            *scheduler.main_panic.lock().unwrap() = Some(payload);
        }

        // Request that all workers quit. Returning from here ends the
        // trampoline of whichever worker the main fiber finished on; the
        // others observe the flag at the top of their dispatch loop.
        scheduler.quit.store(true, Ordering::Release);
        scheduler.wake_signal.notify_all(scheduler.num_threads);
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
