use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use weft::{AtomicCounter, SchedulerConfig, Task, TaskScheduler};

fn config() -> SchedulerConfig {
    SchedulerConfig {
        thread_pool_size: 2,
        pin_worker_threads: false,
        ..SchedulerConfig::new(32)
    }
}

#[test]
fn panicking_task_still_decrements_its_counter() {
    TaskScheduler::run(config(), |scheduler| {
        let counter = AtomicCounter::new(0);
        scheduler.add_task(Task::new(|_| panic!("task failure")), Some(&counter));
        // Reaching past this wait means the waiter was woken despite the
        // panic.
        scheduler.wait_for_counter(&counter, 0, false);
        assert_eq!(counter.load(), 0);
    })
    .unwrap();
}

#[test]
fn scheduler_keeps_working_after_a_task_panic() {
    let executed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&executed);

    TaskScheduler::run(config(), move |scheduler| {
        let counter = AtomicCounter::new(0);
        scheduler.add_task(Task::new(|_| panic!("boom")), Some(&counter));
        scheduler.wait_for_counter(&counter, 0, false);

        let follow_up = AtomicCounter::new(0);
        let tasks = (0..8)
            .map(|_| {
                let executed = Arc::clone(&seen);
                Task::new(move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        scheduler.add_tasks(tasks, Some(&follow_up));
        scheduler.wait_for_counter(&follow_up, 0, false);
    })
    .unwrap();

    assert_eq!(executed.load(Ordering::SeqCst), 8);
}

#[test]
fn main_task_panic_propagates_after_shutdown() {
    let result = panic::catch_unwind(|| {
        TaskScheduler::run(config(), |_| panic!("main failure")).unwrap();
    });
    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"main failure"));
}
