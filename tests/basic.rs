use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use weft::{AtomicCounter, SchedulerConfig, Task, TaskScheduler};

fn config(fiber_pool_size: usize, threads: usize) -> SchedulerConfig {
    SchedulerConfig {
        thread_pool_size: threads,
        pin_worker_threads: false,
        ..SchedulerConfig::new(fiber_pool_size)
    }
}

#[test]
fn single_task_single_counter() {
    let executed = Arc::new(AtomicUsize::new(0));
    let executed_in_main = Arc::clone(&executed);

    TaskScheduler::run(config(25, 1), move |scheduler| {
        let counter = AtomicCounter::new(0);
        let executed = Arc::clone(&executed_in_main);
        scheduler.add_task(
            Task::new(move |_| {
                executed.fetch_add(1, Ordering::SeqCst);
            }),
            Some(&counter),
        );
        scheduler.wait_for_counter(&counter, 0, false);
        assert_eq!(counter.load(), 0);
    })
    .unwrap();

    assert_eq!(executed.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_on_completed_counter_returns_immediately() {
    let ran_after = Arc::new(AtomicUsize::new(0));
    let ran = Arc::clone(&ran_after);

    TaskScheduler::run(config(25, 2), move |scheduler| {
        let counter = AtomicCounter::new(0);
        // Already at the target: no fiber switch, no registration.
        scheduler.wait_for_counter(&counter, 0, false);

        // The scheduler must still be fully functional afterwards.
        let follow_up = AtomicCounter::new(0);
        let ran = Arc::clone(&ran);
        scheduler.add_task(
            Task::new(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            }),
            Some(&follow_up),
        );
        scheduler.wait_for_counter(&follow_up, 0, false);
    })
    .unwrap();

    assert_eq!(ran_after.load(Ordering::SeqCst), 1);
}

#[test]
fn add_tasks_overwrites_the_counter_with_the_batch_size() {
    TaskScheduler::run(config(32, 2), |scheduler| {
        // A stale value is clobbered by the enqueue.
        let counter = AtomicCounter::new(99);
        let tasks = (0..5).map(|_| Task::new(|_| {})).collect();
        scheduler.add_tasks(tasks, Some(&counter));
        scheduler.wait_for_counter(&counter, 0, false);
        assert_eq!(counter.load(), 0);
    })
    .unwrap();
}

#[test]
fn wait_for_nonzero_target() {
    TaskScheduler::run(config(32, 2), |scheduler| {
        let counter = AtomicCounter::new(2);
        let decrement = counter.clone();
        scheduler.add_task(
            Task::new(move |s| {
                decrement.fetch_sub(1, s);
            }),
            None,
        );
        scheduler.wait_for_counter(&counter, 1, false);
        assert_eq!(counter.load(), 1);
    })
    .unwrap();
}

#[test]
fn sequential_waits_recycle_the_pool() {
    let total = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&total);

    // Far more wait cycles than pool fibers.
    TaskScheduler::run(config(8, 2), move |scheduler| {
        for _ in 0..200 {
            let counter = AtomicCounter::new(0);
            let total = Arc::clone(&seen);
            scheduler.add_task(
                Task::new(move |_| {
                    total.fetch_add(1, Ordering::SeqCst);
                }),
                Some(&counter),
            );
            scheduler.wait_for_counter(&counter, 0, false);
        }
    })
    .unwrap();

    assert_eq!(total.load(Ordering::SeqCst), 200);
}
