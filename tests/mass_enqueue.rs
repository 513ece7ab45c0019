use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use weft::{AtomicCounter, SchedulerConfig, Task, TaskScheduler};

#[test]
fn ten_thousand_tasks_all_run() {
    const NUM_TASKS: usize = 10_000;

    let executed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&executed);

    let config = SchedulerConfig {
        thread_pool_size: 4,
        pin_worker_threads: false,
        ..SchedulerConfig::new(400)
    };
    TaskScheduler::run(config, move |scheduler| {
        let counter = AtomicCounter::new(0);
        let tasks = (0..NUM_TASKS)
            .map(|_| {
                let executed = Arc::clone(&seen);
                Task::new(move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        scheduler.add_tasks(tasks, Some(&counter));
        scheduler.wait_for_counter(&counter, 0, false);
    })
    .unwrap();

    assert_eq!(executed.load(Ordering::SeqCst), NUM_TASKS);
}
