use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::deque::{Steal, Worker};
use weft::{AtomicCounter, SchedulerConfig, Task, TaskScheduler};

#[test]
fn fifo_owner_pop_respects_push_order() {
    // The scheduler's local queues use Worker::new_fifo(): the owner pops
    // in push order.
    let w = Worker::<i32>::new_fifo();
    w.push(1);
    w.push(2);
    w.push(3);

    assert_eq!(w.pop(), Some(1));
    assert_eq!(w.pop(), Some(2));
    assert_eq!(w.pop(), Some(3));
    assert_eq!(w.pop(), None);
}

#[test]
fn fifo_steal_order_matches_push_order() {
    let w = Worker::<i32>::new_fifo();
    w.push(1);
    w.push(2);
    w.push(3);

    let s = w.stealer();
    assert_eq!(s.steal(), Steal::Success(1));
    assert_eq!(s.steal(), Steal::Success(2));
    assert_eq!(s.steal(), Steal::Success(3));
    assert_eq!(s.steal(), Steal::Empty);
}

#[test]
fn one_producer_feeds_every_worker() {
    const NUM_TASKS: usize = 2_000;

    let executed = Arc::new(AtomicUsize::new(0));
    let workers_seen = Arc::new(Mutex::new(HashSet::new()));
    let (seen, count) = (Arc::clone(&workers_seen), Arc::clone(&executed));

    let config = SchedulerConfig {
        thread_pool_size: 4,
        pin_worker_threads: false,
        ..SchedulerConfig::new(64)
    };
    TaskScheduler::run(config, move |scheduler| {
        let counter = AtomicCounter::new(0);
        // All tasks land on the main fiber's worker; the others only get
        // work by stealing.
        let tasks = (0..NUM_TASKS)
            .map(|_| {
                let seen = Arc::clone(&seen);
                let count = Arc::clone(&count);
                Task::new(move |s: &TaskScheduler| {
                    seen.lock().unwrap().insert(s.current_worker_index().unwrap());
                    // A little work so the queue stays contended.
                    for _ in 0..500 {
                        std::hint::spin_loop();
                    }
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        scheduler.add_tasks(tasks, Some(&counter));
        scheduler.wait_for_counter(&counter, 0, false);
    })
    .unwrap();

    assert_eq!(executed.load(Ordering::SeqCst), NUM_TASKS);
    // With thousands of tasks enqueued on one worker, at least one other
    // worker must have stolen some.
    assert!(workers_seen.lock().unwrap().len() >= 2);
}
