//! Wait/resume latency benchmark.
//!
//! Each cycle parks the main fiber on a counter, lets a worker run the
//! decrementing task, and resumes the waiter: the core park-steal-resume
//! round trip.

use criterion::{Criterion, criterion_group, criterion_main};
use weft::{AtomicCounter, SchedulerConfig, Task, TaskScheduler};

const CYCLES_PER_RUN: usize = 256;

fn wait_cycles() {
    let config = SchedulerConfig {
        thread_pool_size: 2,
        pin_worker_threads: false,
        ..SchedulerConfig::new(32)
    };
    TaskScheduler::run(config, |scheduler| {
        for _ in 0..CYCLES_PER_RUN {
            let counter = AtomicCounter::new(1);
            let decrement = counter.clone();
            scheduler.add_task(
                Task::new(move |s| {
                    decrement.fetch_sub(1, s);
                }),
                None,
            );
            scheduler.wait_for_counter(&counter, 0, false);
        }
    })
    .unwrap();
}

fn bench_wait_latency(c: &mut Criterion) {
    c.bench_function("wait_resume_cycles", |b| b.iter(wait_cycles));
}

criterion_group!(benches, bench_wait_latency);
criterion_main!(benches);
