use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use crossbeam::channel::unbounded;
use jobq::{FnJob, JobQueue, SharedQueuePool, ThreadPool};

const JOBS: usize = 1000;

// dispatcher + ready pool
pub fn job_queue_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_queue");
    for workers in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::new("submit", workers), workers, |b, &w| {
            b.iter(|| {
                let queue = JobQueue::new(w).unwrap();
                queue.start().unwrap();
                for j in 0..JOBS {
                    queue
                        .submit(FnJob::new(move || {
                            criterion::black_box(j * 2);
                        }))
                        .unwrap();
                }
                queue.stop().unwrap();
            })
        });
    }
    group.finish();
}

// shared channel, no dispatcher
pub fn shared_queue_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_queue_pool");
    for workers in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::new("execute", workers), workers, |b, &w| {
            b.iter(|| {
                let pool = <SharedQueuePool as ThreadPool>::new(w).unwrap();
                let (tx, rx) = unbounded();
                for j in 0..JOBS {
                    let tx = tx.clone();
                    pool.execute(move || {
                        tx.send(j * 2).unwrap();
                    })
                    .unwrap();
                }
                drop(tx);
                drop(pool);
                assert_eq!(rx.iter().count(), JOBS);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, job_queue_bench, shared_queue_bench);
criterion_main!(benches);
