use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use schedcore::config::StoreConfig;
use schedcore::state_store::StateStore;
use schedcore::types::{AllocClientStatus, AllocDesiredStatus, Allocation, Job, JobStatus, Task};

fn allocs_batch(job: &Job, batch: usize) -> Vec<Allocation> {
    (0..batch)
        .map(|i| Allocation {
            id: format!("alloc-{i}"),
            job_id: job.id.clone(),
            task: "t1".into(),
            node_id: "node1".into(),
            eval_id: "eval1".into(),
            desired_status: AllocDesiredStatus::Run,
            client_status: AllocClientStatus::Pending,
            client_description: String::new(),
            task_states: HashMap::new(),
            job: Some(Arc::new(job.clone())),
            create_index: 0,
            modify_index: 0,
            alloc_modify_index: 0,
        })
        .collect()
}

fn upsert_allocs_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert_allocs");

    for batch in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter_batched(
                || {
                    let store = StateStore::new(StoreConfig::default());
                    store
                        .upsert_job(
                            1,
                            Job {
                                id: "bench-job".into(),
                                job_type: "service".into(),
                                status: JobStatus::Pending,
                                tasks: vec![Task { task_type: "t1".into() }],
                                create_index: 0,
                                modify_index: 0,
                                job_modify_index: 0,
                            },
                        )
                        .unwrap();
                    let job = store.job_by_id("bench-job").1.unwrap();
                    (store, allocs_batch(&job, batch))
                },
                |(store, allocs)| {
                    store.upsert_allocs(black_box(2), black_box(allocs)).unwrap();
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, upsert_allocs_benchmark);
criterion_main!(benches);
