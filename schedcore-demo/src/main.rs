//! A small, non-served walk-through of the façade against an empty store.
//! Not a CLI: it takes no arguments and opens no socket, it just runs a
//! handful of operations so the control flow in `schedcore` is legible.

use schedcore::config::StoreConfig;
use schedcore::state_store::StateStore;
use schedcore::types::{Allocation, AllocClientStatus, AllocDesiredStatus, Job, JobStatus, Task};
use std::collections::HashMap;

fn main() {
    let store = StateStore::new(StoreConfig::default());

    store
        .upsert_job(
            5,
            Job {
                id: "job1".into(),
                job_type: "service".into(),
                status: JobStatus::Pending,
                tasks: vec![Task { task_type: "web".into() }],
                create_index: 0,
                modify_index: 0,
                job_modify_index: 0,
            },
        )
        .expect("upsert_job");

    let (_watch, job) = store.job_by_id("job1");
    println!("after UpsertJob: {:?}", job.map(|j| j.status));

    let job_ref = store.job_by_id("job1").1.expect("job1 just inserted");

    store
        .upsert_allocs(
            6,
            vec![Allocation {
                id: "alloc1".into(),
                job_id: "job1".into(),
                task: "web".into(),
                node_id: "node1".into(),
                eval_id: "eval1".into(),
                desired_status: AllocDesiredStatus::Run,
                client_status: AllocClientStatus::Pending,
                client_description: String::new(),
                task_states: HashMap::new(),
                job: Some(job_ref),
                create_index: 0,
                modify_index: 0,
                alloc_modify_index: 0,
            }],
        )
        .expect("upsert_allocs");

    let (_watch, job) = store.job_by_id("job1");
    println!("after UpsertAllocs: {:?}", job.map(|j| j.status));

    let (_watch, summary) = store.job_summary_by_id("job1");
    println!("job summary: {:?}", summary);

    let snapshot = store.snapshot();
    println!("snapshot latest index: {}", snapshot.latest_index());
}
