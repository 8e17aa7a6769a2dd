//! End-to-end scenarios exercising the façade, derived-state engine, and
//! watch primitives together.

use std::collections::HashMap;
use std::time::Duration;

use pretty_assertions::assert_eq;

use schedcore::config::StoreConfig;
use schedcore::error::Error;
use schedcore::snapshot::restore_from_bytes;
use schedcore::state_store::StateStore;
use schedcore::types::{
    AllocClientStatus, AllocDesiredStatus, Allocation, EvalStatus, Evaluation, Job, JobStatus,
    Node, Task,
};
use schedcore::watch::WatchSet;

fn plain_job(id: &str) -> Job {
    Job {
        id: id.to_string(),
        job_type: "service".into(),
        status: JobStatus::Pending,
        tasks: vec![Task { task_type: "t1".into() }],
        create_index: 0,
        modify_index: 0,
        job_modify_index: 0,
    }
}

fn plain_alloc(id: &str, job: &Job, client_status: AllocClientStatus) -> Allocation {
    Allocation {
        id: id.to_string(),
        job_id: job.id.clone(),
        task: "t1".into(),
        node_id: "node1".into(),
        eval_id: "eval1".into(),
        desired_status: AllocDesiredStatus::Run,
        client_status,
        client_description: String::new(),
        task_states: HashMap::new(),
        job: Some(std::sync::Arc::new(job.clone())),
        create_index: 0,
        modify_index: 0,
        alloc_modify_index: 0,
    }
}

#[test]
fn job_creation_sets_pending_and_summary() {
    let store = StateStore::new(StoreConfig::default());
    store.upsert_job(5, plain_job("j1")).unwrap();

    let (_w, job) = store.job_by_id("j1");
    let job = job.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.create_index, 5);
    assert_eq!(job.modify_index, 5);
    assert_eq!(job.job_modify_index, 5);

    let (_w, summary) = store.job_summary_by_id("j1");
    let summary = summary.unwrap();
    assert!(summary.tasks.contains_key("t1"));
    assert_eq!(summary.create_index, 5);
    assert_eq!(summary.modify_index, 5);

    assert_eq!(store.index("jobs"), 5);
    assert_eq!(store.index("job_summary"), 5);
}

#[test]
fn allocation_transitions_job_to_running() {
    let store = StateStore::new(StoreConfig::default());
    store.upsert_job(5, plain_job("j1")).unwrap();
    let job = store.job_by_id("j1").1.unwrap();

    store
        .upsert_allocs(6, vec![plain_alloc("a1", &job, AllocClientStatus::Pending)])
        .unwrap();

    let (_w, job) = store.job_by_id("j1");
    assert_eq!(job.unwrap().status, JobStatus::Running);

    let (_w, summary) = store.job_summary_by_id("j1");
    let summary = summary.unwrap();
    assert_eq!(
        summary.tasks.get("t1").unwrap().status,
        Some(schedcore::types::TaskStatus::Starting)
    );

    assert_eq!(store.index("allocs"), 6);
    assert_eq!(store.index("jobs"), 6);
    assert_eq!(store.index("job_summary"), 6);
}

#[test]
fn client_reports_failure_marks_job_dead() {
    let store = StateStore::new(StoreConfig::default());
    store.upsert_job(5, plain_job("j1")).unwrap();
    let job = store.job_by_id("j1").1.unwrap();
    store
        .upsert_allocs(6, vec![plain_alloc("a1", &job, AllocClientStatus::Pending)])
        .unwrap();

    store
        .update_allocs_from_client(7, vec![plain_alloc("a1", &job, AllocClientStatus::Failed)])
        .unwrap();

    let (_w, alloc) = store.alloc_by_id("a1");
    assert_eq!(alloc.unwrap().client_status, AllocClientStatus::Failed);

    let (_w, job) = store.job_by_id("j1");
    assert_eq!(job.unwrap().status, JobStatus::Dead);

    let (_w, summary) = store.job_summary_by_id("j1");
    assert_eq!(
        summary.unwrap().tasks.get("t1").unwrap().status,
        Some(schedcore::types::TaskStatus::Failed)
    );
}

#[test]
fn blocked_eval_cancelled_on_clean_completion() {
    let store = StateStore::new(StoreConfig::default());
    store.upsert_job(5, plain_job("j1")).unwrap();

    store
        .upsert_evals(
            6,
            vec![Evaluation {
                id: "e_blk".into(),
                job_id: "j1".into(),
                status: EvalStatus::Blocked,
                status_description: String::new(),
                failed_tg_allocs: HashMap::new(),
                queued_allocations: HashMap::new(),
                create_index: 0,
                modify_index: 0,
            }],
        )
        .unwrap();

    store
        .upsert_evals(
            8,
            vec![Evaluation {
                id: "e_ok".into(),
                job_id: "j1".into(),
                status: EvalStatus::Complete,
                status_description: String::new(),
                failed_tg_allocs: HashMap::new(),
                queued_allocations: HashMap::new(),
                create_index: 0,
                modify_index: 0,
            }],
        )
        .unwrap();

    let (_w, blocked) = store.eval_by_id("e_blk");
    let blocked = blocked.unwrap();
    assert_eq!(blocked.status, EvalStatus::Cancelled);
    assert!(blocked.status_description.contains("e_ok"));
    assert_eq!(blocked.modify_index, 8);
}

#[test]
fn paused_job_is_immune_to_derived_status() {
    let store = StateStore::new(StoreConfig::default());
    store.upsert_job(5, plain_job("j1")).unwrap();
    store.update_job_status(6, "j1", JobStatus::Pause).unwrap();

    let job = store.job_by_id("j1").1.unwrap();
    store
        .upsert_allocs(9, vec![plain_alloc("a1", &job, AllocClientStatus::Pending)])
        .unwrap();

    let (_w, job) = store.job_by_id("j1");
    assert_eq!(job.unwrap().status, JobStatus::Pause);
}

#[test]
fn snapshot_is_isolated_from_later_writes() {
    let store = StateStore::new(StoreConfig::default());
    store.upsert_job(5, plain_job("j1")).unwrap();

    let snapshot = store.snapshot();

    let job = store.job_by_id("j1").1.unwrap();
    store
        .upsert_allocs(6, vec![plain_alloc("a1", &job, AllocClientStatus::Pending)])
        .unwrap();
    store
        .update_allocs_from_client(7, vec![plain_alloc("a1", &job, AllocClientStatus::Failed)])
        .unwrap();

    let snap_job = snapshot.job_by_id("j1").unwrap();
    assert_eq!(snap_job.status, JobStatus::Pending);
    assert!(snapshot.allocs_by_job("j1", true).is_empty());

    let live_job = store.job_by_id("j1").1.unwrap();
    assert_eq!(live_job.status, JobStatus::Dead);
}

#[test]
fn allocs_by_job_filters_stale_embedded_job() {
    let store = StateStore::new(StoreConfig::default());
    let mut job = plain_job("j1");
    job.create_index = 4;
    store.upsert_job(5, job.clone()).unwrap();

    let current_job = store.job_by_id("j1").1.unwrap();
    assert_eq!(current_job.create_index, 5);

    let mut stale_job = (*current_job).clone();
    stale_job.create_index = 4;
    let stale_alloc = plain_alloc("a1", &stale_job, AllocClientStatus::Pending);

    store.upsert_allocs(6, vec![stale_alloc]).unwrap();

    let (_w, exact) = store.allocs_by_job("j1", false);
    assert!(exact.is_empty());

    let (_w, all) = store.allocs_by_job("j1", true);
    assert_eq!(all.len(), 1);
}

#[test]
fn delete_node_on_missing_node_names_table_and_id() {
    let store = StateStore::new(StoreConfig::default());
    let err = store.delete_node(1, "missing").unwrap_err();
    match err {
        Error::NotFound { table, id, .. } => {
            assert_eq!(table, "nodes");
            assert_eq!(id, "missing");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn watch_fires_on_table_wide_change_and_expires_on_deadline() {
    let store = std::sync::Arc::new(StateStore::new(StoreConfig::default()));

    let (watch, job) = store.job_by_id("j1");
    assert!(job.is_none());
    let mut set = WatchSet::new();
    set.add(watch);

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.upsert_job(5, plain_job("j1")).unwrap();
        })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    let fired = set.watch(deadline).await;
    writer.await.unwrap();
    assert!(fired);

    let (watch, _job) = store.job_by_id("j2");
    let mut set = WatchSet::new();
    set.add(watch);
    let short_deadline = tokio::time::Instant::now() + Duration::from_millis(10);
    assert!(!set.watch(short_deadline).await);
}

#[test]
fn snapshot_round_trips_through_bytes_into_a_fresh_store() {
    let store = StateStore::new(StoreConfig::default());

    store
        .upsert_node(1, Node {
            id: "n1".into(),
            status: "ready".into(),
            drain: true,
            create_index: 0,
            modify_index: 0,
        })
        .unwrap();

    store.upsert_job(2, plain_job("j1")).unwrap();
    let job = store.job_by_id("j1").1.unwrap();

    store
        .upsert_evals(
            3,
            vec![Evaluation {
                id: "e1".into(),
                job_id: "j1".into(),
                status: EvalStatus::Complete,
                status_description: String::new(),
                failed_tg_allocs: HashMap::new(),
                queued_allocations: HashMap::new(),
                create_index: 0,
                modify_index: 0,
            }],
        )
        .unwrap();

    store
        .upsert_allocs(4, vec![plain_alloc("a1", &job, AllocClientStatus::Pending)])
        .unwrap();

    let snapshot = store.snapshot();
    let bytes = snapshot.to_bytes().unwrap();

    let restored = StateStore::new(StoreConfig::default());
    let mut restore = restored.restore();
    restore_from_bytes(&mut restore, &bytes).unwrap();
    restore.commit();

    assert_eq!(restored.nodes().1, snapshot.nodes());
    assert_eq!(restored.jobs().1, snapshot.jobs());
    assert_eq!(restored.evals().1, snapshot.evals());
    assert_eq!(restored.allocs().1, snapshot.allocs());
    assert_eq!(restored.job_summaries().1, snapshot.job_summaries());
    assert_eq!(restored.indexes(), snapshot.indexes());
    assert!(!restored.indexes().is_empty());
}
