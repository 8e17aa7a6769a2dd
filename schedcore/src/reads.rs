//! Read-only queries against a `DbState`, shared between the live façade
//! (which additionally registers watch channels) and snapshots (which
//! don't, since a snapshot's view never changes once taken).

use std::sync::Arc;

use crate::db::DbState;
use crate::types::{Allocation, Evaluation, Index, IndexEntry, Job, JobSummary, Node};

pub(crate) fn node_by_id(state: &DbState, id: &str) -> Option<Arc<Node>> {
    state.nodes.get(id)
}

pub(crate) fn nodes_by_id_prefix(state: &DbState, prefix: &str) -> Vec<Arc<Node>> {
    state.nodes.by_prefix(prefix)
}

pub(crate) fn nodes(state: &DbState) -> Vec<Arc<Node>> {
    state.nodes.all()
}

pub(crate) fn job_by_id(state: &DbState, id: &str) -> Option<Arc<Job>> {
    state.jobs.get(id)
}

pub(crate) fn jobs_by_id_prefix(state: &DbState, prefix: &str) -> Vec<Arc<Job>> {
    state.jobs.by_prefix(prefix)
}

pub(crate) fn jobs(state: &DbState) -> Vec<Arc<Job>> {
    state.jobs.all()
}

pub(crate) fn jobs_by_scheduler(state: &DbState, job_type: &str) -> Vec<Arc<Job>> {
    state.jobs.by_type(job_type)
}

pub(crate) fn eval_by_id(state: &DbState, id: &str) -> Option<Arc<Evaluation>> {
    state.evals.get(id)
}

pub(crate) fn evals_by_id_prefix(state: &DbState, prefix: &str) -> Vec<Arc<Evaluation>> {
    state.evals.by_prefix(prefix)
}

/// `EvalsByJob`: scans the leaky `job_prefix` index, then filters out the
/// false positives it admits (other jobs sharing `job_id` as a byte prefix).
pub(crate) fn evals_by_job(state: &DbState, job_id: &str) -> Vec<Arc<Evaluation>> {
    state
        .evals
        .by_job_prefix(job_id)
        .into_iter()
        .filter(|e| e.job_id == job_id)
        .collect()
}

pub(crate) fn evals(state: &DbState) -> Vec<Arc<Evaluation>> {
    state.evals.all()
}

pub(crate) fn alloc_by_id(state: &DbState, id: &str) -> Option<Arc<Allocation>> {
    state.allocs.get(id)
}

pub(crate) fn allocs_by_id_prefix(state: &DbState, prefix: &str) -> Vec<Arc<Allocation>> {
    state.allocs.by_prefix(prefix)
}

pub(crate) fn allocs_by_node(state: &DbState, node_id: &str) -> Vec<Arc<Allocation>> {
    state.allocs.by_node(node_id)
}

pub(crate) fn allocs_by_node_terminal(
    state: &DbState,
    node_id: &str,
    terminal: bool,
) -> Vec<Arc<Allocation>> {
    state.allocs.by_node_and_terminal(node_id, terminal)
}

/// `AllocsByJob(jobID, all)`: when `all` is false, drops allocations whose
/// denormalized `Job` doesn't match the currently registered Job's
/// `CreateIndex` (invariant 5 in the data model).
pub(crate) fn allocs_by_job(state: &DbState, job_id: &str, all: bool) -> Vec<Arc<Allocation>> {
    let allocs = state.allocs.by_job(job_id);
    if all {
        return allocs;
    }
    let Some(current_job) = state.jobs.get(job_id) else {
        return Vec::new();
    };
    allocs
        .into_iter()
        .filter(|a| {
            a.job
                .as_ref()
                .is_some_and(|j| j.create_index == current_job.create_index)
        })
        .collect()
}

pub(crate) fn allocs_by_eval(state: &DbState, eval_id: &str) -> Vec<Arc<Allocation>> {
    state.allocs.by_eval(eval_id)
}

pub(crate) fn allocs(state: &DbState) -> Vec<Arc<Allocation>> {
    state.allocs.all()
}

pub(crate) fn job_summary_by_id(state: &DbState, job_id: &str) -> Option<Arc<JobSummary>> {
    state.job_summaries.get(job_id)
}

pub(crate) fn job_summaries_by_prefix(state: &DbState, prefix: &str) -> Vec<Arc<JobSummary>> {
    state.job_summaries.by_prefix(prefix)
}

pub(crate) fn job_summaries(state: &DbState) -> Vec<Arc<JobSummary>> {
    state.job_summaries.all()
}

pub(crate) fn index(state: &DbState, table: &str) -> Index {
    state.index.get(table)
}

pub(crate) fn latest_index(state: &DbState) -> Index {
    state.index.latest()
}

pub(crate) fn indexes(state: &DbState) -> Vec<Arc<IndexEntry>> {
    state.index.all()
}
