//! Derived-state engine: recomputes job status from allocations and
//! evaluations, keeps job summaries in step with jobs and allocations, and
//! cancels blocked evaluations when a sibling eval finishes cleanly.
//!
//! All index-register bumps happen in the façade, not here; this module
//! only ever touches `jobs` and `job_summary` rows and tells the caller
//! which tables it touched via `WriteTxn::touch`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{TableName, WriteTxn};
use crate::error::{Error, Result};
use crate::reads;
use crate::types::{
    AllocClientStatus, AllocDesiredStatus, Allocation, EvalStatus, Evaluation, Index, Job,
    JobStatus, JobSummary, TaskStatus, TaskSummary,
};

fn client_status_to_task_status(status: AllocClientStatus) -> TaskStatus {
    match status {
        AllocClientStatus::Pending => TaskStatus::Starting,
        AllocClientStatus::Running => TaskStatus::Running,
        AllocClientStatus::Complete => TaskStatus::Complete,
        AllocClientStatus::Failed => TaskStatus::Failed,
        AllocClientStatus::Lost => TaskStatus::Lost,
    }
}

/// `getJobStatus`: `Running` if any non-terminal alloc exists, else
/// `Pending` if any non-terminal eval exists, else `Dead` if this is an
/// eval-delete or the job ever had an eval or alloc, else `Pending`.
pub(crate) fn get_job_status(txn: &WriteTxn, job: &Job, eval_delete: bool) -> JobStatus {
    let allocs = reads::allocs_by_job(txn.state(), &job.id, true);
    if allocs.iter().any(|a| !a.terminal()) {
        return JobStatus::Running;
    }

    let evals = reads::evals_by_job(txn.state(), &job.id);
    if evals.iter().any(|e| !e.status.is_terminal()) {
        return JobStatus::Pending;
    }

    if eval_delete || !evals.is_empty() || !allocs.is_empty() {
        JobStatus::Dead
    } else {
        JobStatus::Pending
    }
}

/// `setJobStatus`: publishes a new job status unless it's unchanged from
/// what's already stored. A job whose `CreateIndex` equals the commit index
/// is brand new, so its "old" status counts as absent -- new jobs always
/// publish their first status.
pub(crate) fn set_job_status(
    txn: &mut WriteTxn,
    index: Index,
    job: &Job,
    eval_delete: bool,
    force_status: Option<JobStatus>,
) {
    let old_status = if index == job.create_index { None } else { Some(job.status) };
    let new_status = force_status.unwrap_or_else(|| get_job_status(txn, job, eval_delete));

    if old_status == Some(new_status) {
        return;
    }

    let mut updated = job.clone();
    updated.status = new_status;
    updated.modify_index = index;
    txn.state_mut().jobs.insert(Arc::new(updated));
    txn.touch(TableName::Jobs);
}

/// `setJobStatuses`: applies `setJobStatus` to a batch of jobs, skipping
/// ones that no longer exist or are paused (pause-immunity, invariant 6).
pub(crate) fn set_job_statuses(
    txn: &mut WriteTxn,
    index: Index,
    jobs: &HashMap<String, Option<JobStatus>>,
    eval_delete: bool,
) {
    for (job_id, force_status) in jobs {
        let Some(job) = txn.state().jobs.get(job_id) else {
            continue;
        };
        if matches!(job.status, JobStatus::Pause) {
            continue;
        }
        set_job_status(txn, index, &job, eval_delete, *force_status);
    }
}

/// `updateSummaryWithJob`: ensures a JobSummary exists and carries every
/// current task type (summary-coverage, invariant 4).
pub(crate) fn update_summary_with_job(txn: &mut WriteTxn, index: Index, job: &Job) {
    let mut changed = false;
    let mut summary = match txn.state().job_summaries.get(&job.id) {
        Some(existing) => (*existing).clone(),
        None => {
            changed = true;
            JobSummary {
                job_id: job.id.clone(),
                tasks: HashMap::new(),
                create_index: index,
                modify_index: index,
            }
        }
    };

    for task in &job.tasks {
        if !summary.tasks.contains_key(&task.task_type) {
            summary.tasks.insert(task.task_type.clone(), TaskSummary::default());
            changed = true;
        }
    }

    if changed {
        summary.modify_index = index;
        txn.state_mut().job_summaries.insert(Arc::new(summary));
        txn.touch(TableName::JobSummary);
    }
}

/// `updateSummaryWithAlloc`: folds one allocation's client status into its
/// job summary's per-task status.
pub(crate) fn update_summary_with_alloc(
    txn: &mut WriteTxn,
    index: Index,
    new_alloc: &Allocation,
    existing_alloc: Option<&Allocation>,
) -> Result<()> {
    let Some(alloc_job) = new_alloc.job.as_ref() else {
        return Ok(());
    };

    let summary = match txn.state().job_summaries.get(&new_alloc.job_id) {
        Some(existing) => existing,
        None => {
            if txn.state().jobs.get(&new_alloc.job_id).is_none() {
                return Ok(());
            }
            return Err(Error::invariant(
                format!("job_summary[{}]", new_alloc.job_id),
                "summary missing for a still-registered job",
            ));
        }
    };

    // The alloc points at an older version of the job than the summary was
    // built from; skip rather than mixing task sets across job versions.
    if summary.create_index != alloc_job.create_index {
        return Ok(());
    }

    let mut summary = (*summary).clone();
    let mut task_summary = summary.tasks.get(&new_alloc.task).cloned().ok_or_else(|| {
        Error::invariant(
            format!("job_summary[{}]", new_alloc.job_id),
            format!("no task summary for task {:?}", new_alloc.task),
        )
    })?;

    let mut changed = false;

    match existing_alloc {
        None => {
            if new_alloc.client_status == AllocClientStatus::Pending {
                task_summary.status = Some(TaskStatus::Starting);
                changed = true;
            } else {
                log::warn!(
                    "allocation {}: invalid client status {:?} on a brand-new allocation",
                    new_alloc.id,
                    new_alloc.client_status
                );
            }
            if matches!(
                new_alloc.desired_status,
                AllocDesiredStatus::Stop | AllocDesiredStatus::Evict
            ) {
                log::warn!(
                    "allocation {}: invalid desired status {:?} on a brand-new allocation",
                    new_alloc.id,
                    new_alloc.desired_status
                );
            }
        }
        Some(existing) if existing.client_status != new_alloc.client_status => {
            task_summary.status = Some(client_status_to_task_status(new_alloc.client_status));
            changed = true;
        }
        Some(_) => {}
    }

    if changed {
        summary.tasks.insert(new_alloc.task.clone(), task_summary);
        summary.modify_index = index;
        txn.state_mut().job_summaries.insert(Arc::new(summary));
        txn.touch(TableName::JobSummary);
    }

    Ok(())
}

/// Eval-driven summary update, run from inside `UpsertEvals` for each
/// queued task group. The original writes the existing `TaskSummary` back
/// unchanged here rather than setting `Status = Queued` -- reproduced
/// faithfully rather than "fixed"; see the design notes' open questions.
pub(crate) fn apply_eval_queued_allocations(txn: &mut WriteTxn, index: Index, eval: &Evaluation) {
    let Some(existing) = txn.state().job_summaries.get(&eval.job_id) else {
        return;
    };

    let mut summary = (*existing).clone();
    let mut changed = false;

    for tg in eval.queued_allocations.keys() {
        match summary.tasks.get(tg).cloned() {
            Some(task_summary) => {
                if task_summary.status != Some(TaskStatus::Queued) {
                    summary.tasks.insert(tg.clone(), task_summary);
                    changed = true;
                }
            }
            None => {
                log::error!(
                    "job_summary[{}]: no task summary for queued task group {:?}",
                    eval.job_id,
                    tg
                );
            }
        }
    }

    if changed {
        summary.modify_index = index;
        txn.state_mut().job_summaries.insert(Arc::new(summary));
        txn.touch(TableName::JobSummary);
    }
}

/// Cancels every blocked evaluation of `job_id` other than `triggering_eval`,
/// called when an eval completes cleanly (no failed task-group allocs).
pub(crate) fn cancel_blocked_evals(
    txn: &mut WriteTxn,
    index: Index,
    job_id: &str,
    triggering_eval: &str,
) {
    let blocked = txn.state().evals.by_job_and_status(job_id, EvalStatus::Blocked);
    if blocked.is_empty() {
        return;
    }
    for eval in blocked {
        let mut cancelled = (*eval).clone();
        cancelled.status = EvalStatus::Cancelled;
        cancelled.status_description =
            format!("evaluation {triggering_eval} cancelled this blocked evaluation");
        cancelled.modify_index = index;
        txn.state_mut().evals.insert(Arc::new(cancelled));
    }
    txn.touch(TableName::Evals);
}

/// `ReconcileJobSummaries`: rebuilds every job summary from scratch off the
/// current jobs and allocations tables, used after a restore when the
/// embedder doesn't trust the summaries carried in the snapshot.
pub(crate) fn reconcile_job_summaries(txn: &mut WriteTxn, index: Index) {
    let jobs = txn.state().jobs.all();

    for job in &jobs {
        let mut tasks = HashMap::new();
        for task in &job.tasks {
            tasks.insert(task.task_type.clone(), TaskSummary::default());
        }

        let mut summary = JobSummary {
            job_id: job.id.clone(),
            tasks,
            create_index: job.create_index,
            modify_index: index,
        };

        for alloc in reads::allocs_by_job(txn.state(), &job.id, true) {
            let Some(alloc_job) = alloc.job.as_ref() else {
                continue;
            };
            if alloc_job.create_index != job.create_index {
                continue;
            }
            match summary.tasks.get_mut(&alloc.task) {
                Some(task_summary) => {
                    task_summary.status = Some(client_status_to_task_status(alloc.client_status));
                }
                None => {
                    log::error!(
                        "job_summary[{}]: allocation {} references unknown task {:?}",
                        job.id,
                        alloc.id,
                        alloc.task
                    );
                }
            }
        }

        txn.state_mut().job_summaries.insert(Arc::new(summary));
    }

    if !jobs.is_empty() {
        txn.touch(TableName::JobSummary);
    }
}
