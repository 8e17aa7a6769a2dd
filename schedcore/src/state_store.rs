//! The façade: typed Upsert/Delete/Lookup/Iterate operations per
//! domain table. Every mutator follows the same shape: open a write
//! transaction, mutate tables, hand off to the derived-state engine, write
//! the index register for every table touched, commit. Any error aborts the
//! whole transaction -- callers see all-or-nothing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::db::{Db, TableName, WriteTxn};
use crate::derived;
use crate::error::{Error, Result};
use crate::reads;
use crate::snapshot::{StateRestore, StateSnapshot};
use crate::types::{
    AllocClientStatus, AllocDesiredStatus, Allocation, Evaluation, EvalStatus, Index, IndexEntry,
    Job, JobStatus, JobSummary, Node,
};
use crate::watch::WatchChannel;

/// Writes `index[table] = index` and bumps that table's watch, per the
/// invariant that every commit touching a table writes its index entry.
fn bump_index(txn: &mut WriteTxn, table: TableName, index: Index) {
    txn.state_mut().index.set(table.as_str(), index);
    txn.touch(table);
    txn.touch(TableName::Index);
}

pub struct StateStore {
    db: Db,
    #[allow(dead_code)]
    config: StoreConfig,
}

impl StateStore {
    pub fn new(config: StoreConfig) -> Self {
        StateStore { db: Db::new(), config }
    }

    // -----------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------

    pub fn upsert_node(&self, index: Index, mut node: Node) -> Result<()> {
        let mut txn = self.db.begin_write();
        let existing = txn.state().nodes.get(&node.id);
        node.create_index = existing.as_ref().map(|n| n.create_index).unwrap_or(index);
        node.drain = existing.as_ref().map(|n| n.drain).unwrap_or(node.drain);
        node.modify_index = index;
        txn.state_mut().nodes.insert(Arc::new(node));
        bump_index(&mut txn, TableName::Nodes, index);
        txn.commit();
        Ok(())
    }

    pub fn delete_node(&self, index: Index, node_id: &str) -> Result<()> {
        let mut txn = self.db.begin_write();
        if txn.state().nodes.get(node_id).is_none() {
            txn.abort();
            return Err(Error::not_found("nodes", "DeleteNode", node_id));
        }
        txn.state_mut().nodes.remove(node_id);
        bump_index(&mut txn, TableName::Nodes, index);
        txn.commit();
        Ok(())
    }

    pub fn update_node_status(&self, index: Index, node_id: &str, status: String) -> Result<()> {
        let mut txn = self.db.begin_write();
        let Some(existing) = txn.state().nodes.get(node_id) else {
            txn.abort();
            return Err(Error::not_found("nodes", "UpdateNodeStatus", node_id));
        };
        let mut updated = (*existing).clone();
        updated.status = status;
        updated.modify_index = index;
        txn.state_mut().nodes.insert(Arc::new(updated));
        bump_index(&mut txn, TableName::Nodes, index);
        txn.commit();
        Ok(())
    }

    pub fn node_by_id(&self, id: &str) -> (WatchChannel, Option<Arc<Node>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Nodes), reads::node_by_id(txn.state(), id))
    }

    pub fn nodes_by_id_prefix(&self, prefix: &str) -> (WatchChannel, Vec<Arc<Node>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Nodes), reads::nodes_by_id_prefix(txn.state(), prefix))
    }

    pub fn nodes(&self) -> (WatchChannel, Vec<Arc<Node>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Nodes), reads::nodes(txn.state()))
    }

    // -----------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------

    pub fn upsert_job(&self, index: Index, mut job: Job) -> Result<()> {
        let mut txn = self.db.begin_write();
        let job_id = job.id.clone();
        let existing = txn.state().jobs.get(&job_id);

        if let Some(prev) = existing {
            job.create_index = prev.create_index;
            job.modify_index = index;
            job.job_modify_index = index;
            job.status = derived::get_job_status(&txn, &job, false);
            txn.state_mut().jobs.insert(Arc::new(job));
        } else {
            job.create_index = index;
            job.modify_index = index;
            job.job_modify_index = index;
            txn.state_mut().jobs.insert(Arc::new(job.clone()));
            // May overwrite the row just inserted with a recomputed status;
            // reload below rather than trusting the local `job` value.
            derived::set_job_status(&mut txn, index, &job, false, None);
        }

        let current = txn.state().jobs.get(&job_id).expect("job was just inserted");
        derived::update_summary_with_job(&mut txn, index, &current);

        bump_index(&mut txn, TableName::Jobs, index);
        if txn.touched(TableName::JobSummary) {
            bump_index(&mut txn, TableName::JobSummary, index);
        }
        txn.commit();
        Ok(())
    }

    pub fn update_job_status(&self, index: Index, job_id: &str, status: JobStatus) -> Result<()> {
        let mut txn = self.db.begin_write();
        let Some(existing) = txn.state().jobs.get(job_id) else {
            txn.abort();
            return Err(Error::not_found("jobs", "UpdateJobStatus", job_id));
        };
        let mut updated = (*existing).clone();
        updated.status = status;
        updated.modify_index = index;
        txn.state_mut().jobs.insert(Arc::new(updated.clone()));
        derived::update_summary_with_job(&mut txn, index, &updated);

        bump_index(&mut txn, TableName::Jobs, index);
        if txn.touched(TableName::JobSummary) {
            bump_index(&mut txn, TableName::JobSummary, index);
        }
        txn.commit();
        Ok(())
    }

    pub fn delete_job(&self, index: Index, job_id: &str) -> Result<()> {
        let mut txn = self.db.begin_write();
        if txn.state().jobs.get(job_id).is_none() {
            txn.abort();
            return Err(Error::not_found("jobs", "DeleteJob", job_id));
        }
        txn.state_mut().jobs.remove(job_id);
        txn.state_mut().job_summaries.remove(job_id);
        bump_index(&mut txn, TableName::Jobs, index);
        bump_index(&mut txn, TableName::JobSummary, index);
        txn.commit();
        Ok(())
    }

    pub fn job_by_id(&self, id: &str) -> (WatchChannel, Option<Arc<Job>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Jobs), reads::job_by_id(txn.state(), id))
    }

    pub fn jobs_by_id_prefix(&self, prefix: &str) -> (WatchChannel, Vec<Arc<Job>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Jobs), reads::jobs_by_id_prefix(txn.state(), prefix))
    }

    pub fn jobs(&self) -> (WatchChannel, Vec<Arc<Job>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Jobs), reads::jobs(txn.state()))
    }

    pub fn jobs_by_scheduler(&self, job_type: &str) -> (WatchChannel, Vec<Arc<Job>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Jobs), reads::jobs_by_scheduler(txn.state(), job_type))
    }

    // -----------------------------------------------------------------
    // Evaluations
    // -----------------------------------------------------------------

    pub fn upsert_evals(&self, index: Index, evals: Vec<Evaluation>) -> Result<()> {
        let mut txn = self.db.begin_write();
        let mut touched_jobs: HashMap<String, Option<JobStatus>> = HashMap::new();

        for mut eval in evals {
            let existing = txn.state().evals.get(&eval.id);
            eval.create_index = existing.as_ref().map(|e| e.create_index).unwrap_or(index);
            eval.modify_index = index;

            let job_id = eval.job_id.clone();
            txn.state_mut().evals.insert(Arc::new(eval.clone()));

            derived::apply_eval_queued_allocations(&mut txn, index, &eval);

            if eval.status == EvalStatus::Complete && eval.failed_tg_allocs.is_empty() {
                derived::cancel_blocked_evals(&mut txn, index, &job_id, &eval.id);
            }

            touched_jobs.entry(job_id).or_insert(None);
        }

        derived::set_job_statuses(&mut txn, index, &touched_jobs, false);

        bump_index(&mut txn, TableName::Evals, index);
        if txn.touched(TableName::Jobs) {
            bump_index(&mut txn, TableName::Jobs, index);
        }
        if txn.touched(TableName::JobSummary) {
            bump_index(&mut txn, TableName::JobSummary, index);
        }
        txn.commit();
        Ok(())
    }

    /// `DeleteEval-idempotent`: unconditionally bumps `index[evals]` and
    /// `index[allocs]` even when every ID names a row that doesn't exist.
    pub fn delete_eval(&self, index: Index, eval_ids: &[String], alloc_ids: &[String]) -> Result<()> {
        let mut txn = self.db.begin_write();
        let mut touched_jobs: HashMap<String, Option<JobStatus>> = HashMap::new();

        for eval_id in eval_ids {
            if let Some(eval) = txn.state_mut().evals.remove(eval_id) {
                touched_jobs.entry(eval.job_id.clone()).or_insert(None);
            }
        }
        for alloc_id in alloc_ids {
            txn.state_mut().allocs.remove(alloc_id);
        }

        derived::set_job_statuses(&mut txn, index, &touched_jobs, true);

        bump_index(&mut txn, TableName::Evals, index);
        bump_index(&mut txn, TableName::Allocs, index);
        if txn.touched(TableName::Jobs) {
            bump_index(&mut txn, TableName::Jobs, index);
        }
        if txn.touched(TableName::JobSummary) {
            bump_index(&mut txn, TableName::JobSummary, index);
        }
        txn.commit();
        Ok(())
    }

    pub fn eval_by_id(&self, id: &str) -> (WatchChannel, Option<Arc<Evaluation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Evals), reads::eval_by_id(txn.state(), id))
    }

    pub fn evals_by_id_prefix(&self, prefix: &str) -> (WatchChannel, Vec<Arc<Evaluation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Evals), reads::evals_by_id_prefix(txn.state(), prefix))
    }

    pub fn evals_by_job(&self, job_id: &str) -> (WatchChannel, Vec<Arc<Evaluation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Evals), reads::evals_by_job(txn.state(), job_id))
    }

    pub fn evals(&self) -> (WatchChannel, Vec<Arc<Evaluation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Evals), reads::evals(txn.state()))
    }

    // -----------------------------------------------------------------
    // Allocations
    // -----------------------------------------------------------------

    pub fn upsert_allocs(&self, index: Index, allocs: Vec<Allocation>) -> Result<()> {
        let mut txn = self.db.begin_write();
        let mut job_force_running: HashMap<String, bool> = HashMap::new();

        for mut alloc in allocs {
            let existing = txn.state().allocs.get(&alloc.id);

            alloc.create_index = existing.as_ref().map(|a| a.create_index).unwrap_or(index);
            alloc.modify_index = index;
            alloc.alloc_modify_index = index;

            // The scheduler may only ever report `Lost`; every other client
            // status is the client's alone to set via `update_allocs_from_client`.
            if alloc.client_status != AllocClientStatus::Lost {
                if let Some(prev) = &existing {
                    alloc.client_status = prev.client_status;
                    alloc.client_description = prev.client_description.clone();
                }
            }

            if alloc.job.is_none() {
                if let Some(prev) = &existing {
                    alloc.job = prev.job.clone();
                }
            }

            derived::update_summary_with_alloc(&mut txn, index, &alloc, existing.as_deref())?;

            let job_id = alloc.job_id.clone();
            let not_terminal = !alloc.client_terminal();
            txn.state_mut().allocs.insert(Arc::new(alloc));

            let force = job_force_running.entry(job_id).or_insert(false);
            *force = *force || not_terminal;
        }

        let touched_jobs: HashMap<String, Option<JobStatus>> = job_force_running
            .into_iter()
            .map(|(job_id, force)| (job_id, force.then_some(JobStatus::Running)))
            .collect();

        bump_index(&mut txn, TableName::Allocs, index);
        derived::set_job_statuses(&mut txn, index, &touched_jobs, false);
        if txn.touched(TableName::Jobs) {
            bump_index(&mut txn, TableName::Jobs, index);
        }
        if txn.touched(TableName::JobSummary) {
            bump_index(&mut txn, TableName::JobSummary, index);
        }
        txn.commit();
        Ok(())
    }

    pub fn update_allocs_from_client(&self, index: Index, allocs: Vec<Allocation>) -> Result<()> {
        let mut txn = self.db.begin_write();
        let mut touched_jobs: HashMap<String, Option<JobStatus>> = HashMap::new();

        for incoming in allocs {
            let Some(existing) = txn.state().allocs.get(&incoming.id) else {
                continue;
            };

            let mut updated = (*existing).clone();
            if existing.desired_status != AllocDesiredStatus::Pause {
                updated.client_status = incoming.client_status;
                updated.client_description = incoming.client_description.clone();
                updated.task_states = incoming.task_states.clone();
            }
            updated.modify_index = index;

            derived::update_summary_with_alloc(&mut txn, index, &updated, Some(&existing))?;

            let not_terminal = !updated.client_terminal();
            let job_id = updated.job_id.clone();
            txn.state_mut().allocs.insert(Arc::new(updated));

            if not_terminal {
                touched_jobs.insert(job_id, Some(JobStatus::Running));
            } else {
                touched_jobs.entry(job_id).or_insert(None);
            }
        }

        bump_index(&mut txn, TableName::Allocs, index);
        derived::set_job_statuses(&mut txn, index, &touched_jobs, false);
        if txn.touched(TableName::Jobs) {
            bump_index(&mut txn, TableName::Jobs, index);
        }
        if txn.touched(TableName::JobSummary) {
            bump_index(&mut txn, TableName::JobSummary, index);
        }
        txn.commit();
        Ok(())
    }

    pub fn alloc_by_id(&self, id: &str) -> (WatchChannel, Option<Arc<Allocation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Allocs), reads::alloc_by_id(txn.state(), id))
    }

    pub fn allocs_by_id_prefix(&self, prefix: &str) -> (WatchChannel, Vec<Arc<Allocation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Allocs), reads::allocs_by_id_prefix(txn.state(), prefix))
    }

    pub fn allocs_by_node(&self, node_id: &str) -> (WatchChannel, Vec<Arc<Allocation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Allocs), reads::allocs_by_node(txn.state(), node_id))
    }

    pub fn allocs_by_node_terminal(
        &self,
        node_id: &str,
        terminal: bool,
    ) -> (WatchChannel, Vec<Arc<Allocation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Allocs), reads::allocs_by_node_terminal(txn.state(), node_id, terminal))
    }

    pub fn allocs_by_job(&self, job_id: &str, all: bool) -> (WatchChannel, Vec<Arc<Allocation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Allocs), reads::allocs_by_job(txn.state(), job_id, all))
    }

    pub fn allocs_by_eval(&self, eval_id: &str) -> (WatchChannel, Vec<Arc<Allocation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Allocs), reads::allocs_by_eval(txn.state(), eval_id))
    }

    pub fn allocs(&self) -> (WatchChannel, Vec<Arc<Allocation>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::Allocs), reads::allocs(txn.state()))
    }

    // -----------------------------------------------------------------
    // Client-authoritative updates
    // -----------------------------------------------------------------

    /// Blind insert carrying client-authoritative fields verbatim; does not
    /// preserve the prior `CreateIndex` (see the design notes' open
    /// questions) and performs no derivation.
    pub fn update_job_from_client(&self, index: Index, job: Job) -> Result<()> {
        let mut txn = self.db.begin_write();
        txn.state_mut().jobs.insert(Arc::new(job));
        bump_index(&mut txn, TableName::Jobs, index);
        txn.commit();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Job summaries
    // -----------------------------------------------------------------

    pub fn job_summary_by_id(&self, job_id: &str) -> (WatchChannel, Option<Arc<JobSummary>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::JobSummary), reads::job_summary_by_id(txn.state(), job_id))
    }

    pub fn job_summaries_by_prefix(&self, prefix: &str) -> (WatchChannel, Vec<Arc<JobSummary>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::JobSummary), reads::job_summaries_by_prefix(txn.state(), prefix))
    }

    pub fn job_summaries(&self) -> (WatchChannel, Vec<Arc<JobSummary>>) {
        let txn = self.db.begin_read();
        (txn.watch(TableName::JobSummary), reads::job_summaries(txn.state()))
    }

    /// Rebuilds every job summary from the jobs/allocs tables, bypassing
    /// whatever the summaries currently say. Exposed for the embedder to
    /// call after a restore that doesn't trust the snapshot's summaries
    /// (see [`StoreConfig::reconcile_summaries_on_restore`]).
    pub fn reconcile_job_summaries(&self, index: Index) {
        let mut txn = self.db.begin_write();
        derived::reconcile_job_summaries(&mut txn, index);
        if txn.touched(TableName::JobSummary) {
            bump_index(&mut txn, TableName::JobSummary, index);
        }
        txn.commit();
    }

    // -----------------------------------------------------------------
    // Index register
    // -----------------------------------------------------------------

    pub fn index(&self, table: &str) -> Index {
        reads::index(self.db.begin_read().state(), table)
    }

    pub fn latest_index(&self) -> Index {
        reads::latest_index(self.db.begin_read().state())
    }

    pub fn indexes(&self) -> Vec<Arc<IndexEntry>> {
        reads::indexes(self.db.begin_read().state())
    }

    /// Test-only: deletes an `index` row outright. Exposed because the
    /// index register is otherwise only ever grown, never shrunk, and
    /// tests need a way to set up a "never touched" starting condition.
    pub fn remove_index(&self, table: &str) {
        let mut txn = self.db.begin_write();
        txn.state_mut().index.remove(table);
        txn.touch(TableName::Index);
        txn.commit();
    }

    // -----------------------------------------------------------------
    // Snapshot & restore
    // -----------------------------------------------------------------

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(self.db.begin_read().into_state())
    }

    pub fn restore(&self) -> StateRestore<'_> {
        StateRestore::new(&self.db)
    }

    pub async fn abandon_ch(&self) {
        self.db.abandon_handle().wait().await;
    }

    pub fn abandon(&self) {
        self.db.abandon_handle().abandon();
    }
}
