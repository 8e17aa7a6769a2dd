//! Snapshot & restore.
//!
//! `StateSnapshot` is a frozen `Arc<DbState>`: taking one is an `Arc` clone,
//! so it never blocks a concurrent writer and is unaffected by commits that
//! happen after it was taken. `StateRestore` is the inverse -- a single long
//! write transaction that accepts raw records with no derivation, for the
//! replication layer to replay a decoded snapshot into a fresh store.

use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::db::{Db, DbState, TableName, WriteTxn};
use crate::error::{Error, Result};
use crate::reads;
use crate::types::{Allocation, Evaluation, Index, IndexEntry, Job, JobSummary, Node};

pub struct StateSnapshot {
    state: Arc<DbState>,
}

impl StateSnapshot {
    pub(crate) fn new(state: Arc<DbState>) -> Self {
        StateSnapshot { state }
    }

    pub fn node_by_id(&self, id: &str) -> Option<Arc<Node>> {
        reads::node_by_id(&self.state, id)
    }

    pub fn nodes_by_id_prefix(&self, prefix: &str) -> Vec<Arc<Node>> {
        reads::nodes_by_id_prefix(&self.state, prefix)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        reads::nodes(&self.state)
    }

    pub fn job_by_id(&self, id: &str) -> Option<Arc<Job>> {
        reads::job_by_id(&self.state, id)
    }

    pub fn jobs_by_id_prefix(&self, prefix: &str) -> Vec<Arc<Job>> {
        reads::jobs_by_id_prefix(&self.state, prefix)
    }

    pub fn jobs(&self) -> Vec<Arc<Job>> {
        reads::jobs(&self.state)
    }

    pub fn jobs_by_scheduler(&self, job_type: &str) -> Vec<Arc<Job>> {
        reads::jobs_by_scheduler(&self.state, job_type)
    }

    pub fn eval_by_id(&self, id: &str) -> Option<Arc<Evaluation>> {
        reads::eval_by_id(&self.state, id)
    }

    pub fn evals_by_id_prefix(&self, prefix: &str) -> Vec<Arc<Evaluation>> {
        reads::evals_by_id_prefix(&self.state, prefix)
    }

    pub fn evals_by_job(&self, job_id: &str) -> Vec<Arc<Evaluation>> {
        reads::evals_by_job(&self.state, job_id)
    }

    pub fn evals(&self) -> Vec<Arc<Evaluation>> {
        reads::evals(&self.state)
    }

    pub fn alloc_by_id(&self, id: &str) -> Option<Arc<Allocation>> {
        reads::alloc_by_id(&self.state, id)
    }

    pub fn allocs_by_id_prefix(&self, prefix: &str) -> Vec<Arc<Allocation>> {
        reads::allocs_by_id_prefix(&self.state, prefix)
    }

    pub fn allocs_by_node(&self, node_id: &str) -> Vec<Arc<Allocation>> {
        reads::allocs_by_node(&self.state, node_id)
    }

    pub fn allocs_by_node_terminal(&self, node_id: &str, terminal: bool) -> Vec<Arc<Allocation>> {
        reads::allocs_by_node_terminal(&self.state, node_id, terminal)
    }

    pub fn allocs_by_job(&self, job_id: &str, all: bool) -> Vec<Arc<Allocation>> {
        reads::allocs_by_job(&self.state, job_id, all)
    }

    pub fn allocs_by_eval(&self, eval_id: &str) -> Vec<Arc<Allocation>> {
        reads::allocs_by_eval(&self.state, eval_id)
    }

    pub fn allocs(&self) -> Vec<Arc<Allocation>> {
        reads::allocs(&self.state)
    }

    pub fn job_summary_by_id(&self, job_id: &str) -> Option<Arc<JobSummary>> {
        reads::job_summary_by_id(&self.state, job_id)
    }

    pub fn job_summaries_by_prefix(&self, prefix: &str) -> Vec<Arc<JobSummary>> {
        reads::job_summaries_by_prefix(&self.state, prefix)
    }

    pub fn job_summaries(&self) -> Vec<Arc<JobSummary>> {
        reads::job_summaries(&self.state)
    }

    pub fn index(&self, table: &str) -> Index {
        reads::index(&self.state, table)
    }

    pub fn latest_index(&self) -> Index {
        reads::latest_index(&self.state)
    }

    pub fn indexes(&self) -> Vec<Arc<IndexEntry>> {
        reads::indexes(&self.state)
    }

    /// Reference byte encoding of the snapshot's table contents, built with
    /// `bincode`. A convenience for embedders with no serializer of their
    /// own yet -- not a contract: `Restore` only ever consumes already
    /// decoded records, so the replication layer may use any encoder.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = WireSnapshot::from_state(&self.state);
        bincode::serialize(&wire).map_err(|e| Error::backend("snapshot", "serialize", e))
    }
}

/// The plain-data shape a snapshot encodes to and a restore decodes from.
/// Kept separate from the `types` records so it can evolve independently of
/// the in-memory representation (e.g. dropping the denormalized `Job` Arc
/// in favor of re-resolving it on decode is a choice left to the decoder,
/// not baked into this format).
#[derive(Serialize, Deserialize)]
struct WireSnapshot {
    nodes: Vec<Node>,
    jobs: Vec<Job>,
    evals: Vec<Evaluation>,
    allocs: Vec<Allocation>,
    job_summaries: Vec<JobSummary>,
    indexes: Vec<IndexEntry>,
}

impl WireSnapshot {
    fn from_state(state: &DbState) -> Self {
        WireSnapshot {
            nodes: reads::nodes(state).iter().map(|n| (**n).clone()).collect(),
            jobs: reads::jobs(state).iter().map(|j| (**j).clone()).collect(),
            evals: reads::evals(state).iter().map(|e| (**e).clone()).collect(),
            allocs: reads::allocs(state).iter().map(|a| (**a).clone()).collect(),
            job_summaries: reads::job_summaries(state).iter().map(|s| (**s).clone()).collect(),
            indexes: reads::indexes(state).iter().map(|i| (**i).clone()).collect(),
        }
    }
}

/// A single long write transaction accepting raw records with no
/// derivation and no index-register bookkeeping; the caller is expected to
/// have already derived everything (it's replaying a snapshot, not
/// re-deriving one).
pub struct StateRestore<'db> {
    txn: WriteTxn<'db>,
}

impl<'db> StateRestore<'db> {
    pub(crate) fn new(db: &'db Db) -> Self {
        StateRestore { txn: db.begin_write() }
    }

    pub fn node_restore(&mut self, node: Node) {
        self.txn.state_mut().nodes.insert(Arc::new(node));
        self.txn.touch(TableName::Nodes);
    }

    pub fn job_restore(&mut self, job: Job) {
        self.txn.state_mut().jobs.insert(Arc::new(job));
        self.txn.touch(TableName::Jobs);
    }

    pub fn eval_restore(&mut self, eval: Evaluation) {
        self.txn.state_mut().evals.insert(Arc::new(eval));
        self.txn.touch(TableName::Evals);
    }

    pub fn alloc_restore(&mut self, alloc: Allocation) {
        self.txn.state_mut().allocs.insert(Arc::new(alloc));
        self.txn.touch(TableName::Allocs);
    }

    pub fn job_summary_restore(&mut self, summary: JobSummary) {
        self.txn.state_mut().job_summaries.insert(Arc::new(summary));
        self.txn.touch(TableName::JobSummary);
    }

    pub fn index_restore(&mut self, entry: IndexEntry) {
        self.txn.state_mut().index.set(&entry.key, entry.value);
        self.txn.touch(TableName::Index);
    }

    pub fn commit(self) {
        self.txn.commit();
    }

    pub fn abort(self) {
        self.txn.abort();
    }
}

/// Decodes a [`StateSnapshot::to_bytes`] payload and replays it into a
/// fresh restore. A convenience pairing with the reference encoding above;
/// embedders with their own wire format drive `StateRestore` directly.
pub fn restore_from_bytes(restore: &mut StateRestore<'_>, bytes: &[u8]) -> Result<()> {
    let wire: WireSnapshot =
        bincode::deserialize(bytes).map_err(|e| Error::backend("snapshot", "deserialize", e))?;

    for node in wire.nodes {
        restore.node_restore(node);
    }
    for job in wire.jobs {
        restore.job_restore(job);
    }
    for eval in wire.evals {
        restore.eval_restore(eval);
    }
    for alloc in wire.allocs {
        restore.alloc_restore(alloc);
    }
    for summary in wire.job_summaries {
        restore.job_summary_restore(summary);
    }
    for entry in wire.indexes {
        restore.index_restore(entry);
    }

    Ok(())
}
