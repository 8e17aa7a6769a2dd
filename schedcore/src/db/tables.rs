//! Per-table storage: a primary `OrdMap` keyed by the encoded record ID plus
//! whatever secondary `OrdMap<_, OrdSet<_>>` indexes that table's queries
//! need. Every mutation follows the same get-clone-mutate-reinsert shape --
//! `imbl`'s maps are persistent, so cloning one is O(1) and cheap structural
//! sharing does the rest (see invariant 3 in the data model).

use std::sync::Arc;

use imbl::{OrdMap, OrdSet};

use crate::codec::{encode_composite, encode_key, prefix_range};
use crate::types::{
    Allocation, EvalStatus, Evaluation, Index, IndexEntry, Job, JobSummary, Node,
};

fn index_insert(index: &mut OrdMap<Vec<u8>, OrdSet<Vec<u8>>>, key: Vec<u8>, id: Vec<u8>) {
    let mut set = index.get(&key).cloned().unwrap_or_default();
    set.insert(id);
    index.insert(key, set);
}

fn index_remove(index: &mut OrdMap<Vec<u8>, OrdSet<Vec<u8>>>, key: &[u8], id: &[u8]) {
    if let Some(mut set) = index.get(key).cloned() {
        set.remove(id);
        if set.is_empty() {
            index.remove(key);
        } else {
            index.insert(key.to_vec(), set);
        }
    }
}

fn lookup(index: &OrdMap<Vec<u8>, OrdSet<Vec<u8>>>, key: &[u8]) -> OrdSet<Vec<u8>> {
    index.get(key).cloned().unwrap_or_default()
}

fn scan_prefix(index: &OrdMap<Vec<u8>, OrdSet<Vec<u8>>>, prefix: &[u8]) -> Vec<Vec<u8>> {
    let (lo, hi) = prefix_range(prefix);
    index
        .range((lo, hi))
        .flat_map(|(_, ids)| ids.iter().cloned())
        .collect()
}

// ---------------------------------------------------------------------
// Nodes: primary index only, plus the leaky `node_prefix` byte-prefix scan.
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct NodeTable {
    by_id: OrdMap<Vec<u8>, Arc<Node>>,
}

impl NodeTable {
    pub fn get(&self, id: &str) -> Option<Arc<Node>> {
        self.by_id.get(id.as_bytes()).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Node>> {
        self.by_id.values().cloned().collect()
    }

    /// `node_prefix`: a raw byte-prefix scan, not limited to whole IDs.
    pub fn by_prefix(&self, prefix: &str) -> Vec<Arc<Node>> {
        let (lo, hi) = prefix_range(prefix.as_bytes());
        self.by_id.range((lo, hi)).map(|(_, v)| v.clone()).collect()
    }

    pub fn insert(&mut self, node: Arc<Node>) {
        self.by_id.insert(encode_key(&node.id), node);
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Node>> {
        self.by_id.remove(id.as_bytes())
    }
}

// ---------------------------------------------------------------------
// Jobs: primary index plus the `type` (scheduler type) secondary index.
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct JobTable {
    by_id: OrdMap<Vec<u8>, Arc<Job>>,
    by_type: OrdMap<Vec<u8>, OrdSet<Vec<u8>>>,
}

impl JobTable {
    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.by_id.get(id.as_bytes()).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Job>> {
        self.by_id.values().cloned().collect()
    }

    pub fn by_prefix(&self, prefix: &str) -> Vec<Arc<Job>> {
        let (lo, hi) = prefix_range(prefix.as_bytes());
        self.by_id.range((lo, hi)).map(|(_, v)| v.clone()).collect()
    }

    pub fn by_type(&self, job_type: &str) -> Vec<Arc<Job>> {
        lookup(&self.by_type, job_type.as_bytes())
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    pub fn insert(&mut self, job: Arc<Job>) {
        let key = encode_key(&job.id);
        if let Some(prev) = self.by_id.get(&key) {
            if prev.job_type != job.job_type {
                index_remove(&mut self.by_type, prev.job_type.as_bytes(), &key);
            }
        }
        index_insert(&mut self.by_type, encode_key(&job.job_type), key.clone());
        self.by_id.insert(key, job);
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Job>> {
        let key = id.as_bytes().to_vec();
        let removed = self.by_id.remove(&key);
        if let Some(job) = &removed {
            index_remove(&mut self.by_type, job.job_type.as_bytes(), &key);
        }
        removed
    }
}

// ---------------------------------------------------------------------
// Evaluations: primary index, composite `job` (JobID, Status) index and the
// leaky `job_prefix` index EvalsByJob scans and then filters.
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct EvalTable {
    by_id: OrdMap<Vec<u8>, Arc<Evaluation>>,
    by_job_status: OrdMap<Vec<u8>, OrdSet<Vec<u8>>>,
    by_job_prefix: OrdMap<Vec<u8>, OrdSet<Vec<u8>>>,
}

impl EvalTable {
    pub fn get(&self, id: &str) -> Option<Arc<Evaluation>> {
        self.by_id.get(id.as_bytes()).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Evaluation>> {
        self.by_id.values().cloned().collect()
    }

    pub fn by_prefix(&self, prefix: &str) -> Vec<Arc<Evaluation>> {
        let (lo, hi) = prefix_range(prefix.as_bytes());
        self.by_id.range((lo, hi)).map(|(_, v)| v.clone()).collect()
    }

    /// `job_prefix`: returns every eval whose JobID bytes share `job_id` as a
    /// prefix, including other jobs whose ID happens to start the same way.
    /// Callers (the `EvalsByJob` operation) must filter on exact `JobID`.
    pub fn by_job_prefix(&self, job_id: &str) -> Vec<Arc<Evaluation>> {
        scan_prefix(&self.by_job_prefix, job_id.as_bytes())
            .into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect()
    }

    /// `job` composite index: exact (JobID, Status) lookup, used to find a
    /// job's outstanding blocked evaluation without a prefix scan.
    pub fn by_job_and_status(&self, job_id: &str, status: EvalStatus) -> Vec<Arc<Evaluation>> {
        let key = encode_composite(&[job_id, status.as_str()]);
        lookup(&self.by_job_status, &key)
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    pub fn insert(&mut self, eval: Arc<Evaluation>) {
        let key = encode_key(&eval.id);
        if let Some(prev) = self.by_id.get(&key) {
            self.remove_from_indexes(prev, &key);
        }
        self.add_to_indexes(&eval, &key);
        self.by_id.insert(key, eval);
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Evaluation>> {
        let key = id.as_bytes().to_vec();
        let removed = self.by_id.remove(&key);
        if let Some(eval) = &removed {
            self.remove_from_indexes(eval, &key);
        }
        removed
    }

    fn add_to_indexes(&mut self, eval: &Evaluation, key: &[u8]) {
        let composite = encode_composite(&[&eval.job_id, eval.status.as_str()]);
        index_insert(&mut self.by_job_status, composite, key.to_vec());
        index_insert(&mut self.by_job_prefix, encode_key(&eval.job_id), key.to_vec());
    }

    fn remove_from_indexes(&mut self, eval: &Evaluation, key: &[u8]) {
        let composite = encode_composite(&[&eval.job_id, eval.status.as_str()]);
        index_remove(&mut self.by_job_status, &composite, key);
        index_remove(&mut self.by_job_prefix, eval.job_id.as_bytes(), key);
    }
}

// ---------------------------------------------------------------------
// Allocations: primary index, exact `job` and `eval` indexes, composite
// `node` (NodeID, terminal) index, and the leaky `node_prefix` index.
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct AllocTable {
    by_id: OrdMap<Vec<u8>, Arc<Allocation>>,
    by_job: OrdMap<Vec<u8>, OrdSet<Vec<u8>>>,
    by_eval: OrdMap<Vec<u8>, OrdSet<Vec<u8>>>,
    by_node_terminal: OrdMap<Vec<u8>, OrdSet<Vec<u8>>>,
    by_node_prefix: OrdMap<Vec<u8>, OrdSet<Vec<u8>>>,
}

fn terminal_tag(terminal: bool) -> &'static str {
    if terminal {
        "1"
    } else {
        "0"
    }
}

impl AllocTable {
    pub fn get(&self, id: &str) -> Option<Arc<Allocation>> {
        self.by_id.get(id.as_bytes()).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Allocation>> {
        self.by_id.values().cloned().collect()
    }

    pub fn by_job(&self, job_id: &str) -> Vec<Arc<Allocation>> {
        lookup(&self.by_job, job_id.as_bytes())
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    pub fn by_eval(&self, eval_id: &str) -> Vec<Arc<Allocation>> {
        lookup(&self.by_eval, eval_id.as_bytes())
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    /// `node_prefix`: a raw byte-prefix scan over node IDs.
    pub fn by_node(&self, node_id: &str) -> Vec<Arc<Allocation>> {
        scan_prefix(&self.by_node_prefix, node_id.as_bytes())
            .into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect()
    }

    /// `node` composite index: exact (NodeID, terminal) lookup.
    pub fn by_node_and_terminal(&self, node_id: &str, terminal: bool) -> Vec<Arc<Allocation>> {
        let key = encode_composite(&[node_id, terminal_tag(terminal)]);
        lookup(&self.by_node_terminal, &key)
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    pub fn insert(&mut self, alloc: Arc<Allocation>) {
        let key = encode_key(&alloc.id);
        if let Some(prev) = self.by_id.get(&key) {
            self.remove_from_indexes(prev, &key);
        }
        self.add_to_indexes(&alloc, &key);
        self.by_id.insert(key, alloc);
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Allocation>> {
        let key = id.as_bytes().to_vec();
        let removed = self.by_id.remove(&key);
        if let Some(alloc) = &removed {
            self.remove_from_indexes(alloc, &key);
        }
        removed
    }

    fn add_to_indexes(&mut self, alloc: &Allocation, key: &[u8]) {
        index_insert(&mut self.by_job, encode_key(&alloc.job_id), key.to_vec());
        index_insert(&mut self.by_eval, encode_key(&alloc.eval_id), key.to_vec());
        let composite = encode_composite(&[&alloc.node_id, terminal_tag(alloc.terminal())]);
        index_insert(&mut self.by_node_terminal, composite, key.to_vec());
        index_insert(&mut self.by_node_prefix, encode_key(&alloc.node_id), key.to_vec());
    }

    fn remove_from_indexes(&mut self, alloc: &Allocation, key: &[u8]) {
        index_remove(&mut self.by_job, alloc.job_id.as_bytes(), key);
        index_remove(&mut self.by_eval, alloc.eval_id.as_bytes(), key);
        let composite = encode_composite(&[&alloc.node_id, terminal_tag(alloc.terminal())]);
        index_remove(&mut self.by_node_terminal, &composite, key);
        index_remove(&mut self.by_node_prefix, alloc.node_id.as_bytes(), key);
    }
}

// ---------------------------------------------------------------------
// Job summaries: primary index only, keyed by JobID.
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct JobSummaryTable {
    by_id: OrdMap<Vec<u8>, Arc<JobSummary>>,
}

impl JobSummaryTable {
    pub fn get(&self, job_id: &str) -> Option<Arc<JobSummary>> {
        self.by_id.get(job_id.as_bytes()).cloned()
    }

    pub fn all(&self) -> Vec<Arc<JobSummary>> {
        self.by_id.values().cloned().collect()
    }

    pub fn by_prefix(&self, prefix: &str) -> Vec<Arc<JobSummary>> {
        let (lo, hi) = prefix_range(prefix.as_bytes());
        self.by_id.range((lo, hi)).map(|(_, v)| v.clone()).collect()
    }

    pub fn insert(&mut self, summary: Arc<JobSummary>) {
        self.by_id.insert(encode_key(&summary.job_id), summary);
    }

    pub fn remove(&mut self, job_id: &str) -> Option<Arc<JobSummary>> {
        self.by_id.remove(job_id.as_bytes())
    }
}

// ---------------------------------------------------------------------
// The index register: table name -> last log index that touched it.
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct IndexTable {
    by_id: OrdMap<Vec<u8>, Arc<IndexEntry>>,
}

impl IndexTable {
    pub fn get(&self, table: &str) -> Index {
        self.by_id.get(table.as_bytes()).map(|e| e.value).unwrap_or(0)
    }

    pub fn set(&mut self, table: &str, value: Index) {
        self.by_id.insert(
            encode_key(table),
            Arc::new(IndexEntry { key: table.to_string(), value }),
        );
    }

    pub fn remove(&mut self, table: &str) {
        self.by_id.remove(table.as_bytes());
    }

    /// The highest watermark across every table, used as the snapshot index.
    pub fn latest(&self) -> Index {
        self.by_id.values().map(|e| e.value).max().unwrap_or(0)
    }

    pub fn all(&self) -> Vec<Arc<IndexEntry>> {
        self.by_id.values().cloned().collect()
    }
}
