//! Record model: the value types the store carries, plus the status
//! enumerations that appear at the domain boundary. None of these are
//! mutated in place -- every update goes through copy-on-write in the
//! façade (see `state_store.rs`), per invariant 3 in the data model.

use std::collections::HashMap;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

/// A log index assigned by the replication layer. Doubles as the table
/// watermark stored in `index[table]` and as `CreateIndex`/`ModifyIndex` on
/// every record.
pub type Index = u64;

// ---------------------------------------------------------------------
// Status enumerations
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Dead,
    Pause,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Dead => "dead",
            JobStatus::Pause => "pause",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalStatus {
    Blocked,
    Pending,
    Complete,
    Failed,
    Cancelled,
}

impl EvalStatus {
    /// Evaluations in `Complete`, `Failed`, or `Cancelled` will never
    /// transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, EvalStatus::Complete | EvalStatus::Failed | EvalStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvalStatus::Blocked => "blocked",
            EvalStatus::Pending => "pending",
            EvalStatus::Complete => "complete",
            EvalStatus::Failed => "failed",
            EvalStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocDesiredStatus {
    Run,
    Pause,
    Stop,
    Evict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocClientStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
}

impl AllocClientStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AllocClientStatus::Complete | AllocClientStatus::Failed | AllocClientStatus::Lost)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Starting,
    Running,
    Complete,
    Failed,
    Lost,
}

// ---------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub status: String,
    pub drain: bool,
    pub create_index: Index,
    pub modify_index: Index,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Scheduler type, the join key for the `type` secondary index.
    pub job_type: String,
    pub status: JobStatus,
    pub tasks: Vec<Task>,
    pub create_index: Index,
    pub modify_index: Index,
    pub job_modify_index: Index,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub job_id: String,
    pub status: EvalStatus,
    pub status_description: String,
    /// Opaque per-task-group failure detail; the core only moves this
    /// value around, it never inspects its shape.
    pub failed_tg_allocs: HashMap<String, serde_json::Value>,
    /// Task type -> number of allocations the scheduler still wants placed.
    pub queued_allocations: HashMap<String, u64>,
    pub create_index: Index,
    pub modify_index: Index,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub state: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub job_id: String,
    pub task: String,
    pub node_id: String,
    pub eval_id: String,
    pub desired_status: AllocDesiredStatus,
    pub client_status: AllocClientStatus,
    pub client_description: String,
    pub task_states: HashMap<String, TaskState>,
    /// Denormalized copy of the Job this allocation was placed against.
    /// `None` only ever appears transiently, inside a single façade call,
    /// before it is backfilled from the currently registered job (invariant
    /// 5 says every stored allocation must carry one if the job still
    /// exists).
    pub job: Option<Arc<Job>>,
    pub create_index: Index,
    pub modify_index: Index,
    pub alloc_modify_index: Index,
}

impl Allocation {
    pub fn client_terminal(&self) -> bool {
        self.client_status.is_terminal()
    }

    /// `TerminalStatus()`: true once the allocation will not run again,
    /// either because the client says so or because the scheduler has
    /// decided to tear it down.
    pub fn terminal(&self) -> bool {
        self.client_terminal()
            || matches!(self.desired_status, AllocDesiredStatus::Stop | AllocDesiredStatus::Evict)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub status: Option<TaskStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub tasks: HashMap<String, TaskSummary>,
    pub create_index: Index,
    pub modify_index: Index,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    pub value: Index,
}
