//! `schedcore` is the in-memory transactional state store behind a
//! job-scheduling control plane: nodes, jobs, evaluations, allocations, and
//! the job summaries derived from them. It is driven by a replicated log --
//! callers supply the log index with every mutation -- and exposes
//! snapshot/restore for the replication layer to rebuild a fresh instance.
//!
//! The store itself never talks to disk, a socket, or a config file: it is
//! a library the replication layer and scheduler embed directly.
//!
//! ## Getting started
//!
//! ```
//! use schedcore::config::StoreConfig;
//! use schedcore::state_store::StateStore;
//! use schedcore::types::{Job, Task, JobStatus};
//!
//! let store = StateStore::new(StoreConfig::default());
//!
//! store.upsert_job(5, Job {
//!     id: "example".into(),
//!     job_type: "service".into(),
//!     status: JobStatus::Pending,
//!     tasks: vec![Task { task_type: "web".into() }],
//!     create_index: 0,
//!     modify_index: 0,
//!     job_modify_index: 0,
//! }).unwrap();
//!
//! let (_watch, job) = store.job_by_id("example");
//! assert_eq!(job.unwrap().status, JobStatus::Pending);
//! ```

pub mod codec;
pub(crate) mod db;
pub(crate) mod derived;
pub mod config;
pub mod error;
pub(crate) mod reads;
pub mod snapshot;
pub mod state_store;
pub mod types;
pub mod watch;
