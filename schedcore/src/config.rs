//! The handful of knobs the core itself owns. Loading these from a file or
//! the environment is the embedder's job -- this struct is just a plain
//! value the embedder constructs and passes in.

/// Construction-time configuration for a [`crate::state_store::StateStore`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Hint for how many rows each table is expected to hold initially.
    /// Purely an allocation hint; the tables grow unbounded regardless.
    pub table_capacity_hint: usize,

    /// When restoring a snapshot, whether to run
    /// [`StateStore::reconcile_job_summaries`](crate::state_store::StateStore::reconcile_job_summaries)
    /// once at the end instead of trusting the summaries carried in the
    /// snapshot. Off by default since a well-formed snapshot already
    /// satisfies `Summary-coverage`.
    pub reconcile_summaries_on_restore: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { table_capacity_hint: 0, reconcile_summaries_on_restore: false }
    }
}
