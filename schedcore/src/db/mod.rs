//! The transactional core: one `RwLock<Arc<DbState>>` published state plus a
//! single writer mutex serializing commits (one writer, many lock-free
//! readers over an immutable snapshot). Readers never block a writer and
//! never block each other; writers never block readers, only other writers.

pub(crate) mod tables;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::watch;

use crate::watch::{TableWatch, WatchChannel};
use tables::{AllocTable, EvalTable, IndexTable, JobSummaryTable, JobTable, NodeTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TableName {
    Nodes,
    Jobs,
    Evals,
    Allocs,
    JobSummary,
    Index,
}

impl TableName {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TableName::Nodes => "nodes",
            TableName::Jobs => "jobs",
            TableName::Evals => "evals",
            TableName::Allocs => "allocs",
            TableName::JobSummary => "job_summary",
            TableName::Index => "index",
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct DbState {
    pub nodes: NodeTable,
    pub jobs: JobTable,
    pub evals: EvalTable,
    pub allocs: AllocTable,
    pub job_summaries: JobSummaryTable,
    pub index: IndexTable,
}

struct Watchers {
    nodes: TableWatch,
    jobs: TableWatch,
    evals: TableWatch,
    allocs: TableWatch,
    job_summaries: TableWatch,
    index: TableWatch,
}

impl Watchers {
    fn new() -> Self {
        Watchers {
            nodes: TableWatch::new(),
            jobs: TableWatch::new(),
            evals: TableWatch::new(),
            allocs: TableWatch::new(),
            job_summaries: TableWatch::new(),
            index: TableWatch::new(),
        }
    }

    fn get(&self, table: TableName) -> &TableWatch {
        match table {
            TableName::Nodes => &self.nodes,
            TableName::Jobs => &self.jobs,
            TableName::Evals => &self.evals,
            TableName::Allocs => &self.allocs,
            TableName::JobSummary => &self.job_summaries,
            TableName::Index => &self.index,
        }
    }

    /// Captures every table's current generation in one call, so a reader
    /// can pin watch baselines to the same instant it observes `DbState`.
    fn snapshot_generations(&self) -> Generations {
        Generations {
            nodes: self.nodes.generation(),
            jobs: self.jobs.generation(),
            evals: self.evals.generation(),
            allocs: self.allocs.generation(),
            job_summaries: self.job_summaries.generation(),
            index: self.index.generation(),
        }
    }
}

/// Per-table generation baselines captured alongside a `DbState` read.
struct Generations {
    nodes: u64,
    jobs: u64,
    evals: u64,
    allocs: u64,
    job_summaries: u64,
    index: u64,
}

impl Generations {
    fn get(&self, table: TableName) -> u64 {
        match table {
            TableName::Nodes => self.nodes,
            TableName::Jobs => self.jobs,
            TableName::Evals => self.evals,
            TableName::Allocs => self.allocs,
            TableName::JobSummary => self.job_summaries,
            TableName::Index => self.index,
        }
    }
}

/// One-shot notification that the store has been superseded by a restore,
/// `abandon()` panics if called twice -- a programmer error, not a
/// recoverable fault, matching the categorical error design's third kind.
pub(crate) struct AbandonHandle {
    tx: watch::Sender<bool>,
    fired: AtomicBool,
}

impl AbandonHandle {
    fn new() -> Self {
        AbandonHandle { tx: watch::Sender::new(false), fired: AtomicBool::new(false) }
    }

    pub(crate) fn abandon(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            panic!("AbandonHandle::abandon called more than once");
        }
        let _ = self.tx.send(true);
    }

    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

pub(crate) struct Db {
    state: RwLock<Arc<DbState>>,
    write_lock: Mutex<()>,
    watchers: Arc<Watchers>,
    abandon: AbandonHandle,
}

impl Db {
    pub(crate) fn new() -> Self {
        Db {
            state: RwLock::new(Arc::new(DbState::default())),
            write_lock: Mutex::new(()),
            watchers: Arc::new(Watchers::new()),
            abandon: AbandonHandle::new(),
        }
    }

    pub(crate) fn begin_read(&self) -> ReadTxn {
        // The state clone and the generation snapshot must happen under the
        // same read guard: capturing generations later (e.g. lazily inside
        // `ReadTxn::watch`) could observe a commit's bump without its
        // matching state swap, leaving a reader's baseline already past the
        // generation its frozen `DbState` corresponds to -- it would then
        // never be signalled for a change it hasn't actually seen yet.
        let guard = self.state.read().expect("db state lock poisoned");
        let state = guard.clone();
        let generations = self.watchers.snapshot_generations();
        drop(guard);
        ReadTxn { state, watchers: self.watchers.clone(), generations }
    }

    pub(crate) fn begin_write(&self) -> WriteTxn<'_> {
        let guard = self.write_lock.lock().expect("db write lock poisoned");
        let working = (*self.state.read().expect("db state lock poisoned")).clone();
        WriteTxn { db: self, _write_guard: guard, working, touched: HashSet::new() }
    }

    pub(crate) fn abandon_handle(&self) -> &AbandonHandle {
        &self.abandon
    }
}

/// A read-only view over one immutable `DbState`: once begun, later writes
/// are invisible to it.
pub(crate) struct ReadTxn {
    state: Arc<DbState>,
    watchers: Arc<Watchers>,
    generations: Generations,
}

impl ReadTxn {
    pub(crate) fn state(&self) -> &DbState {
        &self.state
    }

    pub(crate) fn watch(&self, table: TableName) -> WatchChannel {
        self.watchers.get(table).watch_from(self.generations.get(table))
    }

    pub(crate) fn into_state(self) -> Arc<DbState> {
        self.state
    }
}

/// A single in-flight write. Holds the writer mutex for its whole lifetime,
/// so at most one `WriteTxn` can exist at a time -- the "single active write
/// transaction" invariant. Dropping it without calling [`WriteTxn::commit`]
/// discards every change it made.
pub(crate) struct WriteTxn<'db> {
    db: &'db Db,
    #[allow(dead_code)]
    _write_guard: MutexGuard<'db, ()>,
    working: DbState,
    touched: HashSet<TableName>,
}

impl<'db> WriteTxn<'db> {
    pub(crate) fn state(&self) -> &DbState {
        &self.working
    }

    pub(crate) fn state_mut(&mut self) -> &mut DbState {
        &mut self.working
    }

    pub(crate) fn touch(&mut self, table: TableName) {
        self.touched.insert(table);
    }

    pub(crate) fn touched(&self, table: TableName) -> bool {
        self.touched.contains(&table)
    }

    /// Publishes the working state and bumps the generation of every table
    /// touched during this transaction, signalling outstanding watches.
    pub(crate) fn commit(self) {
        log::debug!("committing write transaction, tables touched: {:?}", self.touched.len());
        let WriteTxn { db, working, touched, .. } = self;
        {
            let mut guard = db.state.write().expect("db state lock poisoned");
            *guard = Arc::new(working);
        }
        for table in touched {
            db.watchers.get(table).bump();
        }
    }

    pub(crate) fn abort(self) {
        log::debug!("aborting write transaction");
    }
}
