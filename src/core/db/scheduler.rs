/// Async Query Scheduler Module
///
/// Queries are tagged with a `u64` key. Queries sharing a key run one at a
/// time in enqueue order; queries under different keys run concurrently on
/// the worker threads, one worker per pooled connection.
///
/// ## Per-key lifecycle
///
/// - **Idle**: the key has no entry in the map.
/// - **Dispatching**: the key has queued work and sits in the ready list.
/// - **Awaiting**: a worker took the head query and is running it.
///
/// When a query finishes, its result and callback are appended to the
/// completion queue first, then the key goes back to Dispatching if more work
/// is queued or its entry is removed. A key is in the ready list at most once
/// and never while a query for it is in flight, which is what serializes
/// same-key execution.
use crate::core::db::pool::ConnectionPool;
use crate::core::db::record::Mode;
use crate::core::db::recordset::Recordset;
use crate::core::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Callback for an async read; `None` means the query failed.
pub type RecordsetCallback = Box<dyn FnOnce(Option<Recordset>) + Send + 'static>;

/// Callback for an async write; `false` means the statement failed.
pub type BoolCallback = Box<dyn FnOnce(bool) + Send + 'static>;

pub enum QueryKind {
    Read { mode: Mode, callback: RecordsetCallback },
    Write { callback: BoolCallback },
}

struct PendingQuery {
    key: u64,
    sql: String,
    kind: QueryKind,
    sequence: u64,
}

enum Outcome {
    Records(Option<Recordset>, RecordsetCallback),
    Executed(bool, BoolCallback),
}

/// A finished query waiting for its callback to be delivered.
struct Completion {
    key: u64,
    sequence: u64,
    outcome: Outcome,
}

impl Completion {
    fn deliver(self) {
        debug!(key = self.key, sequence = self.sequence, "delivering completion");
        match self.outcome {
            Outcome::Records(records, callback) => callback(records),
            Outcome::Executed(ok, callback) => callback(ok),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPhase {
    Dispatching,
    Awaiting,
}

struct KeyQueue {
    pending: VecDeque<PendingQuery>,
    phase: KeyPhase,
}

#[derive(Default)]
struct SchedulerState {
    keys: HashMap<u64, KeyQueue>,
    /// Keys in the Dispatching phase, oldest first.
    ready: VecDeque<u64>,
    next_sequence: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    work_ready: Condvar,
    completions: Mutex<Vec<Completion>>,
    pool: Arc<ConnectionPool>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn completions(&self) -> MutexGuard<'_, Vec<Completion>> {
        self.completions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until a key is ready and moves its head query in flight.
    /// Returns `None` on shutdown.
    fn next_job(&self) -> Option<PendingQuery> {
        let mut guard = self.state();
        loop {
            if guard.shutdown {
                return None;
            }
            let state = &mut *guard;
            if let Some(key) = state.ready.pop_front() {
                let queue = state.keys.get_mut(&key);
                debug_assert!(
                    queue.as_ref().map_or(false, |q| q.phase == KeyPhase::Dispatching),
                    "ready key {} is not dispatching",
                    key
                );
                if let Some(job) = queue.and_then(|q| {
                    q.phase = KeyPhase::Awaiting;
                    q.pending.pop_front()
                }) {
                    return Some(job);
                }
                continue;
            }
            guard = self
                .work_ready
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn run(&self, job: PendingQuery) -> Completion {
        let PendingQuery {
            key,
            sql,
            kind,
            sequence,
        } = job;
        debug!(key, sequence, sql = %sql, "running async query");

        let outcome = match kind {
            QueryKind::Read { mode, callback } => {
                let result = self.pool.acquire().and_then(|mut conn| {
                    let result = conn.query(&sql, mode);
                    conn.observe(&result);
                    result
                });
                match result {
                    Ok(records) => Outcome::Records(Some(records), callback),
                    Err(e) => {
                        error!(key, sequence, "async query failed: {}", e);
                        Outcome::Records(None, callback)
                    }
                }
            }
            QueryKind::Write { callback } => {
                let result = self.pool.acquire().and_then(|mut conn| {
                    let result = conn.execute(&sql);
                    conn.observe(&result);
                    result
                });
                match result {
                    Ok(_) => Outcome::Executed(true, callback),
                    Err(e) => {
                        error!(key, sequence, "async statement failed: {}", e);
                        Outcome::Executed(false, callback)
                    }
                }
            }
        };

        Completion {
            key,
            sequence,
            outcome,
        }
    }

    /// Queues the completion, then releases the key for its next query.
    fn complete(&self, completion: Completion) {
        let key = completion.key;
        self.completions().push(completion);

        let mut guard = self.state();
        let state = &mut *guard;
        let requeue = match state.keys.get_mut(&key) {
            Some(queue) if !queue.pending.is_empty() => {
                queue.phase = KeyPhase::Dispatching;
                true
            }
            _ => false,
        };
        if requeue {
            state.ready.push_back(key);
            drop(guard);
            self.work_ready.notify_one();
        } else {
            state.keys.remove(&key);
        }
    }
}

pub struct AsyncScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl AsyncScheduler {
    /// Spawns `workers` threads executing queries on `pool`.
    pub fn start(pool: Arc<ConnectionPool>, workers: usize) -> Result<Self> {
        let mut scheduler = AsyncScheduler {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                work_ready: Condvar::new(),
                completions: Mutex::new(Vec::new()),
                pool,
            }),
            workers: Vec::with_capacity(workers),
        };

        for i in 0..workers {
            let shared = Arc::clone(&scheduler.shared);
            let handle = thread::Builder::new()
                .name(format!("gamedb-async-{}", i))
                .spawn(move || {
                    while let Some(job) = shared.next_job() {
                        let completion = shared.run(job);
                        shared.complete(completion);
                    }
                })?;
            scheduler.workers.push(handle);
        }
        info!("Async scheduler started with {} workers", workers);
        Ok(scheduler)
    }

    /// Queues `sql` behind every earlier query with the same key.
    pub fn enqueue(&self, key: u64, sql: impl Into<String>, kind: QueryKind) {
        let mut guard = self.shared.state();
        if guard.shutdown {
            warn!(key, "scheduler is shut down, dropping query");
            return;
        }
        let state = &mut *guard;
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let ready = &mut state.ready;
        let queue = state.keys.entry(key).or_insert_with(|| {
            ready.push_back(key);
            KeyQueue {
                pending: VecDeque::new(),
                phase: KeyPhase::Dispatching,
            }
        });
        queue.pending.push_back(PendingQuery {
            key,
            sql: sql.into(),
            kind,
            sequence,
        });
        debug!(key, sequence, queued = queue.pending.len(), "enqueued async query");
        drop(guard);
        self.shared.work_ready.notify_one();
    }

    /// Delivers every completion queued at the time of the call, in
    /// completion order, on the calling thread. Returns how many fired.
    pub fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.shared.completions());
        let delivered = batch.len();
        for completion in batch {
            completion.deliver();
        }
        delivered
    }

    /// Queries queued or in flight.
    pub fn pending(&self) -> usize {
        self.shared
            .state()
            .keys
            .values()
            .map(|q| q.pending.len() + usize::from(q.phase == KeyPhase::Awaiting))
            .sum()
    }

    /// Completions waiting for `flush`.
    pub fn completed(&self) -> usize {
        self.shared.completions().len()
    }

    /// Stops the workers after their current query and drops all queued work
    /// and undelivered completions without invoking their callbacks.
    pub fn shutdown(&mut self) {
        self.shared.state().shutdown = true;
        self.shared.work_ready.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("async worker panicked");
            }
        }

        let dropped_queued: usize = {
            let mut state = self.shared.state();
            let n = state.keys.values().map(|q| q.pending.len()).sum();
            state.keys.clear();
            state.ready.clear();
            n
        };
        let dropped_completed = std::mem::take(&mut *self.shared.completions()).len();
        if dropped_queued + dropped_completed > 0 {
            warn!(
                "Async scheduler shut down, dropped {} queued and {} completed queries",
                dropped_queued, dropped_completed
            );
        }
    }
}

impl Drop for AsyncScheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}
