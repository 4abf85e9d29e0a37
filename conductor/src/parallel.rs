//! Shared run state for concurrent attempts and a bounded worker pool.
//!
//! Workers are scoped threads; they borrow the orchestrator's collaborators
//! and never outlive a batch.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use tracing::debug;

/// Global, monotonically increasing step counter.
///
/// Every agent-backed attempt takes its step number from here, so steps are
/// unique across workers.
#[derive(Debug, Default)]
pub struct StepCounter(AtomicU64);

impl StepCounter {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Advance and return the new step.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Ids of tasks currently dispatched to a worker.
#[derive(Debug, Default)]
pub struct ActiveTasks(Mutex<BTreeSet<String>>);

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`; false when it is already in flight.
    pub fn try_claim(&self, id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string())
    }

    pub fn release(&self, id: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs a batch of jobs on at most `workers` threads.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `job` to every item and return the results in input order.
    ///
    /// A batch of one runs on the calling thread.
    pub fn run<T, R, F>(&self, items: Vec<T>, job: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        if items.len() <= 1 || self.workers == 1 {
            return items.into_iter().map(job).collect();
        }
        let total = items.len();
        let queue: Mutex<VecDeque<(usize, T)>> =
            Mutex::new(items.into_iter().enumerate().collect());
        let results: Mutex<Vec<(usize, R)>> = Mutex::new(Vec::with_capacity(total));
        let threads = self.workers.min(total);
        debug!(threads, total, "dispatching batch");

        thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    loop {
                        let next = queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some((idx, item)) = next else {
                            break;
                        };
                        let result = job(item);
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((idx, result));
                    }
                });
            }
        });

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, result)| result).collect()
    }
}
