//! In-memory run index.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::Mutex;

use crate::{
    error::{OrchestratorError, Result},
    run::{Run, RunSnapshot, RunSummary},
    supervisor::WorkerHandle,
    token::RunToken,
};

/// A registered run together with the worker process it owns.
#[derive(Debug)]
pub struct RunEntry {
    /// Lifecycle record.
    pub run: Run,
    /// Live worker; `None` once the run is terminal.
    pub worker: Option<WorkerHandle>,
}

impl RunEntry {
    /// Entry for a freshly spawned worker.
    pub fn new(run: Run, worker: WorkerHandle) -> Self {
        Self {
            run,
            worker: Some(worker),
        }
    }
}

/// Registry slot, locked per run.
pub type SharedRunEntry = Arc<Mutex<RunEntry>>;

/// In-memory index of every run submitted during the process lifetime.
///
/// Lookups only touch the map shard holding the token; all transitions of a
/// single run are serialized by that run's own mutex, so work on different
/// tokens never waits on each other.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: DashMap<RunToken, SharedRunEntry>,
}

impl RunRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `entry`; fails if `token` is already taken.
    pub fn insert(&self, token: RunToken, entry: RunEntry) -> Result<SharedRunEntry> {
        match self.runs.entry(token) {
            Entry::Occupied(occupied) => {
                Err(OrchestratorError::DuplicateToken(occupied.key().to_string()))
            }
            Entry::Vacant(vacant) => {
                let shared = Arc::new(Mutex::new(entry));
                vacant.insert(Arc::clone(&shared));
                Ok(shared)
            }
        }
    }

    /// Shared handle to a run, or `NotFound`.
    pub fn get(&self, token: &RunToken) -> Result<SharedRunEntry> {
        self.runs
            .get(token)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {token}")))
    }

    /// Applies `mutate` while holding the run's lock and returns its result.
    pub async fn update<F, T>(&self, token: &RunToken, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut RunEntry) -> T,
    {
        let shared = self.get(token)?;
        let mut guard = shared.lock().await;
        Ok(mutate(&mut guard))
    }

    /// Current snapshot of a run.
    pub async fn snapshot(&self, token: &RunToken) -> Result<RunSnapshot> {
        self.update(token, |entry| entry.run.snapshot()).await
    }

    /// Summaries of all runs, oldest submission first.
    pub async fn summaries(&self) -> Vec<RunSummary> {
        // Clone the handles out first so no shard guard is held across await.
        let entries: Vec<SharedRunEntry> = self
            .runs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(entry.lock().await.run.summary());
        }
        summaries.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.token.cmp(&b.token))
        });
        summaries
    }

    /// Number of registered runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// `true` before the first submission.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
