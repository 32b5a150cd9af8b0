//! In-memory [`RateStore`] with the same transactional semantics as MySQL.
//!
//! Writes are staged per transaction and only become visible on commit.
//! Failures can be injected for the connection, the commit, or individual
//! timestamps, and open connections are counted so tests can check that
//! every path releases its connection.

use super::{DbError, DbResult, RateStore, RateTransaction, UpsertOutcome};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use dolar_common::ExchangeRateRecord;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<NaiveDateTime, f64>,
    fail_begin: bool,
    fail_commit: bool,
    failing_timestamps: HashSet<NaiveDateTime>,
    connections_opened: usize,
    connections_open: usize,
    commits: usize,
    rollbacks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRateStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Committed rows ordered by timestamp.
    pub fn rows(&self) -> Vec<ExchangeRateRecord> {
        self.lock()
            .rows
            .iter()
            .map(|(observed_at, value)| ExchangeRateRecord::new(*observed_at, *value))
            .collect()
    }

    pub fn value_at(&self, observed_at: NaiveDateTime) -> Option<f64> {
        self.lock().rows.get(&observed_at).copied()
    }

    pub fn seed(&self, record: ExchangeRateRecord) {
        self.lock().rows.insert(record.observed_at, record.value);
    }

    pub fn fail_begin(&self) {
        self.lock().fail_begin = true;
    }

    pub fn fail_commit(&self) {
        self.lock().fail_commit = true;
    }

    pub fn fail_upsert_at(&self, observed_at: NaiveDateTime) {
        self.lock().failing_timestamps.insert(observed_at);
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    pub fn connections_open(&self) -> usize {
        self.lock().connections_open
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }
}

#[async_trait]
impl RateStore for InMemoryRateStore {
    async fn begin(&self) -> DbResult<Box<dyn RateTransaction>> {
        let mut inner = self.lock();
        if inner.fail_begin {
            return Err(DbError::backend("connection refused"));
        }
        inner.connections_opened += 1;
        inner.connections_open += 1;

        Ok(Box::new(InMemoryRateTransaction {
            inner: Arc::clone(&self.inner),
            staged: BTreeMap::new(),
            finished: false,
        }))
    }
}

struct InMemoryRateTransaction {
    inner: Arc<Mutex<Inner>>,
    staged: BTreeMap<NaiveDateTime, f64>,
    finished: bool,
}

impl InMemoryRateTransaction {
    fn finish(&mut self, inner: &mut Inner) {
        if !self.finished {
            self.finished = true;
            inner.connections_open = inner.connections_open.saturating_sub(1);
        }
    }
}

#[async_trait]
impl RateTransaction for InMemoryRateTransaction {
    async fn upsert(&mut self, record: &ExchangeRateRecord) -> DbResult<UpsertOutcome> {
        let current = {
            let inner = lock(&self.inner);
            if inner.failing_timestamps.contains(&record.observed_at) {
                return Err(DbError::backend(format!(
                    "write rejected for {}",
                    record.observed_at
                )));
            }
            self.staged
                .get(&record.observed_at)
                .or_else(|| inner.rows.get(&record.observed_at))
                .copied()
        };

        self.staged.insert(record.observed_at, record.value);

        Ok(match current {
            None => UpsertOutcome::Inserted,
            Some(value) if value == record.value => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
        })
    }

    async fn commit(mut self: Box<Self>) -> DbResult<()> {
        let inner_arc = Arc::clone(&self.inner);
        let mut inner = lock(&inner_arc);
        self.finish(&mut inner);

        if inner.fail_commit {
            inner.rollbacks += 1;
            return Err(DbError::backend("commit failed"));
        }

        let staged = std::mem::take(&mut self.staged);
        inner.rows.extend(staged);
        inner.commits += 1;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DbResult<()> {
        let inner_arc = Arc::clone(&self.inner);
        let mut inner = lock(&inner_arc);
        self.finish(&mut inner);
        inner.rollbacks += 1;
        Ok(())
    }
}

impl Drop for InMemoryRateTransaction {
    fn drop(&mut self) {
        if !self.finished {
            let inner_arc = Arc::clone(&self.inner);
            let mut inner = lock(&inner_arc);
            self.finish(&mut inner);
            inner.rollbacks += 1;
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
