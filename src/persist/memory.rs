// src/persist/memory.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Store, Transaction};
use crate::errors::StoreError;

/// Number of calls made on a [`MemoryStore`], failed ones included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub inserts: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

struct StoreState<R> {
    committed: Vec<R>,
    /// Rows buffered by open transactions.
    pending: usize,
    calls: StoreCalls,
}

struct Shared<R> {
    state: Mutex<StoreState<R>>,
    fail_inserts: AtomicBool,
    fail_commits: AtomicBool,
}

impl<R> Shared<R> {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState<R>>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn read(&self) -> MutexGuard<'_, StoreState<R>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory transactional store with switchable failures.
pub struct MemoryStore<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        MemoryStore {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState {
                    committed: Vec::new(),
                    pending: 0,
                    calls: StoreCalls::default(),
                }),
                fail_inserts: AtomicBool::new(false),
                fail_commits: AtomicBool::new(false),
            }),
        }
    }
}

impl<R> MemoryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.shared.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.shared.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> StoreCalls {
        self.shared.read().calls
    }

    /// Rows inserted by transactions that are still open.
    pub fn pending_len(&self) -> usize {
        self.shared.read().pending
    }

    pub fn committed_len(&self) -> usize {
        self.shared.read().committed.len()
    }
}

impl<R: Clone> MemoryStore<R> {
    pub fn committed(&self) -> Vec<R> {
        self.shared.read().committed.clone()
    }
}

impl<R: Send + 'static> Store<R> for MemoryStore<R> {
    type Tx = MemoryTransaction<R>;

    fn begin(&self) -> Result<MemoryTransaction<R>, StoreError> {
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            buffer: Vec::new(),
        })
    }
}

/// A [`MemoryStore`] transaction. Its rows stay private until `commit`;
/// dropping it uncommitted discards them.
pub struct MemoryTransaction<R> {
    shared: Arc<Shared<R>>,
    buffer: Vec<R>,
}

impl<R: Send + 'static> Transaction<R> for MemoryTransaction<R> {
    fn insert(&mut self, record: R) -> Result<(), StoreError> {
        let mut state = self.shared.lock()?;
        state.calls.inserts += 1;
        if self.shared.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("insert refused".to_string()));
        }
        state.pending += 1;
        self.buffer.push(record);
        Ok(())
    }

    fn commit(&mut self) -> Result<usize, StoreError> {
        let mut state = self.shared.lock()?;
        state.calls.commits += 1;
        if self.shared.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit failed".to_string()));
        }
        let count = self.buffer.len();
        state.pending = state.pending.saturating_sub(count);
        state.committed.extend(self.buffer.drain(..));
        Ok(count)
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let mut state = self.shared.lock()?;
        state.calls.rollbacks += 1;
        state.pending = state.pending.saturating_sub(self.buffer.len());
        self.buffer.clear();
        Ok(())
    }
}

impl<R> Drop for MemoryTransaction<R> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            let mut state = self.shared.read();
            state.pending = state.pending.saturating_sub(self.buffer.len());
        }
    }
}
