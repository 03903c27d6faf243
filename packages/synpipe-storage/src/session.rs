//! Explicit write session
//!
//! Each worker owns one session. Writes are buffered and become visible to
//! other readers only when `commit` hands the whole buffer to
//! [`ResultStore::apply`] as a single atomic batch.

use std::sync::Arc;

use crate::domain::{ResultRecord, ResultStore, WriteOp};
use crate::Result;

pub struct StoreSession {
    store: Arc<dyn ResultStore>,
    pending: Vec<WriteOp>,
    committed: usize,
}

impl StoreSession {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            pending: Vec::new(),
            committed: 0,
        }
    }

    pub fn insert(&mut self, table: &str, record: ResultRecord) {
        self.pending.push(WriteOp::insert(table, record));
    }

    /// Number of buffered operations
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total records inserted by this session's successful commits
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Apply buffered operations; returns the number of records inserted
    pub fn commit(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let ops = std::mem::take(&mut self.pending);
        let inserted = self.store.apply(ops)?;
        self.committed += inserted;
        Ok(inserted)
    }

    /// Discard buffered operations
    pub fn rollback(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

impl Drop for StoreSession {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                "Discarding {} uncommitted operations on session drop",
                self.pending.len()
            );
        }
    }
}
