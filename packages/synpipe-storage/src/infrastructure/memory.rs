//! In-memory result store

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::{validate_table_name, JobId, ResultRecord, ResultStore, WriteOp};
use crate::error::StorageError;
use crate::Result;

type Table = BTreeMap<JobId, ResultRecord>;

/// Mutex-guarded tables; `apply` validates the whole batch before mutating
#[derive(Default)]
pub struct InMemoryResultStore {
    tables: Mutex<HashMap<String, Table>>,
    vacuum_count: AtomicUsize,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `vacuum` has been called
    pub fn vacuum_count(&self) -> usize {
        self.vacuum_count.load(Ordering::SeqCst)
    }

    /// Total records across all tables
    pub fn record_count(&self) -> usize {
        self.tables.lock().values().map(BTreeMap::len).sum()
    }
}

impl ResultStore for InMemoryResultStore {
    fn create_table(&self, name: &str) -> Result<()> {
        validate_table_name(name)?;
        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(StorageError::table_exists(name));
        }
        tables.insert(name.to_string(), Table::new());
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        validate_table_name(name)?;
        self.tables
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::table_not_found(name))
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.lock().contains_key(name))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn finished_jobs(&self, table: &str) -> Result<BTreeMap<JobId, DateTime<Utc>>> {
        let tables = self.tables.lock();
        let records = tables
            .get(table)
            .ok_or_else(|| StorageError::table_not_found(table))?;
        Ok(records
            .values()
            .map(|rec| (rec.job_id, rec.created_at))
            .collect())
    }

    fn get_record(&self, table: &str, job_id: JobId) -> Result<Option<ResultRecord>> {
        let tables = self.tables.lock();
        let records = tables
            .get(table)
            .ok_or_else(|| StorageError::table_not_found(table))?;
        Ok(records.get(&job_id).cloned())
    }

    fn delete_jobs(&self, table: &str, job_ids: &[JobId]) -> Result<usize> {
        let mut tables = self.tables.lock();
        let records = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::table_not_found(table))?;
        Ok(job_ids
            .iter()
            .filter(|id| records.remove(*id).is_some())
            .count())
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<usize> {
        let mut tables = self.tables.lock();

        // Validate first so a failing batch leaves no trace
        for op in &ops {
            if !tables.contains_key(op.table()) {
                return Err(StorageError::table_not_found(op.table()));
            }
        }

        let mut inserted = 0;
        for op in ops {
            match op {
                WriteOp::Insert { table, record } => {
                    if let Some(records) = tables.get_mut(&table) {
                        records.insert(record.job_id, record);
                        inserted += 1;
                    }
                }
            }
        }
        Ok(inserted)
    }

    fn vacuum(&self) -> Result<()> {
        self.vacuum_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn record(id: u32) -> ResultRecord {
        ResultRecord::new(JobId::from(id), json!({ "id": id }))
    }

    #[test]
    fn test_create_and_drop_table() {
        let store = InMemoryResultStore::new();
        store.create_table("slice").unwrap();
        assert!(store.table_exists("slice").unwrap());

        let err = store.create_table("slice").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TableExists);

        store.drop_table("slice").unwrap();
        assert!(!store.table_exists("slice").unwrap());

        let err = store.drop_table("slice").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TableNotFound);
    }

    #[test]
    fn test_rejects_invalid_names() {
        let store = InMemoryResultStore::new();
        let err = store.create_table("bad name").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTableName);
    }

    #[test]
    fn test_apply_and_finished_jobs() {
        let store = InMemoryResultStore::new();
        store.create_table("slice").unwrap();

        let n = store
            .apply(vec![
                WriteOp::insert("slice", record(3)),
                WriteOp::insert("slice", record(1)),
            ])
            .unwrap();
        assert_eq!(n, 2);

        let finished: Vec<JobId> = store.finished_jobs("slice").unwrap().into_keys().collect();
        assert_eq!(finished, vec![JobId::from(1), JobId::from(3)]);
        assert_eq!(store.record_count(), 2);
    }

    #[test]
    fn test_apply_is_atomic() {
        let store = InMemoryResultStore::new();
        store.create_table("slice").unwrap();

        let result = store.apply(vec![
            WriteOp::insert("slice", record(1)),
            WriteOp::insert("nope", record(2)),
        ]);
        assert!(result.is_err());
        assert!(store.finished_jobs("slice").unwrap().is_empty());
    }

    #[test]
    fn test_delete_jobs_targets_exact_ids() {
        let store = InMemoryResultStore::new();
        store.create_table("slice").unwrap();
        store
            .apply((1..=8).map(|i| WriteOp::insert("slice", record(i))).collect())
            .unwrap();

        let removed = store
            .delete_jobs("slice", &[JobId::from(5), JobId::from(7), JobId::from(42)])
            .unwrap();
        assert_eq!(removed, 2);

        let left: Vec<JobId> = store.finished_jobs("slice").unwrap().into_keys().collect();
        assert_eq!(left.len(), 6);
        assert!(!left.contains(&JobId::from(5)));
        assert!(!left.contains(&JobId::from(7)));
    }

    #[test]
    fn test_insert_replaces_existing_record() {
        let store = InMemoryResultStore::new();
        store.create_table("slice").unwrap();
        store.apply(vec![WriteOp::insert("slice", record(1))]).unwrap();
        store
            .apply(vec![WriteOp::insert(
                "slice",
                ResultRecord::new(JobId::from(1), json!("second")),
            )])
            .unwrap();

        let rec = store.get_record("slice", JobId::from(1)).unwrap().unwrap();
        assert_eq!(rec.payload, json!("second"));
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn test_vacuum_counts() {
        let store = InMemoryResultStore::new();
        store.vacuum().unwrap();
        store.vacuum().unwrap();
        assert_eq!(store.vacuum_count(), 2);
    }
}
