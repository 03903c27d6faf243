//! SQLite adapter for ResultStore
//!
//! One SQL table per logical result table:
//! `(job_id REAL PRIMARY KEY, payload TEXT NOT NULL, created_at INTEGER NOT NULL)`,
//! with `created_at` in milliseconds since the epoch.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::domain::{validate_table_name, JobId, ResultRecord, ResultStore, WriteOp};
use crate::error::StorageError;
use crate::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite-based ResultStore implementation
pub struct SqliteResultStore {
    conn: Mutex<Connection>,
}

impl SqliteResultStore {
    /// Open (or create) a database file
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn table_exists_on(conn: &Connection, name: &str) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn require_table(conn: &Connection, name: &str) -> Result<()> {
        validate_table_name(name)?;
        if Self::table_exists_on(conn, name)? {
            Ok(())
        } else {
            Err(StorageError::table_not_found(name))
        }
    }
}

fn timestamp_from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::serialization(format!("Invalid timestamp: {}", ms)))
}

impl ResultStore for SqliteResultStore {
    fn create_table(&self, name: &str) -> Result<()> {
        validate_table_name(name)?;
        let conn = self.conn.lock();
        if Self::table_exists_on(&conn, name)? {
            return Err(StorageError::table_exists(name));
        }
        conn.execute(
            &format!(
                "CREATE TABLE \"{}\" (
                    job_id REAL PRIMARY KEY,
                    payload TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )",
                name
            ),
            [],
        )?;
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        Self::require_table(&conn, name)?;
        conn.execute(&format!("DROP TABLE \"{}\"", name), [])?;
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        validate_table_name(name)?;
        let conn = self.conn.lock();
        Self::table_exists_on(&conn, name)
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn finished_jobs(&self, table: &str) -> Result<BTreeMap<JobId, DateTime<Utc>>> {
        let conn = self.conn.lock();
        Self::require_table(&conn, table)?;

        let mut stmt = conn.prepare(&format!("SELECT job_id, created_at FROM \"{}\"", table))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, ms)| Ok((JobId::new(id)?, timestamp_from_millis(ms)?)))
            .collect()
    }

    fn get_record(&self, table: &str, job_id: JobId) -> Result<Option<ResultRecord>> {
        let conn = self.conn.lock();
        Self::require_table(&conn, table)?;

        let row = conn
            .query_row(
                &format!(
                    "SELECT payload, created_at FROM \"{}\" WHERE job_id = ?1",
                    table
                ),
                params![job_id.value()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((payload, ms)) => Ok(Some(ResultRecord {
                job_id,
                payload: serde_json::from_str(&payload)?,
                created_at: timestamp_from_millis(ms)?,
            })),
            None => Ok(None),
        }
    }

    fn delete_jobs(&self, table: &str, job_ids: &[JobId]) -> Result<usize> {
        let mut conn = self.conn.lock();
        Self::require_table(&conn, table)?;

        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM \"{}\" WHERE job_id = ?1", table))?;
            for id in job_ids {
                removed += stmt.execute(params![id.value()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<usize> {
        if ops.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Dropping `tx` on any error below rolls the whole batch back
        let mut inserted = 0;
        for op in &ops {
            Self::require_table(&tx, op.table())?;
            match op {
                WriteOp::Insert { table, record } => {
                    let payload = serde_json::to_string(&record.payload)?;
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO \"{}\" (job_id, payload, created_at)
                             VALUES (?1, ?2, ?3)",
                            table
                        ),
                        params![
                            record.job_id.value(),
                            payload,
                            record.created_at.timestamp_millis()
                        ],
                    )?;
                    inserted += 1;
                }
            }
        }

        tx.commit()
            .map_err(|e| StorageError::transaction(format!("COMMIT failed: {}", e)).with_source(e))?;
        Ok(inserted)
    }

    fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM; ANALYZE;")?;
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
    fn test_table_lifecycle() {
        let store = SqliteResultStore::in_memory().unwrap();
        assert!(!store.table_exists("pulse_response").unwrap());

        store.create_table("pulse_response").unwrap();
        assert!(store.table_exists("pulse_response").unwrap());
        assert_eq!(store.list_tables().unwrap(), vec!["pulse_response"]);

        let err = store.create_table("pulse_response").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TableExists);

        store.drop_table("pulse_response").unwrap();
        let err = store.drop_table("pulse_response").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TableNotFound);
    }

    #[test]
    fn test_apply_roundtrip() {
        let store = SqliteResultStore::in_memory().unwrap();
        store.create_table("dynamics").unwrap();

        let job = JobId::new(1521667891.153).unwrap();
        let rec = ResultRecord::new(job, json!({"pulses": [1, 2, 3]}));
        let n = store.apply(vec![WriteOp::insert("dynamics", rec.clone())]).unwrap();
        assert_eq!(n, 1);

        let loaded = store.get_record("dynamics", job).unwrap().unwrap();
        assert_eq!(loaded.job_id, job);
        assert_eq!(loaded.payload, rec.payload);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            rec.created_at.timestamp_millis()
        );

        assert!(store.get_record("dynamics", JobId::from(1)).unwrap().is_none());
    }

    #[test]
    fn test_apply_rolls_back_on_missing_table() {
        let store = SqliteResultStore::in_memory().unwrap();
        store.create_table("dynamics").unwrap();

        let result = store.apply(vec![
            WriteOp::insert("dynamics", record(1)),
            WriteOp::insert("absent", record(2)),
        ]);
        assert!(result.is_err());
        assert!(store.finished_jobs("dynamics").unwrap().is_empty());
    }

    #[test]
    fn test_delete_jobs() {
        let store = SqliteResultStore::in_memory().unwrap();
        store.create_table("dynamics").unwrap();
        store
            .apply((1..=10).map(|i| WriteOp::insert("dynamics", record(i))).collect())
            .unwrap();

        let removed = store
            .delete_jobs("dynamics", &[JobId::from(5), JobId::from(7)])
            .unwrap();
        assert_eq!(removed, 2);

        let finished = store.finished_jobs("dynamics").unwrap();
        assert_eq!(finished.len(), 8);
        assert!(!finished.contains_key(&JobId::from(5)));
        assert!(!finished.contains_key(&JobId::from(7)));
        assert!(finished.contains_key(&JobId::from(6)));
    }

    #[test]
    fn test_finished_jobs_requires_table() {
        let store = SqliteResultStore::in_memory().unwrap();
        let err = store.finished_jobs("nothing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TableNotFound);
    }

    #[test]
    fn test_vacuum() {
        let store = SqliteResultStore::in_memory().unwrap();
        store.create_table("dynamics").unwrap();
        store.vacuum().unwrap();
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.sqlite");

        {
            let store = SqliteResultStore::open(&path).unwrap();
            store.create_table("slice").unwrap();
            store.apply(vec![WriteOp::insert("slice", record(3))]).unwrap();
        }

        let store = SqliteResultStore::open(&path).unwrap();
        let finished = store.finished_jobs("slice").unwrap();
        assert!(finished.contains_key(&JobId::from(3)));
    }
}
