//! Domain layer for the result store
//!
//! # Domain Models
//!
//! - `JobId`: experiment identifier shared by every module (acquisition timestamp)
//! - `ResultRecord`: one module's persisted output for one job
//! - `WriteOp`: a buffered mutation, applied in atomic batches
//!
//! # Port Trait
//!
//! - `ResultStore`: table lifecycle, record access, batch apply and vacuum
//!
//! # Examples
//!
//! ```rust
//! use synpipe_storage::domain::{JobId, ResultRecord, ResultStore, WriteOp};
//! use synpipe_storage::InMemoryResultStore;
//!
//! let store = InMemoryResultStore::new();
//! store.create_table("experiment").unwrap();
//!
//! let job = JobId::from(5);
//! let record = ResultRecord::new(job, serde_json::json!({"cells": 4}));
//! store.apply(vec![WriteOp::insert("experiment", record)]).unwrap();
//!
//! assert!(store.finished_jobs("experiment").unwrap().contains_key(&job));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::StorageError;
use crate::Result;

/// Maximum length of a table name
pub const MAX_TABLE_NAME_LEN: usize = 63;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Job identifier (experiment acquisition timestamp, seconds since epoch)
///
/// Totally ordered through `f64::total_cmp`; equality and hashing follow the
/// same bit-level identity, so a `JobId` can key both `BTreeMap` and `HashMap`.
///
/// ```rust
/// use synpipe_storage::JobId;
///
/// let id: JobId = "1521667891.153".parse().unwrap();
/// assert_eq!(id.to_string(), "1521667891.153");
/// assert!(JobId::from(1) < id);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(f64);

impl JobId {
    /// Create a job id; NaN and infinities are rejected
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(StorageError::invalid_job_id(format!(
                "Job id must be finite, got {}",
                value
            )));
        }
        // -0.0 and 0.0 are the same experiment
        Ok(Self(if value == 0.0 { 0.0 } else { value }))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Parse a comma-separated list (`"1.5,2,3"`), as given on the command line
    pub fn parse_list(s: &str) -> Result<Vec<JobId>> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(JobId::from_str)
            .collect()
    }
}

impl PartialEq for JobId {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for JobId {}

impl PartialOrd for JobId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for JobId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<u32> for JobId {
    fn from(value: u32) -> Self {
        Self(f64::from(value))
    }
}

impl FromStr for JobId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let value: f64 = s.trim().parse().map_err(|_| {
            StorageError::invalid_job_id(format!("Invalid job id: {:?}", s))
        })?;
        JobId::new(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// One module's persisted result for one job
///
/// A record exists if and only if the owning module computed the job
/// successfully; it is never written partially.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    /// Module-defined output
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(job_id: JobId, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Buffered mutation against a result table
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert (or replace) the record for `record.job_id`
    Insert { table: String, record: ResultRecord },
}

impl WriteOp {
    pub fn insert(table: impl Into<String>, record: ResultRecord) -> Self {
        WriteOp::Insert {
            table: table.into(),
            record,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            WriteOp::Insert { table, .. } => table,
        }
    }
}

/// Check that `name` is a plain identifier usable as a table name
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid && name.len() <= MAX_TABLE_NAME_LEN {
        Ok(())
    } else {
        Err(StorageError::invalid_table_name(name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Result store
///
/// Synchronous by contract: worker sessions call it from blocking threads.
/// Implementations must make `apply` atomic per call.
pub trait ResultStore: Send + Sync {
    /// Create an empty result table (`TableExists` if present)
    fn create_table(&self, name: &str) -> Result<()>;

    /// Drop a result table and all its records (`TableNotFound` if absent)
    fn drop_table(&self, name: &str) -> Result<()>;

    fn table_exists(&self, name: &str) -> Result<bool>;

    /// All table names, sorted
    fn list_tables(&self) -> Result<Vec<String>>;

    /// Job ids that have a record, with the record creation time
    fn finished_jobs(&self, table: &str) -> Result<BTreeMap<JobId, DateTime<Utc>>>;

    fn get_record(&self, table: &str, job_id: JobId) -> Result<Option<ResultRecord>>;

    /// Delete the records of exactly these jobs; returns how many existed
    fn delete_jobs(&self, table: &str, job_ids: &[JobId]) -> Result<usize>;

    /// Apply one batch atomically; returns the number of inserted records
    fn apply(&self, ops: Vec<WriteOp>) -> Result<usize>;

    /// Storage maintenance/compaction
    fn vacuum(&self) -> Result<()>;
}
