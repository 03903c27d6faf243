//! synpipe-storage - Result store for the analysis pipeline
//!
//! Every pipeline module owns one result table keyed by job id. A record
//! exists if and only if the module finished that job successfully, so
//! "pending" is simply "no record".
//!
//! ## Contract
//!
//! 1. **Tables**: `create_table` / `drop_table` / `table_exists`
//! 2. **Records**: `finished_jobs`, `get_record`, `delete_jobs`
//! 3. **Writes**: buffered in a [`StoreSession`], applied as one atomic batch per commit
//! 4. **Maintenance**: `vacuum`
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use synpipe_storage::{InMemoryResultStore, JobId, ResultRecord, ResultStore, StoreSession};
//!
//! let store: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
//! store.create_table("experiment").unwrap();
//!
//! let mut session = StoreSession::new(store.clone());
//! session.insert("experiment", ResultRecord::new(JobId::from(1), serde_json::json!({})));
//! session.commit().unwrap();
//!
//! assert_eq!(store.finished_jobs("experiment").unwrap().len(), 1);
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod session;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{validate_table_name, JobId, ResultRecord, ResultStore, WriteOp};
pub use infrastructure::InMemoryResultStore;
#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteResultStore;
pub use session::StoreSession;
