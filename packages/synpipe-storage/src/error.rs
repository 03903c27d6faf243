//! Error types for synpipe-storage

use std::fmt;
use thiserror::Error;

/// What went wrong in the result store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// SQLite failure
    Database,
    /// Payload or timestamp could not be encoded/decoded
    Serialization,
    TableNotFound,
    TableExists,
    /// Table name is not a plain identifier
    InvalidTableName,
    /// Job id is not a finite number
    InvalidJobId,
    /// Batch could not be committed
    Transaction,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::TableNotFound => "table_not_found",
            ErrorKind::TableExists => "table_exists",
            ErrorKind::InvalidTableName => "invalid_table_name",
            ErrorKind::InvalidJobId => "invalid_job_id",
            ErrorKind::Transaction => "transaction",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::new(ErrorKind::TableNotFound, format!("no result table {}", table))
    }

    pub fn table_exists(table: &str) -> Self {
        Self::new(ErrorKind::TableExists, format!("result table {} already exists", table))
    }

    pub fn invalid_table_name(table: &str) -> Self {
        Self::new(
            ErrorKind::InvalidTableName,
            format!("invalid table name {:?}", table),
        )
    }

    pub fn invalid_job_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidJobId, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
