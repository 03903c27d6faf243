use synpipe_storage::{JobId, StorageError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown analysis module \"{name}\"; options are: {}", .valid.join(", "))]
    UnknownModule { name: String, valid: Vec<String> },

    #[error("Module dependency cycle detected among: {}", .modules.join(", "))]
    DependencyCycle { modules: Vec<String> },

    #[error("Missing dependency: module {module} depends on unregistered module {dependency}")]
    MissingDependency { module: String, dependency: String },

    #[error("Module registered twice: {0}")]
    DuplicateModule(String),

    #[error("Module {module} failed on job {job_id}: {message}")]
    JobProcessing {
        module: String,
        job_id: JobId,
        message: String,
    },

    #[error("Maintenance failed: {0}")]
    Maintenance(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Structural errors abort an invocation before any side effect
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnknownModule { .. }
                | OrchestratorError::DependencyCycle { .. }
                | OrchestratorError::MissingDependency { .. }
                | OrchestratorError::DuplicateModule(_)
        )
    }
}
