//! Pipeline configuration
//!
//! Resolution order: defaults, then an optional YAML file (v1 schema), then
//! `SYNPIPE_*` environment variables, then command-line flags.

use crate::error::{OrchestratorError, Result};
use crate::executor::{ExecutorConfig, DEFAULT_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;
pub const MAX_WORKERS: usize = 256;
pub const MAX_BATCH_SIZE: usize = 10_000;

pub const ENV_DATABASE: &str = "SYNPIPE_DATABASE";
pub const ENV_DATA_ROOT: &str = "SYNPIPE_DATA_ROOT";
pub const ENV_WORKERS: &str = "SYNPIPE_WORKERS";
pub const ENV_BATCH_SIZE: &str = "SYNPIPE_BATCH_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub version: u32,
    /// SQLite database file holding every result table
    pub database: PathBuf,
    /// Directory with one subdirectory per job
    pub data_root: PathBuf,
    /// Worker count; 0 means 75% of cores
    pub workers: usize,
    /// Successful jobs per commit
    pub batch_size: usize,
    /// `tracing_subscriber::EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            database: PathBuf::from("synpipe.sqlite"),
            data_root: PathBuf::from("data"),
            workers: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            log_filter: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `SYNPIPE_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = lookup(ENV_DATABASE) {
            self.database = PathBuf::from(database);
        }
        if let Some(data_root) = lookup(ENV_DATA_ROOT) {
            self.data_root = PathBuf::from(data_root);
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, &workers)?;
        }
        if let Some(batch_size) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = parse_env(ENV_BATCH_SIZE, &batch_size)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(OrchestratorError::Config(format!(
                "Unsupported config version {} (supported: {})",
                self.version, CONFIG_VERSION
            )));
        }
        if self.workers > MAX_WORKERS {
            return Err(OrchestratorError::Config(format!(
                "workers must be at most {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(OrchestratorError::Config(format!(
                "batch_size must be in 1..={}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.database.as_os_str().is_empty() {
            return Err(OrchestratorError::config("database path is empty"));
        }
        Ok(())
    }

    /// Executor settings implied by this configuration
    pub fn executor(&self, parallel: bool, raise_on_error: bool) -> ExecutorConfig {
        ExecutorConfig {
            parallel,
            workers: (self.workers > 0).then_some(self.workers),
            raise_on_error,
            batch_size: self.batch_size,
        }
    }
}

fn parse_env(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::Config(format!("{} must be an integer, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.workers, 0);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("synpipe.yaml");

        let config = PipelineConfig {
            database: PathBuf::from("/data/synphys.sqlite"),
            workers: 6,
            ..Default::default()
        };
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

        assert_eq!(PipelineConfig::from_yaml(&path).unwrap(), config);
    }

    #[test]
    fn test_yaml_partial_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("synpipe.yaml");
        std::fs::write(&path, "version: 1\nbatch_size: 50\n").unwrap();

        let config = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.database, PathBuf::from("synpipe.sqlite"));
    }

    #[test]
    fn test_yaml_rejects_unknown_fields_and_versions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("synpipe.yaml");

        std::fs::write(&path, "version: 1\nthreads: 4\n").unwrap();
        assert!(matches!(
            PipelineConfig::from_yaml(&path),
            Err(OrchestratorError::Yaml(_))
        ));

        std::fs::write(&path, "version: 2\n").unwrap();
        assert!(matches!(
            PipelineConfig::from_yaml(&path),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DATABASE, "/tmp/pipeline.sqlite"),
            (ENV_WORKERS, "3"),
            (ENV_BATCH_SIZE, " 25 "),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database, PathBuf::from("/tmp/pipeline.sqlite"));
        assert_eq!(config.data_root, PathBuf::from("data"));
        assert_eq!(config.workers, 3);
        assert_eq!(config.batch_size, 25);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = PipelineConfig::default();
        let result = config.apply_env_from(|key| (key == ENV_WORKERS).then(|| "many".to_string()));
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_validate_ranges() {
        let too_many = PipelineConfig {
            workers: MAX_WORKERS + 1,
            ..Default::default()
        };
        assert!(too_many.validate().is_err());

        let empty_batch = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(empty_batch.validate().is_err());
    }

    #[test]
    fn test_executor_config() {
        let config = PipelineConfig {
            workers: 4,
            batch_size: 20,
            ..Default::default()
        };
        let exec = config.executor(true, true);
        assert_eq!(exec.workers, Some(4));
        assert_eq!(exec.batch_size, 20);
        assert!(exec.raise_on_error);

        assert_eq!(PipelineConfig::default().executor(false, false).workers, None);
    }
}
