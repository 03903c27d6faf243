//! Job enumeration
//!
//! A job source defines the universe of jobs a pipeline may process. The
//! default `ready_jobs` of every module starts from this set.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use synpipe_storage::JobId;
use tracing::{debug, warn};

pub trait JobSource: Send + Sync {
    /// Every job currently known to the source
    fn list_jobs(&self) -> Result<BTreeSet<JobId>>;

    /// Location of the job's raw data, if the source has one
    fn job_path(&self, _job_id: JobId) -> Option<PathBuf> {
        None
    }
}

/// Fixed set of jobs (tests, explicit batches)
#[derive(Debug, Clone, Default)]
pub struct StaticJobSource {
    jobs: BTreeSet<JobId>,
}

impl StaticJobSource {
    pub fn new(jobs: impl IntoIterator<Item = JobId>) -> Self {
        Self {
            jobs: jobs.into_iter().collect(),
        }
    }

    /// Jobs `1..=n`
    pub fn range(n: u32) -> Self {
        Self::new((1..=n).map(JobId::from))
    }
}

impl JobSource for StaticJobSource {
    fn list_jobs(&self) -> Result<BTreeSet<JobId>> {
        Ok(self.jobs.clone())
    }
}

/// One job per experiment directory under a data root
///
/// Directory names are job ids (`1521667891.153/`). Hidden entries, plain
/// files and names that do not parse as ids are skipped.
pub struct DirectoryJobSource {
    root: PathBuf,
    paths: RwLock<HashMap<JobId, PathBuf>>,
}

impl DirectoryJobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: RwLock::new(HashMap::new()),
        }
    }

    fn scan(&self) -> Result<HashMap<JobId, PathBuf>> {
        let mut found = HashMap::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            match name.parse::<JobId>() {
                Ok(job_id) => {
                    if let Some(previous) = found.insert(job_id, path.clone()) {
                        warn!(
                            "Directories {} and {} map to the same job {}",
                            previous.display(),
                            path.display(),
                            job_id
                        );
                    }
                }
                Err(_) => debug!("Skipping non-job directory {}", path.display()),
            }
        }

        Ok(found)
    }
}

impl JobSource for DirectoryJobSource {
    fn list_jobs(&self) -> Result<BTreeSet<JobId>> {
        let found = self.scan()?;
        let jobs = found.keys().copied().collect();
        *self.paths.write() = found;
        Ok(jobs)
    }

    fn job_path(&self, job_id: JobId) -> Option<PathBuf> {
        if let Some(path) = self.paths.read().get(&job_id) {
            return Some(path.clone());
        }
        // Explicitly requested jobs may never have been listed
        let found = match self.scan() {
            Ok(found) => found,
            Err(e) => {
                warn!("Cannot scan {}: {}", self.root.display(), e);
                return None;
            }
        };
        let path = found.get(&job_id).cloned();
        *self.paths.write() = found;
        path
    }
}
