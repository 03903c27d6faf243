use crate::error::Result;
use crate::executor::{Executor, ExecutorConfig};
use crate::job_source::JobSource;
use crate::report::ModuleReport;
use crate::selector::JobSelector;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use synpipe_storage::{JobId, ResultStore};
use tracing::{debug, info};

/// Everything a module needs to compute one job
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    /// Name of the module doing the work
    pub module: String,
    /// Committed results of all modules (read-only use)
    pub store: Arc<dyn ResultStore>,
    /// Raw data location, when the job source provides one
    pub data_path: Option<PathBuf>,
}

impl JobContext {
    /// Payload an upstream module recorded for this job
    pub fn dependency_payload(&self, module: &str) -> Result<Option<serde_json::Value>> {
        if !self.store.table_exists(module)? {
            return Ok(None);
        }
        Ok(self
            .store
            .get_record(module, self.job_id)?
            .map(|record| record.payload))
    }
}

/// Read-only view used to compute a module's ready set
pub struct ModuleContext<'a> {
    pub store: &'a Arc<dyn ResultStore>,
    pub jobs: &'a Arc<dyn JobSource>,
}

impl ModuleContext<'_> {
    /// Jobs with a committed record in `module`'s table (empty if no table)
    pub fn finished_jobs(&self, module: &str) -> Result<BTreeSet<JobId>> {
        if !self.store.table_exists(module)? {
            return Ok(BTreeSet::new());
        }
        Ok(self.store.finished_jobs(module)?.into_keys().collect())
    }
}

/// An analysis module (pluggable)
///
/// The module name doubles as its result table name. Implementations only
/// decide which jobs are ready and how to compute one job; persistence,
/// batching and error isolation belong to the executor.
pub trait AnalysisModule: Send + Sync {
    fn name(&self) -> &str;

    /// Names of modules whose results this one consumes
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Jobs eligible for processing
    ///
    /// Default: every job from the source that all dependencies finished.
    fn ready_jobs(&self, ctx: &ModuleContext<'_>) -> Result<BTreeSet<JobId>> {
        let mut ready = ctx.jobs.list_jobs()?;
        for dep in self.dependencies() {
            let finished = ctx.finished_jobs(&dep)?;
            ready.retain(|job| finished.contains(job));
        }
        Ok(ready)
    }

    /// Compute the result payload for one job
    ///
    /// Runs on a blocking thread. Errors and panics are recorded against the
    /// job and never reach other jobs.
    fn process_job(&self, ctx: &JobContext) -> anyhow::Result<serde_json::Value>;
}

/// Per-invocation parameters for [`PipelineModule::update`]
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Recompute exactly these jobs (their records are dropped first)
    pub job_ids: Option<Vec<JobId>>,
    /// Cap on the number of jobs selected
    pub limit: Option<usize>,
    pub executor: ExecutorConfig,
}

/// A registered module bound to its store and job source
#[derive(Clone)]
pub struct PipelineModule {
    analysis: Arc<dyn AnalysisModule>,
    store: Arc<dyn ResultStore>,
    jobs: Arc<dyn JobSource>,
}

impl PipelineModule {
    pub fn new(
        analysis: Arc<dyn AnalysisModule>,
        store: Arc<dyn ResultStore>,
        jobs: Arc<dyn JobSource>,
    ) -> Self {
        Self {
            analysis,
            store,
            jobs,
        }
    }

    pub fn name(&self) -> &str {
        self.analysis.name()
    }

    /// Result table owned by this module
    pub fn table(&self) -> &str {
        self.analysis.name()
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.analysis.dependencies()
    }

    pub fn analysis(&self) -> &Arc<dyn AnalysisModule> {
        &self.analysis
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub fn job_context(&self, job_id: JobId) -> JobContext {
        JobContext {
            job_id,
            module: self.name().to_string(),
            store: self.store.clone(),
            data_path: self.jobs.job_path(job_id),
        }
    }

    /// Create the result table; returns false if it already existed
    pub fn initialize(&self) -> Result<bool> {
        if self.store.table_exists(self.table())? {
            debug!("Result table {} already exists", self.table());
            return Ok(false);
        }
        self.store.create_table(self.table())?;
        debug!("Created result table {}", self.table());
        Ok(true)
    }

    /// Remove the result table and every record; returns the record count
    pub fn drop_all(&self) -> Result<usize> {
        if !self.store.table_exists(self.table())? {
            debug!("Result table {} does not exist; nothing to drop", self.table());
            return Ok(0);
        }
        let n_records = self.store.finished_jobs(self.table())?.len();
        self.store.drop_table(self.table())?;
        info!("Dropped {} ({} records)", self.name(), n_records);
        Ok(n_records)
    }

    /// Remove the records of exactly these jobs; others are untouched
    pub fn drop_jobs(&self, job_ids: &[JobId]) -> Result<usize> {
        if job_ids.is_empty() || !self.store.table_exists(self.table())? {
            return Ok(0);
        }
        let removed = self.store.delete_jobs(self.table(), job_ids)?;
        debug!("Dropped {} of {} jobs from {}", removed, job_ids.len(), self.name());
        Ok(removed)
    }

    /// Jobs with a committed record
    pub fn finished_jobs(&self) -> Result<BTreeSet<JobId>> {
        self.module_context().finished_jobs(self.table())
    }

    pub fn ready_jobs(&self) -> Result<BTreeSet<JobId>> {
        self.analysis.ready_jobs(&self.module_context())
    }

    fn module_context(&self) -> ModuleContext<'_> {
        ModuleContext {
            store: &self.store,
            jobs: &self.jobs,
        }
    }

    /// Select pending (or explicitly requested) jobs and run them
    pub async fn update(&self, request: &UpdateRequest) -> Result<ModuleReport> {
        self.initialize()?;

        let selection = JobSelector::new(self).select(request.job_ids.as_deref(), request.limit)?;

        // Explicit ids are recomputed from scratch
        let n_dropped = if request.job_ids.is_some() {
            self.drop_jobs(&selection)?
        } else {
            0
        };

        let mut report = Executor::new(request.executor.clone())
            .run(self, selection)
            .await?;
        report.n_dropped += n_dropped;
        Ok(report)
    }
}

impl std::fmt::Debug for PipelineModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineModule")
            .field("name", &self.name())
            .field("dependencies", &self.dependencies())
            .finish()
    }
}
