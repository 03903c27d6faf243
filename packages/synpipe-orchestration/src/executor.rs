//! Job executor
//!
//! Runs the selected jobs of one module through a pool of worker tasks that
//! share a single queue. Each job's computation runs on a blocking thread,
//! so a panic surfaces as a `JoinError` and is recorded like any other job
//! failure. Each worker owns a [`StoreSession`] and commits every
//! `batch_size` successful jobs, plus once more when it stops. Commits also
//! run on the blocking pool.
//!
//! With `raise_on_error`, the first failure cancels dispatch: queued jobs are
//! never started, in-flight jobs finish, successes already held by workers
//! are committed, and the failure is returned as an error.

use crate::error::{OrchestratorError, Result};
use crate::module::PipelineModule;
use crate::report::ModuleReport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use synpipe_storage::{JobId, ResultRecord, StoreSession};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Successful jobs per commit
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default worker count: 75% of cores, at least one
pub fn default_workers() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Run jobs on several workers (`false` = one worker, in selection order)
    pub parallel: bool,
    /// Worker count; `None` uses [`default_workers`]
    pub workers: Option<usize>,
    /// Abort the update on the first job failure
    pub raise_on_error: bool,
    pub batch_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            workers: None,
            raise_on_error: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ExecutorConfig {
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Default::default()
        }
    }

    /// Workers actually spawned for `n_jobs` jobs
    pub fn worker_count(&self, n_jobs: usize) -> usize {
        if !self.parallel {
            return 1;
        }
        self.workers
            .unwrap_or_else(default_workers)
            .max(1)
            .min(n_jobs.max(1))
    }
}

/// Shared queue plus the first escalated failure
struct Dispatch {
    queue: Mutex<VecDeque<JobId>>,
    cancel: CancellationToken,
    first_failure: Mutex<Option<(JobId, String)>>,
}

impl Dispatch {
    fn new(job_ids: Vec<JobId>) -> Self {
        Self {
            queue: Mutex::new(job_ids.into()),
            cancel: CancellationToken::new(),
            first_failure: Mutex::new(None),
        }
    }

    fn next(&self) -> Option<JobId> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.queue.lock().pop_front()
    }

    fn escalate(&self, job_id: JobId, message: &str) {
        let mut first = self.first_failure.lock();
        if first.is_none() {
            *first = Some((job_id, message.to_string()));
        }
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct WorkerOutcome {
    updated: usize,
    errors: BTreeMap<JobId, String>,
}

pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Process `job_ids` for `module`
    pub async fn run(&self, module: &PipelineModule, job_ids: Vec<JobId>) -> Result<ModuleReport> {
        let start_time = Instant::now();
        let mut report = ModuleReport::new(module.name());

        if job_ids.is_empty() {
            info!("{}: no jobs to process", module.name());
            return Ok(report);
        }

        let n_jobs = job_ids.len();
        let n_workers = self.config.worker_count(n_jobs);
        info!(
            "{}: processing {} jobs with {} worker{}",
            module.name(),
            n_jobs,
            n_workers,
            if n_workers > 1 { "s" } else { "" }
        );

        let dispatch = Arc::new(Dispatch::new(job_ids));

        let results: Vec<Result<WorkerOutcome>> = if n_workers == 1 {
            vec![Self::worker_loop(0, module.clone(), dispatch.clone(), self.config.clone()).await]
        } else {
            let mut tasks = Vec::with_capacity(n_workers);
            for worker_id in 0..n_workers {
                let module = module.clone();
                let dispatch = dispatch.clone();
                let config = self.config.clone();
                tasks.push(tokio::spawn(async move {
                    Self::worker_loop(worker_id, module, dispatch, config).await
                }));
            }

            futures::future::join_all(tasks)
                .await
                .into_iter()
                .map(|joined| {
                    joined.unwrap_or_else(|join_err| {
                        Err(anyhow::anyhow!("Worker task failed: {}", join_err).into())
                    })
                })
                .collect()
        };

        let mut first_error = None;
        for result in results {
            match result {
                Ok(outcome) => {
                    report.n_updated += outcome.updated;
                    for (job_id, message) in outcome.errors {
                        report.record_error(job_id, message);
                    }
                }
                Err(e) => {
                    error!("{}: worker aborted: {}", module.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        report.duration_ms = start_time.elapsed().as_millis() as u64;

        if let Some(e) = first_error {
            return Err(e);
        }

        if let Some((job_id, message)) = dispatch.first_failure.lock().take() {
            return Err(OrchestratorError::JobProcessing {
                module: module.name().to_string(),
                job_id,
                message,
            });
        }

        info!(
            "{}: {} updated, {} errors in {}ms",
            module.name(),
            report.n_updated,
            report.n_errors,
            report.duration_ms
        );
        Ok(report)
    }

    async fn worker_loop(
        worker_id: usize,
        module: PipelineModule,
        dispatch: Arc<Dispatch>,
        config: ExecutorConfig,
    ) -> Result<WorkerOutcome> {
        let mut session = StoreSession::new(module.store().clone());
        let mut outcome = WorkerOutcome::default();
        let batch_size = config.batch_size.max(1);

        while let Some(job_id) = dispatch.next() {
            match Self::run_job(&module, job_id).await {
                Ok(payload) => {
                    session.insert(module.table(), ResultRecord::new(job_id, payload));
                    if session.pending_len() >= batch_size {
                        let (returned, committed) =
                            Self::commit(&module, session, &dispatch).await;
                        session = returned;
                        outcome.updated += committed?;
                    }
                }
                Err(message) => {
                    warn!(
                        "{}: job {} failed on worker {}: {}",
                        module.name(),
                        job_id,
                        worker_id,
                        message
                    );
                    if config.raise_on_error {
                        dispatch.escalate(job_id, &message);
                    }
                    outcome.errors.insert(job_id, message);
                }
            }
        }

        let (session, committed) = Self::commit(&module, session, &dispatch).await;
        outcome.updated += committed?;
        debug!(
            "{}: worker {} done ({} committed)",
            module.name(),
            worker_id,
            session.committed()
        );
        Ok(outcome)
    }

    /// Commit held successes on a blocking thread; a storage failure stops
    /// every worker
    async fn commit(
        module: &PipelineModule,
        mut session: StoreSession,
        dispatch: &Dispatch,
    ) -> (StoreSession, Result<usize>) {
        if session.pending_len() == 0 {
            return (session, Ok(0));
        }

        let joined = tokio::task::spawn_blocking(move || {
            let result = session.commit();
            (session, result)
        })
        .await;

        let (mut session, result) = match joined {
            Ok((session, result)) => (session, result.map_err(OrchestratorError::from)),
            Err(join_err) => (
                StoreSession::new(module.store().clone()),
                Err(anyhow::anyhow!("Commit task failed: {}", join_err).into()),
            ),
        };

        match result {
            Ok(n) => {
                debug!("{}: committed {} records", module.name(), n);
                (session, Ok(n))
            }
            Err(e) => {
                dispatch.cancel.cancel();
                session.rollback();
                (session, Err(e))
            }
        }
    }

    /// Compute one job; any error or panic becomes the job's message
    async fn run_job(
        module: &PipelineModule,
        job_id: JobId,
    ) -> std::result::Result<serde_json::Value, String> {
        let ctx = module.job_context(job_id);
        let analysis = module.analysis().clone();

        match tokio::task::spawn_blocking(move || analysis.process_job(&ctx)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(join_err) if join_err.is_panic() => {
                Err(format!("panicked: {}", panic_message(join_err.into_panic())))
            }
            Err(join_err) => Err(join_err.to_string()),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
