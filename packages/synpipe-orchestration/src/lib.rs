/*
 * synpipe Orchestration - analysis pipeline runner
 *
 * Runs named analysis modules over a set of experiments (jobs) and keeps
 * one result table per module in a shared store.
 *
 * Architecture:
 * - Module graph (dependency DAG, deterministic topological order)
 * - Job selection (ready − finished, explicit ids, limit)
 * - Executor (worker pool, batched commits, per-job error isolation)
 * - Orchestrator (update / rebuild / drop over a module selection)
 * - Reporting (per-module counts, error listing, JSON)
 */

// Public modules
pub mod builtin;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod job_source;
pub mod module;
pub mod orchestrator;
pub mod report;
pub mod selector;

// Re-exports
pub use config::PipelineConfig;
pub use error::{OrchestratorError, Result};
pub use executor::{default_workers, Executor, ExecutorConfig, DEFAULT_BATCH_SIZE};
pub use graph::{ModuleGraph, ModuleSelection};
pub use job_source::{DirectoryJobSource, JobSource, StaticJobSource};
pub use module::{AnalysisModule, JobContext, ModuleContext, PipelineModule, UpdateRequest};
pub use orchestrator::{PipelineOrchestrator, RunRequest};
pub use report::{ModuleReport, RunReport};
pub use selector::{select_jobs, JobSelector};

pub use synpipe_storage::{JobId, ResultStore};
