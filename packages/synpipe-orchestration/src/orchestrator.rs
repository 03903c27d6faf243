use crate::error::{OrchestratorError, Result};
use crate::executor::ExecutorConfig;
use crate::graph::{ModuleGraph, ModuleSelection};
use crate::job_source::JobSource;
use crate::module::{AnalysisModule, PipelineModule, UpdateRequest};
use crate::report::{ModuleReport, RunReport};
use std::collections::HashMap;
use std::sync::Arc;
use synpipe_storage::{JobId, ResultStore};
use tracing::{info, warn};
use uuid::Uuid;

/// One invocation of the pipeline
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub modules: ModuleSelection,
    /// Drop and recreate every selected module's table before updating
    pub rebuild: bool,
    /// Only remove results (all, or `job_ids`); no update
    pub drop: bool,
    pub job_ids: Option<Vec<JobId>>,
    pub limit: Option<usize>,
    pub executor: ExecutorConfig,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            modules: ModuleSelection::All,
            rebuild: false,
            drop: false,
            job_ids: None,
            limit: None,
            executor: ExecutorConfig::default(),
        }
    }
}

impl RunRequest {
    pub fn update(modules: ModuleSelection) -> Self {
        Self {
            modules,
            ..Default::default()
        }
    }
}

/// Runs selected modules in dependency order against one store
pub struct PipelineOrchestrator {
    graph: Arc<ModuleGraph>,
    store: Arc<dyn ResultStore>,
    jobs: Arc<dyn JobSource>,
}

impl PipelineOrchestrator {
    pub fn new(
        graph: Arc<ModuleGraph>,
        store: Arc<dyn ResultStore>,
        jobs: Arc<dyn JobSource>,
    ) -> Self {
        Self { graph, store, jobs }
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Bind a registered module to this orchestrator's store and job source
    pub fn module(&self, name: &str) -> Option<PipelineModule> {
        self.graph.get(name).map(|analysis| self.bind(analysis.clone()))
    }

    fn bind(&self, analysis: Arc<dyn AnalysisModule>) -> PipelineModule {
        PipelineModule::new(analysis, self.store.clone(), self.jobs.clone())
    }

    /// Selected modules in dependency order
    pub fn resolve(&self, selection: &ModuleSelection) -> Result<Vec<PipelineModule>> {
        Ok(self
            .graph
            .resolve(selection)?
            .into_iter()
            .map(|analysis| self.bind(analysis))
            .collect())
    }

    /// Execute a run (main entry point)
    ///
    /// Module names are resolved before anything touches the store, so an
    /// unknown name has no side effects. Modules run strictly one after
    /// another; a module's update sees everything upstream modules committed.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport> {
        let modules = self.resolve(&request.modules)?;
        let mut report = RunReport::new(Uuid::new_v4());

        info!(
            "Run {}: {} module{}",
            report.run_id,
            modules.len(),
            if modules.len() == 1 { "" } else { "s" }
        );
        info!("Execution plan:\n{}", self.graph.execution_plan(&request.modules)?);

        let mut rebuilt = if request.rebuild {
            self.rebuild(&modules)?
        } else {
            HashMap::new()
        };

        if request.drop {
            self.drop_results(&modules, request.job_ids.as_deref(), &rebuilt, &mut report)?;
            report.finish();
            return Ok(report);
        }

        let update = UpdateRequest {
            job_ids: request.job_ids.clone(),
            limit: request.limit,
            executor: request.executor.clone(),
        };

        for module in &modules {
            info!("=========== Updating {} ===========", module.name());
            let mut module_report = module.update(&update).await?;
            module_report.n_dropped += rebuilt.remove(module.name()).unwrap_or(0);
            report.record(module_report);
            self.vacuum(module);
        }

        report.finish();
        info!(
            "Run {}: {} updated, {} errors",
            report.run_id,
            report.total_updated(),
            report.total_errors()
        );
        Ok(report)
    }

    /// Drop every selected table (dependents first), then recreate in order
    fn rebuild(&self, modules: &[PipelineModule]) -> Result<HashMap<String, usize>> {
        let mut dropped = HashMap::new();
        for module in modules.iter().rev() {
            dropped.insert(module.name().to_string(), module.drop_all()?);
        }
        for module in modules {
            module.initialize()?;
        }
        info!("Rebuilt {} result tables", modules.len());
        Ok(dropped)
    }

    fn drop_results(
        &self,
        modules: &[PipelineModule],
        job_ids: Option<&[JobId]>,
        rebuilt: &HashMap<String, usize>,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut dropped = HashMap::new();
        for module in modules.iter().rev() {
            let n = match job_ids {
                Some(ids) => module.drop_jobs(ids)?,
                None => module.drop_all()?,
            };
            dropped.insert(module.name(), n);
        }

        for module in modules {
            let mut module_report = ModuleReport::new(module.name());
            module_report.n_dropped = dropped.get(module.name()).copied().unwrap_or(0)
                + rebuilt.get(module.name()).copied().unwrap_or(0);
            report.record(module_report);
        }
        Ok(())
    }

    /// Maintenance never fails the run
    fn vacuum(&self, module: &PipelineModule) {
        if let Err(e) = self.store.vacuum() {
            let err = OrchestratorError::Maintenance(e.to_string());
            warn!("After {}: {}", module.name(), err);
        }
    }
}
