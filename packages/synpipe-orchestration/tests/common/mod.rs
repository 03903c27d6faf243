//! Common test utilities for synpipe-orchestration
//!
//! Scriptable analysis modules, a store with injectable failures, and
//! helpers to build orchestrators over them.

#![allow(dead_code)]

use anyhow::bail;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use synpipe_orchestration::{
    AnalysisModule, JobContext, JobId, ModuleGraph, PipelineOrchestrator, StaticJobSource,
};
use synpipe_storage::{
    InMemoryResultStore, ResultRecord, ResultStore, StorageError, WriteOp,
};

/// Builder-style module whose behaviour is fixed per job id
#[derive(Default)]
pub struct TestModule {
    name: String,
    deps: Vec<String>,
    fail_on: HashSet<JobId>,
    panic_on: HashSet<JobId>,
    delay: Duration,
    calls: Mutex<Vec<JobId>>,
}

impl TestModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.deps = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn fail_on(mut self, ids: &[u32]) -> Self {
        self.fail_on = ids.iter().map(|&i| JobId::from(i)).collect();
        self
    }

    pub fn panic_on(mut self, ids: &[u32]) -> Self {
        self.panic_on = ids.iter().map(|&i| JobId::from(i)).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Jobs passed to `process_job`, in call order
    pub fn calls(&self) -> Vec<JobId> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, job: u32) -> usize {
        let job = JobId::from(job);
        self.calls.lock().iter().filter(|&&j| j == job).count()
    }
}

impl AnalysisModule for TestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn process_job(&self, ctx: &JobContext) -> anyhow::Result<serde_json::Value> {
        self.calls.lock().push(ctx.job_id);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        if self.panic_on.contains(&ctx.job_id) {
            panic!("corrupt recording in job {}", ctx.job_id);
        }
        if self.fail_on.contains(&ctx.job_id) {
            bail!("no usable sweeps in job {}", ctx.job_id);
        }

        // Payload depends on upstream results so recomputation is observable
        let mut upstream = BTreeMap::new();
        for dep in &self.deps {
            upstream.insert(dep.clone(), ctx.dependency_payload(dep)?);
        }
        Ok(json!({
            "module": self.name,
            "job": ctx.job_id.value(),
            "upstream": upstream,
        }))
    }
}

pub fn as_modules(modules: &[&Arc<TestModule>]) -> Vec<Arc<dyn AnalysisModule>> {
    modules
        .iter()
        .map(|m| (*m).clone() as Arc<dyn AnalysisModule>)
        .collect()
}

pub fn orchestrator(
    modules: Vec<Arc<dyn AnalysisModule>>,
    store: Arc<dyn ResultStore>,
    n_jobs: u32,
) -> PipelineOrchestrator {
    let graph = ModuleGraph::new(modules).expect("valid module graph");
    PipelineOrchestrator::new(
        Arc::new(graph),
        store,
        Arc::new(StaticJobSource::range(n_jobs)),
    )
}

pub fn ids(values: &[u32]) -> BTreeSet<JobId> {
    values.iter().map(|&v| JobId::from(v)).collect()
}

pub fn finished(store: &dyn ResultStore, table: &str) -> BTreeSet<JobId> {
    if !store.table_exists(table).unwrap() {
        return BTreeSet::new();
    }
    store.finished_jobs(table).unwrap().into_keys().collect()
}

/// Payloads by job, ignoring timestamps
pub fn snapshot(store: &dyn ResultStore, table: &str) -> BTreeMap<JobId, serde_json::Value> {
    finished(store, table)
        .into_iter()
        .map(|job| {
            let record = store.get_record(table, job).unwrap().unwrap();
            (job, record.payload)
        })
        .collect()
}

/// In-memory store whose writes or maintenance can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryResultStore,
    pub fail_apply: AtomicBool,
    pub fail_vacuum: AtomicBool,
    /// Threads that ran `apply`
    pub apply_threads: Mutex<Vec<ThreadId>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for FlakyStore {
    fn create_table(&self, name: &str) -> synpipe_storage::Result<()> {
        self.inner.create_table(name)
    }

    fn drop_table(&self, name: &str) -> synpipe_storage::Result<()> {
        self.inner.drop_table(name)
    }

    fn table_exists(&self, name: &str) -> synpipe_storage::Result<bool> {
        self.inner.table_exists(name)
    }

    fn list_tables(&self) -> synpipe_storage::Result<Vec<String>> {
        self.inner.list_tables()
    }

    fn finished_jobs(
        &self,
        table: &str,
    ) -> synpipe_storage::Result<BTreeMap<JobId, chrono::DateTime<chrono::Utc>>> {
        self.inner.finished_jobs(table)
    }

    fn get_record(&self, table: &str, job_id: JobId) -> synpipe_storage::Result<Option<ResultRecord>> {
        self.inner.get_record(table, job_id)
    }

    fn delete_jobs(&self, table: &str, job_ids: &[JobId]) -> synpipe_storage::Result<usize> {
        self.inner.delete_jobs(table, job_ids)
    }

    fn apply(&self, ops: Vec<WriteOp>) -> synpipe_storage::Result<usize> {
        self.apply_threads.lock().push(std::thread::current().id());
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(StorageError::transaction("disk I/O error"));
        }
        self.inner.apply(ops)
    }

    fn vacuum(&self) -> synpipe_storage::Result<()> {
        if self.fail_vacuum.load(Ordering::SeqCst) {
            return Err(StorageError::database("database is locked"));
        }
        self.inner.vacuum()
    }
}
