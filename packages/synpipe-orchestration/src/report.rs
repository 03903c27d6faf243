use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use synpipe_storage::JobId;
use uuid::Uuid;

/// Outcome of one module update (or drop)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub n_dropped: usize,
    /// Records committed by this update
    pub n_updated: usize,
    pub n_errors: usize,
    /// Failed jobs and their messages
    #[serde(serialize_with = "serialize_errors")]
    pub errors: BTreeMap<JobId, String>,
    pub duration_ms: u64,
}

impl ModuleReport {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Default::default()
        }
    }

    pub fn record_error(&mut self, job_id: JobId, message: impl Into<String>) {
        self.errors.insert(job_id, message.into());
        self.n_errors = self.errors.len();
    }
}

fn serialize_errors<S: Serializer>(
    errors: &BTreeMap<JobId, String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(errors.iter().map(|(job, msg)| (job.to_string(), msg)))
}

/// Reports of one orchestrator run, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub modules: Vec<ModuleReport>,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            modules: Vec::new(),
        }
    }

    pub fn record(&mut self, report: ModuleReport) {
        self.modules.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn get(&self, module: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|r| r.module == module)
    }

    pub fn total_errors(&self) -> usize {
        self.modules.iter().map(|r| r.n_errors).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.modules.iter().map(|r| r.n_updated).sum()
    }

    /// Per-module error listing
    pub fn render_errors(&self) -> String {
        let mut out = String::from("\n================== Error Report ===========================\n");
        for report in &self.modules {
            out.push_str(&format!(
                "------ {} : {} errors -------\n",
                report.module, report.n_errors
            ));
            for (job_id, message) in &report.errors {
                out.push_str(&format!("    {} : {}\n", job_id, message));
            }
        }
        out
    }

    /// One summary line per module
    pub fn render_summary(&self) -> String {
        let mut out =
            String::from("\n================== Update Report ===========================\n");
        for r in &self.modules {
            out.push_str(&format!(
                "{:<20}  dropped: {:>6}  updated: {:>6}  errors: {:>6}\n",
                r.module, r.n_dropped, r.n_updated, r.n_errors
            ));
        }
        out
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.render_errors(), self.render_summary())
    }
}
