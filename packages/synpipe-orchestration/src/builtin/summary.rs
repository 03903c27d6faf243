use super::checksum::{hex, ChecksumModule, ChecksumResult};
use super::inventory::{InventoryModule, InventoryResult};
use crate::module::{AnalysisModule, JobContext};
use anyhow::{anyhow, ensure};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub n_files: usize,
    pub total_bytes: u64,
    /// SHA-256 over `path:sha256\n` lines in path order
    pub digest: String,
}

/// Summary module: one fingerprint per experiment from inventory + checksum
#[derive(Debug, Default)]
pub struct SummaryModule;

impl SummaryModule {
    pub const NAME: &'static str = "summary";

    pub fn new() -> Self {
        Self
    }
}

fn upstream<T: DeserializeOwned>(ctx: &JobContext, module: &str) -> anyhow::Result<T> {
    let payload = ctx
        .dependency_payload(module)?
        .ok_or_else(|| anyhow!("no {} result for job {}", module, ctx.job_id))?;
    Ok(serde_json::from_value(payload)?)
}

impl AnalysisModule for SummaryModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<String> {
        vec![
            InventoryModule::NAME.to_string(),
            ChecksumModule::NAME.to_string(),
        ]
    }

    fn process_job(&self, ctx: &JobContext) -> anyhow::Result<serde_json::Value> {
        let inventory: InventoryResult = upstream(ctx, InventoryModule::NAME)?;
        let mut checksums: ChecksumResult = upstream(ctx, ChecksumModule::NAME)?;

        ensure!(
            inventory.files.len() == checksums.files.len(),
            "inventory lists {} files but checksum has {}",
            inventory.files.len(),
            checksums.files.len()
        );

        checksums.files.sort_by(|a, b| a.path.cmp(&b.path));
        let mut hasher = Sha256::new();
        for file in &checksums.files {
            hasher.update(format!("{}:{}\n", file.path, file.sha256).as_bytes());
        }

        Ok(serde_json::to_value(SummaryResult {
            n_files: inventory.files.len(),
            total_bytes: inventory.total_bytes,
            digest: hex(&hasher.finalize()),
        })?)
    }
}
