use super::inventory::{InventoryModule, InventoryResult};
use crate::module::{AnalysisModule, JobContext};
use anyhow::{anyhow, bail, Context};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    pub path: String,
    /// Lowercase hex SHA-256
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumResult {
    pub files: Vec<FileDigest>,
}

/// Checksum module: SHA-256 of every file the inventory listed
///
/// Files are hashed in parallel; any unreadable file fails the whole job.
#[derive(Debug, Default)]
pub struct ChecksumModule;

impl ChecksumModule {
    pub const NAME: &'static str = "checksum";

    pub fn new() -> Self {
        Self
    }
}

pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex(&hasher.finalize()))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl AnalysisModule for ChecksumModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<String> {
        vec![InventoryModule::NAME.to_string()]
    }

    fn process_job(&self, ctx: &JobContext) -> anyhow::Result<serde_json::Value> {
        let Some(dir) = ctx.data_path.as_deref() else {
            bail!("no data directory for job {}", ctx.job_id);
        };
        let inventory: InventoryResult = ctx
            .dependency_payload(InventoryModule::NAME)?
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| anyhow!("no inventory for job {}", ctx.job_id))?;

        let files = inventory
            .files
            .par_iter()
            .map(|entry| {
                Ok(FileDigest {
                    path: entry.path.clone(),
                    sha256: sha256_file(&dir.join(&entry.path))?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(serde_json::to_value(ChecksumResult { files })?)
    }
}
