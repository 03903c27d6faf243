use crate::module::{AnalysisModule, JobContext};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use walkdir::WalkDir;

/// One data file of an experiment, relative to the job directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryResult {
    pub files: Vec<FileEntry>,
    pub total_bytes: u64,
}

/// Inventory module (root): lists every non-hidden file in the job directory
///
/// Fails on jobs with no directory or no files.
#[derive(Debug, Default)]
pub struct InventoryModule;

impl InventoryModule {
    pub const NAME: &'static str = "inventory";

    pub fn new() -> Self {
        Self
    }

    pub fn scan(dir: &Path) -> anyhow::Result<InventoryResult> {
        let mut files = Vec::new();

        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(dir)
                .with_context(|| format!("{} is outside {}", entry.path().display(), dir.display()))?;
            let bytes = entry.metadata()?.len();

            files.push(FileEntry {
                path: relative.to_string_lossy().replace('\\', "/"),
                bytes,
            });
        }

        let total_bytes = files.iter().map(|f| f.bytes).sum();
        Ok(InventoryResult { files, total_bytes })
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

impl AnalysisModule for InventoryModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process_job(&self, ctx: &JobContext) -> anyhow::Result<serde_json::Value> {
        let Some(dir) = ctx.data_path.as_deref() else {
            bail!("no data directory for job {}", ctx.job_id);
        };

        let inventory = Self::scan(dir)?;
        if inventory.files.is_empty() {
            bail!("experiment directory {} contains no files", dir.display());
        }

        Ok(serde_json::to_value(inventory)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_sorted_and_skips_hidden() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("cells")).unwrap();
        fs::create_dir(temp.path().join(".cache")).unwrap();
        fs::write(temp.path().join("b.nwb"), b"12345").unwrap();
        fs::write(temp.path().join("a.txt"), b"xy").unwrap();
        fs::write(temp.path().join("cells/1.json"), b"{}").unwrap();
        fs::write(temp.path().join(".cache/junk"), b"junk").unwrap();
        fs::write(temp.path().join(".DS_Store"), b"mac").unwrap();

        let inventory = InventoryModule::scan(temp.path()).unwrap();
        let paths: Vec<&str> = inventory.files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(paths, vec!["a.txt", "b.nwb", "cells/1.json"]);
        assert_eq!(inventory.total_bytes, 9);
    }

    #[test]
    fn test_empty_directory_is_error() {
        let temp = TempDir::new().unwrap();
        let ctx = crate::builtin::tests_support::context(Some(temp.path()));
        let err = InventoryModule::new().process_job(&ctx).unwrap_err();
        assert!(err.to_string().contains("contains no files"));
    }

    #[test]
    fn test_missing_data_path_is_error() {
        let ctx = crate::builtin::tests_support::context(None);
        assert!(InventoryModule::new().process_job(&ctx).is_err());
    }
}
