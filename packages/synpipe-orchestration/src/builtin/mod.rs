// Builtin analysis modules over experiment directories
//
// inventory → checksum → summary
pub mod checksum;
pub mod inventory;
pub mod summary;

use crate::module::AnalysisModule;
use std::sync::Arc;

// Re-exports
pub use checksum::{ChecksumModule, ChecksumResult, FileDigest};
pub use inventory::{FileEntry, InventoryModule, InventoryResult};
pub use summary::{SummaryModule, SummaryResult};

/// Every builtin module, in registration order
pub fn registry() -> Vec<Arc<dyn AnalysisModule>> {
    vec![
        Arc::new(InventoryModule::new()),
        Arc::new(ChecksumModule::new()),
        Arc::new(SummaryModule::new()),
    ]
}
