//! Job selection
//!
//! Explicit ids are returned as given (sorted, deduplicated). Otherwise the
//! pending set is `ready − finished`, in ascending job order.

use crate::error::Result;
use crate::module::PipelineModule;
use std::collections::BTreeSet;
use synpipe_storage::JobId;
use tracing::debug;

pub struct JobSelector<'a> {
    module: &'a PipelineModule,
}

impl<'a> JobSelector<'a> {
    pub fn new(module: &'a PipelineModule) -> Self {
        Self { module }
    }

    pub fn select(&self, explicit: Option<&[JobId]>, limit: Option<usize>) -> Result<Vec<JobId>> {
        if let Some(ids) = explicit {
            return Ok(select_jobs(&BTreeSet::new(), &BTreeSet::new(), Some(ids), limit));
        }

        let ready = self.module.ready_jobs()?;
        let finished = self.module.finished_jobs()?;
        let selected = select_jobs(&ready, &finished, None, limit);

        debug!(
            "{}: {} ready, {} finished, {} selected",
            self.module.name(),
            ready.len(),
            finished.len(),
            selected.len()
        );
        Ok(selected)
    }
}

/// Pure selection rule
pub fn select_jobs(
    ready: &BTreeSet<JobId>,
    finished: &BTreeSet<JobId>,
    explicit: Option<&[JobId]>,
    limit: Option<usize>,
) -> Vec<JobId> {
    let candidates: Vec<JobId> = match explicit {
        Some(ids) => ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect(),
        None => ready.difference(finished).copied().collect(),
    };

    match limit {
        Some(n) => candidates.into_iter().take(n).collect(),
        None => candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u32]) -> BTreeSet<JobId> {
        values.iter().map(|&v| JobId::from(v)).collect()
    }

    #[test]
    fn test_pending_is_ready_minus_finished() {
        let selected = select_jobs(&ids(&[1, 2, 3, 4]), &ids(&[2, 4, 9]), None, None);
        assert_eq!(selected, vec![JobId::from(1), JobId::from(3)]);
    }

    #[test]
    fn test_limit_takes_first_in_order() {
        let ready = ids(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let selected = select_jobs(&ready, &BTreeSet::new(), None, Some(2));
        assert_eq!(selected, vec![JobId::from(1), JobId::from(2)]);
    }

    #[test]
    fn test_explicit_ignores_finished_state() {
        let explicit = [JobId::from(7), JobId::from(5), JobId::from(7)];
        let selected = select_jobs(&ids(&[1]), &ids(&[5, 7]), Some(&explicit), None);
        assert_eq!(selected, vec![JobId::from(5), JobId::from(7)]);
    }

    #[test]
    fn test_limit_zero() {
        let selected = select_jobs(&ids(&[1, 2]), &BTreeSet::new(), None, Some(0));
        assert!(selected.is_empty());
    }
}
