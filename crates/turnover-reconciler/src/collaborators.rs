//! Downstream consumers that are told which file analyses need work.

use std::fmt;
use std::sync::Arc;

/// A background job fed with peptide-file-analysis ids. Delivery is
/// fire-and-forget and at-least-once: the same id may arrive repeatedly.
pub trait PendingWorkQueue: Send + Sync {
    fn add_file_analysis_ids(&self, ids: &[i64]);

    /// The batch was too large (or the workspace was reloaded); the job should
    /// requery everything itself.
    fn set_requery_pending(&self);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQueue;

impl PendingWorkQueue for NoopQueue {
    fn add_file_analysis_ids(&self, _ids: &[i64]) {}

    fn set_requery_pending(&self) {}
}

#[derive(Clone)]
pub struct Collaborators {
    /// Receives file analyses that have chromatograms but no result yet.
    pub result_calculator: Arc<dyn PendingWorkQueue>,
    /// Receives file analyses without chromatograms.
    pub chromatogram_generator: Arc<dyn PendingWorkQueue>,
}

impl Collaborators {
    pub fn new(
        result_calculator: Arc<dyn PendingWorkQueue>,
        chromatogram_generator: Arc<dyn PendingWorkQueue>,
    ) -> Self {
        Self {
            result_calculator,
            chromatogram_generator,
        }
    }

    pub fn notify_pending_result_calculation(&self, ids: &[i64]) {
        if !ids.is_empty() {
            self.result_calculator.add_file_analysis_ids(ids);
        }
    }

    pub fn notify_pending_chromatogram_generation(&self, ids: &[i64]) {
        if !ids.is_empty() {
            self.chromatogram_generator.add_file_analysis_ids(ids);
        }
    }

    pub fn requery_pending(&self) {
        self.result_calculator.set_requery_pending();
        self.chromatogram_generator.set_requery_pending();
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(Arc::new(NoopQueue), Arc::new(NoopQueue))
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
