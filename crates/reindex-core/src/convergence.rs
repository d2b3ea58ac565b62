//! Convergence driver: repeat passes until nothing fails.
//!
//! After the first pass, every FAILED type and item is reset to ENQUEUED and
//! another pass runs. This continues while errors remain and each retry pass
//! ends with strictly fewer errors than the one before. A retry that does not
//! reduce the error count ends the run as unrecoverable.

use std::sync::Arc;

use tracing::{error, info};

use crate::collaborator::{IndexTask, Lister};
use crate::error::ReindexError;
use crate::runner::{PassReport, Runner};

/// Every pass of a converged run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub passes: Vec<PassReport>,
}

impl ConvergenceReport {
    /// Error count at the end of each pass.
    pub fn error_counts(&self) -> Vec<u64> {
        self.passes.iter().map(|p| p.error_count).collect()
    }

    /// Items indexed successfully across all passes.
    pub fn total_processed(&self) -> u64 {
        self.passes.iter().map(PassReport::processed).sum()
    }
}

impl Runner {
    /// Run passes until the store has no errors left.
    ///
    /// Returns [`ReindexError::Unrecoverable`] with the error count before the
    /// last retry when that retry failed to reduce it.
    pub async fn run_to_convergence(
        &self,
        lister: Arc<dyn Lister>,
        task: Arc<dyn IndexTask>,
    ) -> Result<ConvergenceReport, ReindexError> {
        let mut report = ConvergenceReport::default();

        let first = self.process(lister.clone(), task.clone()).await?;
        let mut errors = first.error_count;
        report.passes.push(first);

        while errors > 0 {
            let previous = errors;
            let cleared = self.store().clear_errors()?;
            info!(
                errors = previous,
                cleared = cleared.total(),
                pass = report.passes.len() + 1,
                "Retrying failed types and items"
            );

            let pass = self.process(lister.clone(), task.clone()).await?;
            errors = pass.error_count;
            report.passes.push(pass);

            if errors >= previous {
                error!(
                    previous,
                    current = errors,
                    passes = report.passes.len(),
                    "Error count did not decrease"
                );
                return Err(ReindexError::Unrecoverable {
                    errors: previous,
                    passes: report.passes.len(),
                });
            }
        }

        info!(
            passes = report.passes.len(),
            processed = report.total_processed(),
            "Reindex converged"
        );
        Ok(report)
    }
}
