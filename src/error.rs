//! Error types surfaced by this crate.
//!
//! [`StageConfigError`] covers the one synchronous, configuration-time
//! failure mode (§7 taxonomy item 1). [`PipelineError`] covers worker
//! failures collected and surfaced after a run (§7 taxonomy item 2).

use std::fmt;

use thiserror::Error;

/// A user callable's failure, boxed so the engine never needs to know the
/// concrete error type a producer or transformer raises.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised synchronously by [`crate::Stage::setup`] when a stage is
/// misconfigured. Never reaches a running pipeline.
#[derive(Debug, Error)]
pub enum StageConfigError {
    /// `workers` was zero; every stage needs at least one worker.
    #[error("stage \"{name}\" must have at least one worker, got 0")]
    NoWorkers {
        /// Name of the misconfigured stage.
        name: String,
    },
}

/// The identity and cause of a single worker's failure, preserved for
/// observability alongside the summary [`PipelineError`] that names only the
/// first one.
#[derive(Debug)]
pub struct WorkerFailure {
    /// Name of the worker that failed, e.g. `"map-add-5-2"`.
    pub worker: String,
    /// The error the worker's callable raised, or a synthesized error if the
    /// worker panicked.
    pub cause: BoxError,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" raised {}", self.worker, self.cause)
    }
}

/// Raised when one or more workers fail during a pipeline run.
///
/// Propagation policy is collect-all, surface-one: every worker failure is
/// collected (see [`PipelineError::failures`]), but the message names only
/// the first one and the total count.
#[derive(Debug)]
pub struct PipelineError {
    failures: Vec<WorkerFailure>,
}

impl PipelineError {
    pub(crate) fn from_failures(failures: Vec<WorkerFailure>) -> Self {
        debug_assert!(
            !failures.is_empty(),
            "PipelineError must carry at least one failure"
        );
        Self { failures }
    }

    /// Every worker failure collected during the run, in report order.
    /// The first entry is the one named by [`PipelineError`]'s `Display`.
    pub fn failures(&self) -> &[WorkerFailure] {
        &self.failures
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self
            .failures
            .first()
            .expect("PipelineError always carries at least one failure");
        if self.failures.len() == 1 {
            write!(f, "The task \"{}\" raised {}", first.worker, first.cause)
        } else {
            write!(
                f,
                "{} tasks raised an exception. First error reported on task \"{}\": {}",
                self.failures.len(),
                first.worker,
                first.cause
            )
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f.cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}
