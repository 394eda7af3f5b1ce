//! A staged parallel pipeline engine.
//!
//! Compose a linear sequence of [`Stage`]s, each backed by a pool of
//! parallel workers, and run the whole assembly as one streaming
//! [`Pipeline`]. Items flow stage to stage through bounded channels;
//! producers, transformers, and reducers all share one uniform
//! abstraction -- a [`Stage`] is just a user callable plus a worker count
//! and an output-channel capacity.
//!
//! ```
//! use stagepipe::Stage;
//!
//! let producer = Stage::<i32>::producer("numbers", || (0..10).map(Ok))
//!     .setup(2, 8)
//!     .unwrap();
//! let doubled = stagepipe::as_map_stage("double", 2, 8, false, |item: i32| Ok(item * 2))
//!     .unwrap();
//!
//! let pipeline = producer | doubled;
//! let mut results: Vec<i32> = pipeline.results().map(|r| r.unwrap()).collect();
//! results.sort_unstable();
//! assert_eq!(results.len(), 20);
//! ```
//!
//! The runtime's job is to wire correctly sized channels between adjacent
//! stages, start every worker on its own OS thread, run the fan-out/fan-in
//! termination protocol so a downstream stage knows when every upstream
//! worker has finished, collect worker failures without deadlocking, and
//! expose the final results as a streaming [`Iterator`].
//!
//! Composing stages, configuring the concrete callables a stage runs, and
//! wiring a pipeline from external configuration are explicitly outside
//! this crate's scope; see `SPEC_FULL.md` in the repository root for the
//! full design rationale.

mod channel;
mod error;
#[cfg(test)]
mod logging;
mod pipeline;
mod stage;
mod worker;

pub use error::{BoxError, PipelineError, StageConfigError, WorkerFailure};
pub use pipeline::{from_iterable, Pipeline, PipelineResults};
pub use stage::{as_map_stage, as_stage, Stage};
