//! Stage (C3) and the two user-callable shapes (§4.3).

use std::sync::Arc;

use crate::error::{BoxError, StageConfigError};

pub(crate) type ResultIter<T> = Box<dyn Iterator<Item = Result<T, BoxError>> + Send>;

/// The two shapes a stage's user callable can take, selected at
/// construction rather than by reflection (§9 "avoid reflection").
pub(crate) enum Target<T> {
    /// No input channel. Called once per worker with no arguments; every
    /// item the returned iterator yields becomes an output item.
    Producer(Arc<dyn Fn() -> ResultIter<T> + Send + Sync>),
    /// Consumes an input iterator of real payloads (End markers already
    /// filtered out by the channel reader) and yields output items.
    Transformer(Arc<dyn Fn(Box<dyn Iterator<Item = T> + Send>) -> ResultIter<T> + Send + Sync>),
}

impl<T> Clone for Target<T> {
    fn clone(&self) -> Self {
        match self {
            Target::Producer(f) => Target::Producer(Arc::clone(f)),
            Target::Transformer(f) => Target::Transformer(Arc::clone(f)),
        }
    }
}

/// A pool of identically-configured workers plus its output-channel
/// capacity (C3). Immutable once built: [`Stage::setup`] takes `self` by
/// value and returns a new, validated `Stage`.
///
/// A `Stage` owns no worker state -- workers are spawned fresh by
/// [`crate::Pipeline::results`] on every run, so the same `Stage` can be
/// reused across runs without any discard-and-rematerialize bookkeeping
/// (I5).
pub struct Stage<T> {
    pub(crate) name: String,
    pub(crate) target: Target<T>,
    pub(crate) workers: usize,
    pub(crate) qsize: usize,
}

impl<T: Send + 'static> Stage<T> {
    /// Build a producer stage: a worker with no input, called with no
    /// arguments, whose returned iterator becomes the stage's output.
    /// Defaults to a single worker with a rendezvous (`qsize = 0`) output
    /// channel; call [`Stage::setup`] to change either.
    pub fn producer<F, I>(name: impl Into<String>, target: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Result<T, BoxError>>,
        I::IntoIter: Send + 'static,
    {
        Stage {
            name: name.into(),
            target: Target::Producer(Arc::new(move || {
                Box::new(target().into_iter()) as ResultIter<T>
            })),
            workers: 1,
            qsize: 0,
        }
    }

    /// Build a transformer stage: a worker that consumes the upstream
    /// stage's payloads and yields its own. Defaults to a single worker with
    /// a rendezvous (`qsize = 0`) output channel; call [`Stage::setup`] to
    /// change either.
    pub fn transformer<F, I>(name: impl Into<String>, target: F) -> Self
    where
        F: Fn(Box<dyn Iterator<Item = T> + Send>) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Result<T, BoxError>>,
        I::IntoIter: Send + 'static,
    {
        Stage {
            name: name.into(),
            target: Target::Transformer(Arc::new(move |input| {
                Box::new(target(input).into_iter()) as ResultIter<T>
            })),
            workers: 1,
            qsize: 0,
        }
    }

    /// Validate and set the worker count and output-channel capacity.
    /// Rejects `workers == 0`; `qsize` has no invalid values since it is a
    /// `usize` (see DESIGN.md on the `qsize >= 0` invariant).
    pub fn setup(mut self, workers: usize, qsize: usize) -> Result<Self, StageConfigError> {
        if workers == 0 {
            return Err(StageConfigError::NoWorkers { name: self.name });
        }
        self.workers = workers;
        self.qsize = qsize;
        Ok(self)
    }

    /// The stage's name, used in worker thread names, tracing spans, and
    /// [`crate::error::WorkerFailure`] identities.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured worker count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Configured output-channel capacity.
    pub fn qsize(&self) -> usize {
        self.qsize
    }
}

/// Convenience constructor: `as_stage` wraps a producer or transformer
/// callable directly into a configured [`Stage`] in one call (§6).
pub fn as_stage<T, F, I>(
    name: impl Into<String>,
    workers: usize,
    qsize: usize,
    target: F,
) -> Result<Stage<T>, StageConfigError>
where
    T: Send + 'static,
    F: Fn(Box<dyn Iterator<Item = T> + Send>) -> I + Send + Sync + 'static,
    I: IntoIterator<Item = Result<T, BoxError>>,
    I::IntoIter: Send + 'static,
{
    Stage::transformer(name, target).setup(workers, qsize)
}

/// Convenience constructor: lift a per-item function `f(item) ->
/// Result<item, BoxError>` into a transformer stage (§4.3, §6).
///
/// When `filter_errors` is `true`, a per-item `Err` is logged and the item
/// is dropped rather than failing the stage (P5); otherwise the first
/// per-item error fails the stage exactly like any other worker error.
pub fn as_map_stage<T, F>(
    name: impl Into<String>,
    workers: usize,
    qsize: usize,
    filter_errors: bool,
    f: F,
) -> Result<Stage<T>, StageConfigError>
where
    T: Send + 'static,
    F: Fn(T) -> Result<T, BoxError> + Send + Sync + 'static,
{
    let name = name.into();
    let stage_name = name.clone();
    let f = Arc::new(f);
    let stage = Stage::transformer(name, move |input| MapIter {
        input,
        f: Arc::clone(&f),
        filter_errors,
        stage_name: stage_name.clone(),
    });
    stage.setup(workers, qsize)
}

/// Iterator driving a per-item map function over an input stream, used by
/// [`as_map_stage`]. One worker's output-channel `Item` passes through
/// unchanged; a failing item either stops the iterator (propagating the
/// error like any other worker failure) or is dropped, per `filter_errors`.
struct MapIter<T, F> {
    input: Box<dyn Iterator<Item = T> + Send>,
    f: Arc<F>,
    filter_errors: bool,
    stage_name: String,
}

impl<T, F> Iterator for MapIter<T, F>
where
    F: Fn(T) -> Result<T, BoxError>,
{
    type Item = Result<T, BoxError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.input.next()?;
            match (self.f)(item) {
                Ok(mapped) => return Some(Ok(mapped)),
                Err(cause) if self.filter_errors => {
                    tracing::warn!(stage = %self.stage_name, error = %cause, "dropping item that failed per-item mapping");
                }
                Err(cause) => return Some(Err(cause)),
            }
        }
    }
}
