//! Pipeline driver (C4) and sink iterator (C5).

use std::thread::{self, JoinHandle};

use crate::channel::{drain_all, stage_channel, ChannelIter, Outbox};
use crate::error::{PipelineError, WorkerFailure};
use crate::stage::Stage;

/// An ordered, non-empty sequence of stages run as one streaming job (C4).
///
/// Built with [`Pipeline::compose`] or by combining [`Stage`]s and
/// `Pipeline`s with `|` ([`std::ops::BitOr`]); the non-empty invariant
/// (spec "length >= 1") is enforced structurally rather than at runtime,
/// since `compose` always takes a first stage outside the `rest` iterable.
pub struct Pipeline<T> {
    stages: Vec<Stage<T>>,
    label: Option<String>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Compose a pipeline from a first stage and zero or more following
    /// stages, in order.
    pub fn compose(first: Stage<T>, rest: impl IntoIterator<Item = Stage<T>>) -> Self {
        let mut stages = vec![first];
        stages.extend(rest);
        Pipeline {
            stages,
            label: None,
        }
    }

    /// Append one more stage to the end of the pipeline.
    pub fn then(mut self, stage: Stage<T>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Attach a label used to namespace this pipeline's tracing spans.
    /// Purely diagnostic; has no effect on execution.
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Wire every stage's channels, start every worker, and return a lazy
    /// sequence of the pipeline's final outputs (§4.5 steps 1-5).
    ///
    /// Must be fully consumed (or dropped after consumption) to observe a
    /// worker failure: errors are collected and raised only once the sink
    /// is exhausted (§4.5 steps 6-8).
    pub fn results(&self) -> PipelineResults<T> {
        let span = match &self.label {
            Some(label) => tracing::info_span!("pipeline", label = %label),
            None => tracing::info_span!("pipeline"),
        };
        let _enter = span.enter();

        let total_workers: usize = self.stages.iter().map(Stage::workers).sum();
        let (err_tx, err_rx) = crate::channel::error_channel::<WorkerFailure>();

        let mut handles = Vec::with_capacity(total_workers);
        // Each downstream worker gets its own freshly counted `ChannelIter`
        // over a shared `flume::Receiver` clone, not a clone of a shared
        // counter -- every competing reader independently counts up to the
        // same `expected_senders`, and since every End sentinel pulled off
        // the channel is pulled by exactly one reader, the readers'
        // independent counts collectively exhaust the channel with no
        // leftover and no reader left waiting forever (see DESIGN.md).
        let mut upstream: Option<(flume::Receiver<crate::channel::Slot<T>>, usize)> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let is_last = index + 1 == self.stages.len();
            let followers = if is_last {
                1
            } else {
                self.stages[index + 1].workers()
            };
            let (tx, rx) = stage_channel::<T>(stage.qsize());

            for worker_index in 0..stage.workers() {
                let worker_name = format!("{}-{worker_index}", stage.name());
                let target = stage.target.clone();
                let outbox = Outbox::new(tx.clone(), followers);
                let err_outbox = Outbox::new(err_tx.clone(), 1);
                let input = upstream
                    .as_ref()
                    .map(|(receiver, senders)| ChannelIter::new(receiver.clone(), *senders));

                let handle = thread::Builder::new()
                    .name(worker_name.clone())
                    .spawn(move || {
                        crate::worker::run_worker(worker_name, target, input, outbox, err_outbox)
                    })
                    .expect("spawning a pipeline worker thread should not fail");
                handles.push(handle);
            }

            upstream = Some((rx, stage.workers()));
        }

        let (sink_receiver, sink_senders) = upstream.expect("pipeline always has >= 1 stage");

        PipelineResults {
            sink: ChannelIter::new(sink_receiver, sink_senders),
            err_rx,
            total_workers,
            handles: Some(handles),
            done: false,
        }
    }

    /// Drive [`Pipeline::results`] to exhaustion and return only the last
    /// item produced, or `None` if the pipeline produced nothing.
    pub fn execute(&self) -> Result<Option<T>, PipelineError> {
        let mut last = None;
        for item in self.results() {
            last = Some(item?);
        }
        Ok(last)
    }
}

impl<T: Send + 'static> std::ops::BitOr<Stage<T>> for Stage<T> {
    type Output = Pipeline<T>;

    fn bitor(self, rhs: Stage<T>) -> Pipeline<T> {
        Pipeline::compose(self, [rhs])
    }
}

impl<T: Send + 'static> std::ops::BitOr<Stage<T>> for Pipeline<T> {
    type Output = Pipeline<T>;

    fn bitor(self, rhs: Stage<T>) -> Pipeline<T> {
        self.then(rhs)
    }
}

impl<T: Send + 'static> std::ops::BitOr<Pipeline<T>> for Pipeline<T> {
    type Output = Pipeline<T>;

    fn bitor(mut self, rhs: Pipeline<T>) -> Pipeline<T> {
        self.stages.extend(rhs.stages);
        self
    }
}

/// Build the implicit identity-producer stage used when a bare iterable is
/// composed in front of a pipeline (§6: "a Pipeline concatenated with a bare
/// iterable uses that iterable as the producer of an implicit first stage").
///
/// Rust's orphan rules forbid implementing `BitOr<Stage<T>>` for an
/// arbitrary foreign `I: IntoIterator`, so this is a named function rather
/// than operator sugar (see DESIGN.md). The resulting stage has a single
/// worker, matching the source's default `Stage(producer, iterable)` with no
/// explicit `.setup()` call.
pub fn from_iterable<T, I>(name: impl Into<String>, iterable: I) -> Stage<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
{
    Stage::producer(name, move || iterable.clone().into_iter().map(Ok))
}

/// The caller-visible lazy sequence of a pipeline's final outputs (C5).
///
/// Ordinary items surface as `Ok(T)`. If one or more workers failed, the
/// very last item this iterator yields is `Err(PipelineError)`; after that
/// it is fused and yields `None` forever. Dropping a `PipelineResults`
/// before exhaustion never joins its worker threads or raises an error --
/// cancellation is unsupported by design (§4.6).
pub struct PipelineResults<T> {
    sink: ChannelIter<T>,
    err_rx: flume::Receiver<crate::channel::Slot<WorkerFailure>>,
    total_workers: usize,
    handles: Option<Vec<JoinHandle<()>>>,
    done: bool,
}

impl<T> Iterator for PipelineResults<T> {
    type Item = Result<T, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(item) = self.sink.next() {
            return Some(Ok(item));
        }

        self.done = true;
        let failures = drain_all(self.err_rx.clone(), self.total_workers);

        if let Some(handles) = self.handles.take() {
            for handle in handles {
                let _ = handle.join();
            }
        }

        if failures.is_empty() {
            None
        } else {
            Some(Err(PipelineError::from_failures(failures)))
        }
    }
}
