//! Worker (C2): one isolated execution unit running a stage's user callable.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, trace, warn};

use crate::channel::{ChannelIter, Outbox};
use crate::error::{BoxError, WorkerFailure};
use crate::stage::Target;

/// Drive one worker to completion: invoke the user callable, forward its
/// output, and unconditionally run the finalizer (§4.2).
///
/// `input` is `None` for a producer and `Some` for a transformer. `outbox`
/// owns the stage's output channel and the number of `End` sentinels this
/// worker owes it; `err_outbox` owns this worker's single slot on the
/// shared error channel.
pub(crate) fn run_worker<T: Send + 'static>(
    name: String,
    target: Target<T>,
    input: Option<ChannelIter<T>>,
    outbox: Outbox<T>,
    err_outbox: Outbox<WorkerFailure>,
) {
    trace!(worker = %name, "starting");

    // A private handle sharing the same underlying channel and End-counter
    // as whatever `input` the user callable consumes. If the callable fails
    // partway through, this handle drains whatever is left so an upstream
    // sender blocked on a full (or rendezvous) channel is freed (§4.2 step 4).
    let drain_handle = input.clone();

    let outcome = catch_unwind(AssertUnwindSafe(|| run_body(&target, input, &outbox)));

    match outcome {
        Ok(Ok(())) => {
            debug!(worker = %name, "finished");
        }
        Ok(Err(cause)) => {
            warn!(worker = %name, error = %cause, "raised an error");
            err_outbox.send(WorkerFailure {
                worker: name.clone(),
                cause,
            });
            drain(drain_handle);
        }
        Err(panic) => {
            let message = panic_message(panic);
            error!(worker = %name, error = %message, "panicked");
            err_outbox.send(WorkerFailure {
                worker: name.clone(),
                cause: Box::new(WorkerPanic(message)),
            });
            drain(drain_handle);
        }
    }

    // Finalizer: always runs, success or failure (I3).
    outbox.finish();
    err_outbox.finish();
}

/// Invoke the callable and stream every item it yields straight to
/// `outbox`. On the first `Err` from the callable's iterator, stop -- a
/// Rust iterator is never resumed after yielding an error, the same way a
/// Python generator can't be resumed after raising.
fn run_body<T: Send + 'static>(
    target: &Target<T>,
    input: Option<ChannelIter<T>>,
    outbox: &Outbox<T>,
) -> Result<(), BoxError> {
    let result_iter = match target {
        Target::Producer(f) => f(),
        Target::Transformer(f) => {
            let input =
                input.expect("transformer worker must be given an input channel reader");
            f(Box::new(input))
        }
    };

    for item in result_iter {
        match item {
            Ok(value) => {
                // A disconnected receiver means nothing downstream will
                // ever see further payloads; stop producing them rather
                // than continuing to drive a callable nobody is reading.
                if !outbox.send(value) {
                    break;
                }
            }
            Err(cause) => return Err(cause),
        }
    }
    Ok(())
}

fn drain<T>(handle: Option<ChannelIter<T>>) {
    if let Some(mut iter) = handle {
        for _ in &mut iter {}
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

#[derive(Debug)]
struct WorkerPanic(String);

impl std::fmt::Display for WorkerPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for WorkerPanic {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{stage_channel, Slot};
    use std::sync::Arc;

    fn collect_output<T>(rx: flume::Receiver<Slot<T>>, expected_senders: usize) -> Vec<T> {
        ChannelIter::new(rx, expected_senders).collect()
    }

    #[test]
    fn producer_worker_emits_items_then_ends() {
        let (tx, rx) = stage_channel::<i32>(10);
        let (err_tx, err_rx) = stage_channel::<WorkerFailure>(10);
        let target = Target::Producer(Arc::new(|| {
            Box::new((0..5).map(Ok)) as crate::stage::ResultIter<i32>
        }));

        run_worker(
            "producer-0".into(),
            target,
            None,
            Outbox::new(tx, 1),
            Outbox::new(err_tx, 1),
        );

        let items = collect_output(rx, 1);
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert!(collect_output(err_rx, 1).is_empty());
    }

    #[test]
    fn failing_worker_reports_error_and_still_emits_ends() {
        let (tx, rx) = stage_channel::<i32>(10);
        let (err_tx, err_rx) = stage_channel::<WorkerFailure>(10);
        let target = Target::Producer(Arc::new(|| {
            Box::new((0..3).map(|i| {
                if i == 2 {
                    Err(Box::new(WorkerPanic("boom".into())) as BoxError)
                } else {
                    Ok(i)
                }
            })) as crate::stage::ResultIter<i32>
        }));

        run_worker(
            "producer-0".into(),
            target,
            None,
            Outbox::new(tx, 2),
            Outbox::new(err_tx, 1),
        );

        let items = collect_output(rx, 2);
        assert_eq!(items, vec![0, 1]);

        let failures = collect_output(err_rx, 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].worker, "producer-0");
        assert_eq!(failures[0].cause.to_string(), "boom");
    }

    #[test]
    fn panicking_worker_is_reported_not_propagated() {
        let (tx, rx) = stage_channel::<i32>(10);
        let (err_tx, err_rx) = stage_channel::<WorkerFailure>(10);
        let target = Target::Producer(Arc::new(|| {
            Box::new(std::iter::once_with(|| -> Result<i32, BoxError> {
                panic!("unexpected");
            })) as crate::stage::ResultIter<i32>
        }));

        run_worker(
            "producer-0".into(),
            target,
            None,
            Outbox::new(tx, 1),
            Outbox::new(err_tx, 1),
        );

        assert!(collect_output(rx, 1).is_empty());
        let failures = collect_output(err_rx, 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].worker, "producer-0");
    }

    #[test]
    fn transformer_drains_remaining_input_after_failure() {
        let (up_tx, up_rx) = stage_channel::<i32>(10);
        for i in 0..5 {
            up_tx.send(Slot::Item(i)).unwrap();
        }
        up_tx.send(Slot::End).unwrap();
        drop(up_tx);

        let (tx, rx) = stage_channel::<i32>(10);
        let (err_tx, err_rx) = stage_channel::<WorkerFailure>(10);

        let target = Target::Transformer(Arc::new(|input| {
            Box::new(input.map(|item| {
                if item == 2 {
                    Err(Box::new(WorkerPanic("failed at 2".into())) as BoxError)
                } else {
                    Ok(item)
                }
            })) as crate::stage::ResultIter<i32>
        }));

        run_worker(
            "transform-0".into(),
            target,
            Some(ChannelIter::new(up_rx, 1)),
            Outbox::new(tx, 1),
            Outbox::new(err_tx, 1),
        );

        let items = collect_output(rx, 1);
        assert_eq!(items, vec![0, 1]);
        let failures = collect_output(err_rx, 1);
        assert_eq!(failures.len(), 1);
    }
}
