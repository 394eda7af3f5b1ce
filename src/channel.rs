//! Termination-counted channel (C1).
//!
//! A bounded FIFO (`flume`) whose readers additionally know how many `End`
//! sentinels to expect before the stream is truly over. Senders never
//! coordinate among themselves: each just sends its own payloads followed by
//! its own `End`, and a reader tallies `End`s against an expected count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One slot on a termination-counted channel: either a real payload or the
/// private marker meaning "one sender is done". Never constructible outside
/// this crate, so a user item can never be mistaken for one.
pub(crate) enum Slot<T> {
    Item(T),
    End,
}

/// Create a channel of the given capacity. `qsize = 0` is a deliberate
/// rendezvous channel (every `send` blocks until a matching `recv`), not an
/// unbounded one -- see the `qsize = 0` Open Question in DESIGN.md.
pub(crate) fn stage_channel<T>(
    qsize: usize,
) -> (flume::Sender<Slot<T>>, flume::Receiver<Slot<T>>) {
    flume::bounded(qsize)
}

/// Create the pipeline's single, shared, unbounded error channel. Unbounded
/// because a worker reporting a failure must never block on `send`: the
/// driver only starts draining this channel after the sink is fully
/// consumed (§4.5 step 6), by which point every worker has already finished.
pub(crate) fn error_channel<T>() -> (flume::Sender<Slot<T>>, flume::Receiver<Slot<T>>) {
    flume::unbounded()
}

/// An `Outbox` bundles a sender with the number of `End` sentinels it must
/// emit at shutdown -- the `num_followers` of §4.2 for a stage's output
/// channel, or a flat `1` for a worker's own slot on the shared error
/// channel.
pub(crate) struct Outbox<T> {
    sender: flume::Sender<Slot<T>>,
    followers: usize,
}

impl<T> Outbox<T> {
    pub(crate) fn new(sender: flume::Sender<Slot<T>>, followers: usize) -> Self {
        Self { sender, followers }
    }

    /// Send one payload. Returns `false` if the receiving end is gone, in
    /// which case the caller should stop trying to send further payloads
    /// (there is nothing left downstream that would ever see them).
    pub(crate) fn send(&self, item: T) -> bool {
        self.sender.send(Slot::Item(item)).is_ok()
    }

    /// Unconditionally emit every `End` sentinel this outbox owes. Always
    /// called, success or failure (I3).
    pub(crate) fn finish(&self) {
        for _ in 0..self.followers {
            let _ = self.sender.send(Slot::End);
        }
    }
}

/// A lazy reader of a termination-counted channel. Yields payloads until it
/// has observed `expected_senders` `End` markers, then fuses to `None`
/// forever (I1).
///
/// Cloning a `ChannelIter` produces a second handle onto the same underlying
/// queue *and* the same remaining-senders counter -- both handles
/// contribute to, and observe, one shared tally. A worker uses this to keep
/// a private "drain" handle next to the handle it hands to the user
/// callable: after a failure, the worker can keep pulling (and discarding)
/// from the same channel the callable was reading from, regardless of how
/// far the callable's iterator got before it was abandoned (§4.2 step 4).
pub(crate) struct ChannelIter<T> {
    receiver: flume::Receiver<Slot<T>>,
    remaining_senders: Arc<AtomicUsize>,
}

impl<T> ChannelIter<T> {
    pub(crate) fn new(receiver: flume::Receiver<Slot<T>>, expected_senders: usize) -> Self {
        Self {
            receiver,
            remaining_senders: Arc::new(AtomicUsize::new(expected_senders)),
        }
    }
}

impl<T> Clone for ChannelIter<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            remaining_senders: Arc::clone(&self.remaining_senders),
        }
    }
}

impl<T> Iterator for ChannelIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if self.remaining_senders.load(Ordering::Acquire) == 0 {
                return None;
            }
            match self.receiver.recv() {
                Ok(Slot::Item(value)) => return Some(value),
                Ok(Slot::End) => {
                    self.remaining_senders.fetch_sub(1, Ordering::AcqRel);
                }
                // Every expected sender is gone, and we hadn't yet counted
                // down to zero (an invariant violation upstream, e.g. a
                // panic before the finalizer ran) -- treat it the same as
                // stream end rather than blocking forever.
                Err(flume::RecvError::Disconnected) => return None,
            }
        }
    }
}

/// Drain an error channel that collects up to `expected_senders` `End`
/// markers, returning every [`crate::error::WorkerFailure`] item sent before
/// them. Used by the driver only after the sink iterator is exhausted
/// (§4.5 step 6).
pub(crate) fn drain_all<T>(receiver: flume::Receiver<Slot<T>>, expected_senders: usize) -> Vec<T> {
    ChannelIter::new(receiver, expected_senders).collect()
}
