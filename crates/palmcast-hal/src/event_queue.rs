//! Bounded single-consumer event queue between a tracking source and the
//! dispatch loop.
//!
//! Uses a [`tokio::sync::mpsc`] channel so the producing side never blocks:
//! sources typically call [`EventSink::emit`] from a vendor thread that must
//! not be held up.  When the queue is full the new event is dropped and
//! counted; the next frame supersedes it anyway.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use crate::source::SourceEvent;

/// Default queue capacity (events buffered before new ones are dropped).
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Create a bounded queue holding at most `capacity` events.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn event_queue(capacity: usize) -> (EventSink, EventReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSink {
            sender,
            dropped: Arc::clone(&dropped),
        },
        EventReceiver { receiver, dropped },
    )
}

/// Producer half.  Clone it cheaply; all clones feed the same queue.
#[derive(Clone, Debug)]
pub struct EventSink {
    sender: mpsc::Sender<SourceEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Push `event` without blocking.
    ///
    /// Returns `true` if the event was queued.  A full queue drops the event
    /// and bumps the drop counter; a closed queue (consumer gone) drops it
    /// silently.
    pub fn emit(&self, event: SourceEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = total, "event queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("event queue closed, discarding event");
                false
            }
        }
    }

    /// `true` once the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer half, owned by the dispatch loop.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::Receiver<SourceEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Wait for the next event.  Returns `None` once every [`EventSink`] has
    /// been dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<SourceEvent> {
        self.receiver.recv().await
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting new events.  Already queued events can still be read.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
