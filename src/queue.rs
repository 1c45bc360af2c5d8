//! Bounded frame queue between the capture thread and the pipeline thread.
//!
//! - `FrameSender`: capture side. `put` never blocks; a full queue drops the frame.
//! - `FrameReceiver`: pipeline side. `get` blocks until a frame arrives or the
//!   sender has closed and everything queued has been handed out.
//!
//! The length check and the enqueue are one atomic operation (a bounded
//! crossbeam channel), so the queue can never hold more than `capacity` frames.
//! There is one sender and one receiver and neither is `Clone`: every frame is
//! delivered to exactly one `get`.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::frame::Frame;

#[derive(Debug)]
struct QueueShared {
    capacity: usize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Result of a `put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Enqueued,
    /// The queue was full (or the consumer is gone); the frame was released.
    Dropped,
}

/// Result of a bounded wait on the receiver.
#[derive(Debug)]
pub enum GetOutcome {
    Frame(Frame),
    /// Nothing arrived within the wait. Capture may still be running.
    Empty,
    /// The sender closed and the queue is empty. No further frames will come.
    Drained,
}

/// Create a queue holding at most `capacity` frames.
pub fn frame_queue(capacity: usize) -> Result<(FrameSender, FrameReceiver)> {
    if capacity == 0 {
        return Err(anyhow!("queue capacity must be at least 1"));
    }
    let (tx, rx) = bounded(capacity);
    let shared = Arc::new(QueueShared {
        capacity,
        enqueued: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });
    Ok((
        FrameSender {
            tx,
            shared: shared.clone(),
        },
        FrameReceiver { rx, shared },
    ))
}

/// Producer handle. Dropping it (or calling `close`) marks capture as stopped.
#[derive(Debug)]
pub struct FrameSender {
    tx: Sender<Frame>,
    shared: Arc<QueueShared>,
}

impl FrameSender {
    /// Enqueue a frame if there is room. Never blocks.
    pub fn put(&self, frame: Frame) -> PutOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
                PutOutcome::Enqueued
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                PutOutcome::Dropped
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn enqueued(&self) -> u64 {
        self.shared.enqueued.load(Ordering::Relaxed)
    }

    /// Stop producing. Frames already queued stay available to the receiver.
    pub fn close(self) {}
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        // Runs before `tx` is dropped: once the receiver sees `closed`, every
        // successful `put` is already in the channel.
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

/// Consumer handle.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: Receiver<Frame>,
    shared: Arc<QueueShared>,
}

impl FrameReceiver {
    /// Block until a frame is available. `None` once the sender closed and the
    /// queue is empty.
    pub fn get(&self) -> Option<Frame> {
        self.rx.recv().ok()
    }

    /// Wait at most `wait` for a frame.
    pub fn get_timeout(&self, wait: Duration) -> GetOutcome {
        match self.rx.recv_timeout(wait) {
            Ok(frame) => GetOutcome::Frame(frame),
            Err(RecvTimeoutError::Timeout) => GetOutcome::Empty,
            Err(RecvTimeoutError::Disconnected) => GetOutcome::Drained,
        }
    }

    /// Pop a frame if one is queued right now.
    pub fn try_get(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// True once the sender has been closed or dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn enqueued(&self) -> u64 {
        self.shared.enqueued.load(Ordering::Relaxed)
    }
}
