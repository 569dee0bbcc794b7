//! Bounded work queues with acknowledgement tracking
//!
//! [`WorkQueue`] is a multi-producer, multi-consumer FIFO with a fixed
//! capacity. Producers block in [`WorkQueue::put`] while the queue is full,
//! which is how backpressure travels from the writer back to the feeder.
//!
//! Every delivered message comes with an [`Ack`]. The queue counts messages
//! that were put but not yet acknowledged, and [`WorkQueue::join`] waits for
//! that count to reach zero. Dropping the [`Ack`] acknowledges, so a consumer
//! cannot forget to do it on an early return.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,

    #[error("queue capacity must be greater than 0")]
    ZeroCapacity,
}

/// A queue entry: real work, or the marker telling one consumer to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    Item(T),
    Shutdown,
}

/// Bounded FIFO shared by cloning
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    buffer: Mutex<VecDeque<Message<T>>>,
    /// Free slots; producers wait here when the queue is full
    slots: Semaphore,
    /// Buffered messages; consumers wait here when the queue is empty
    filled: Semaphore,
    capacity: usize,
    unfinished: watch::Sender<usize>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn bounded(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        let (unfinished, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(VecDeque::with_capacity(capacity)),
                slots: Semaphore::new(capacity),
                filled: Semaphore::new(0),
                capacity,
                unfinished,
            }),
        })
    }

    /// Enqueue a message, waiting for a free slot
    ///
    /// Cancel safe: if the future is dropped before it completes, nothing
    /// was enqueued.
    pub async fn put(&self, message: Message<T>) -> Result<(), QueueError> {
        let slot = self
            .inner
            .slots
            .acquire()
            .await
            .map_err(|_| QueueError::Closed)?;
        slot.forget();

        self.inner.unfinished.send_modify(|n| *n += 1);
        self.inner.lock().push_back(message);
        self.inner.filled.add_permits(1);
        Ok(())
    }

    /// Dequeue the oldest message, waiting while the queue is empty
    pub async fn get(&self) -> Result<(Message<T>, Ack), QueueError> {
        let item = self
            .inner
            .filled
            .acquire()
            .await
            .map_err(|_| QueueError::Closed)?;
        item.forget();

        let message = self.inner.lock().pop_front().ok_or(QueueError::Closed)?;
        self.inner.slots.add_permits(1);

        let ack = Ack {
            inner: Arc::clone(&self.inner) as Arc<dyn Acknowledge>,
        };
        Ok((message, ack))
    }

    /// Wait until every message put so far has been acknowledged
    pub async fn join(&self) -> Result<(), QueueError> {
        let mut unfinished = self.inner.unfinished.subscribe();
        unfinished
            .wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|_| QueueError::Closed)
    }

    /// Messages currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Messages put but not yet acknowledged
    pub fn unfinished(&self) -> usize {
        *self.inner.unfinished.borrow()
    }
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Message<T>>> {
        // The buffer is never left half-modified, so a poisoned lock is still usable
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

trait Acknowledge: Send + Sync {
    fn task_done(&self);
}

impl<T: Send> Acknowledge for Inner<T> {
    fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Acknowledges one delivered message when dropped
#[must_use = "dropping the ack immediately marks the message as processed"]
pub struct Ack {
    inner: Arc<dyn Acknowledge>,
}

impl Ack {
    /// Acknowledge explicitly
    pub fn done(self) {}
}

impl Drop for Ack {
    fn drop(&mut self) {
        self.inner.task_done();
    }
}

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ack").finish_non_exhaustive()
    }
}
