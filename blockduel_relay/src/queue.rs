// Bounded outbound FIFO shared between a producer and one sender thread.
//
// Every connection (relay side) and every channel (client side) owns one
// `OutboundQueue<Command>`. Producers never block: when the queue is full the
// oldest pending item is discarded to make room, the drop is counted and
// logged. The sender thread blocks in `pop_blocking` until an item arrives or
// the queue is closed.
//
// Closing is one-way. After `close()` pushes are refused, and `pop_blocking`
// keeps returning what is already queued before reporting `None`, so a final
// `Disconnect` pushed just before closing still reaches the socket.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::warn;

/// What `push` did with the item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// Queued after discarding the oldest pending item.
    DroppedOldest,
    /// The queue is closed; the item was discarded.
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

pub struct OutboundQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> OutboundQueue<T> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) -> Pushed {
        let mut inner = self.lock();
        if inner.closed {
            return Pushed::Closed;
        }
        let mut outcome = Pushed::Queued;
        if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
            warn!(
                "outbound queue full ({} items), dropped oldest ({} dropped so far)",
                self.capacity, inner.dropped
            );
            outcome = Pushed::DroppedOldest;
        }
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
        outcome
    }

    /// Block until an item is available. Returns `None` once the queue is
    /// closed and drained.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Take everything currently queued without blocking.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    /// Items discarded by drop-oldest since creation.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
