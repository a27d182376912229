//! Bounded per-output chunk queue.
//!
//! ```text
//!   InputDriver ──insert──► [ ring of N slots ] ──take_next──► OutputDriver
//!                                  │
//!                         terminal sentinel (END / KILL), held beside the ring
//! ```
//!
//! The ring keeps one slot unused to tell full from empty and the consumer
//! holds the slot it read last, so at most `N - 2` chunks are queued.
//! `insert` never blocks: a full queue drops the chunk and reports
//! [`QueueError::Overflow`]. The source and every other destination carry on.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Notify;

pub const DEFAULT_SLOTS: usize = 128;
pub const DEFAULT_SLOT_SIZE: usize = 1024;

/// Content of a queue slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    Data(Bytes),
    /// Graceful end of stream.
    End,
    /// Forced termination.
    Kill,
}

impl Chunk {
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Chunk::Data(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue {queue} overflow, chunk dropped")]
    Overflow { queue: String },
    #[error("queue {queue} already holds its final sentinel")]
    Sealed { queue: String },
    #[error("queue {queue} has no consumer")]
    Detached { queue: String },
    #[error("chunk of {len} bytes exceeds slot size {slot_size}")]
    Oversized { len: usize, slot_size: usize },
}

struct Ring {
    slots: Vec<Option<Chunk>>,
    producer: usize,
    consumer: usize,
    terminal: Option<Chunk>,
    // sentinel already handed to the consumer
    finished: bool,
    detached: bool,
}

impl Ring {
    fn is_full(&self) -> bool {
        (self.producer + 1) % self.slots.len() == self.consumer
    }

    fn is_empty(&self) -> bool {
        (self.consumer + 1) % self.slots.len() == self.producer
    }

    fn len(&self) -> usize {
        let n = self.slots.len();
        (self.producer + n - self.consumer - 1) % n
    }
}

pub struct BoundedQueue {
    name: String,
    slot_size: usize,
    ring: Mutex<Ring>,
    not_empty: Notify,
}

impl BoundedQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_SLOTS, DEFAULT_SLOT_SIZE)
    }

    /// `slots` is clamped to at least 3 so that one chunk always fits.
    pub fn with_capacity(name: impl Into<String>, slots: usize, slot_size: usize) -> Self {
        let slots = slots.max(3);
        Self {
            name: name.into(),
            slot_size,
            ring: Mutex::new(Ring {
                slots: vec![None; slots],
                producer: 0,
                consumer: slots - 1,
                terminal: None,
                finished: false,
                detached: false,
            }),
            not_empty: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of chunks that fit before the queue reports overflow.
    pub fn capacity(&self) -> usize {
        self.lock().slots.len() - 2
    }

    /// Queued data chunks, not counting a pending sentinel.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    /// Enqueue a chunk without blocking.
    ///
    /// Data goes into the ring and is dropped if the ring is full. A sentinel
    /// never competes for a slot: it seals the queue and is yielded after all
    /// data queued before it.
    pub fn insert(&self, chunk: Chunk) -> Result<(), QueueError> {
        let mut ring = self.lock();
        if ring.detached {
            return Err(QueueError::Detached {
                queue: self.name.clone(),
            });
        }
        if ring.terminal.is_some() {
            return Err(QueueError::Sealed {
                queue: self.name.clone(),
            });
        }

        let was_empty = ring.is_empty();
        match chunk {
            Chunk::Data(data) => {
                if data.len() > self.slot_size {
                    return Err(QueueError::Oversized {
                        len: data.len(),
                        slot_size: self.slot_size,
                    });
                }
                if ring.is_full() {
                    return Err(QueueError::Overflow {
                        queue: self.name.clone(),
                    });
                }
                let at = ring.producer;
                ring.slots[at] = Some(Chunk::Data(data));
                ring.producer = (at + 1) % ring.slots.len();
            }
            sentinel => ring.terminal = Some(sentinel),
        }
        drop(ring);

        if was_empty {
            self.not_empty.notify_one();
        }
        Ok(())
    }

    /// Take the next chunk without waiting.
    pub fn try_take(&self) -> Option<Chunk> {
        let mut ring = self.lock();
        if !ring.is_empty() {
            let at = (ring.consumer + 1) % ring.slots.len();
            ring.consumer = at;
            return ring.slots[at].clone();
        }
        if let Some(sentinel) = ring.terminal.clone() {
            ring.finished = true;
            return Some(sentinel);
        }
        None
    }

    /// Wait for and take the next chunk.
    ///
    /// Once a sentinel has been taken, every further call yields it again.
    pub async fn take_next(&self) -> Chunk {
        loop {
            if let Some(chunk) = self.try_take() {
                return chunk;
            }
            // A permit stored by an insert racing this check wakes us at once.
            self.not_empty.notified().await;
        }
    }

    /// Payload of the chunk most recently taken, valid until the next take.
    pub fn current_payload(&self) -> Option<Bytes> {
        let ring = self.lock();
        if ring.finished {
            return None;
        }
        match &ring.slots[ring.consumer] {
            Some(Chunk::Data(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Whether the sentinel has been handed to the consumer.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Mark the consumer as gone; later inserts fail with [`QueueError::Detached`].
    pub fn detach(&self) {
        let mut ring = self.lock();
        ring.detached = true;
        let n = ring.slots.len();
        ring.consumer = (ring.producer + n - 1) % n;
        for slot in ring.slots.iter_mut() {
            *slot = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
