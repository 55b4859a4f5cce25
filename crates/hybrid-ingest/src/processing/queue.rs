//! Bounded, completion-signalling queue between pipeline stages
//!
//! Wraps a `tokio::sync::mpsc` channel. The receiver is shared by every
//! consumer of the stage; the producer side is dropped by `mark_done`, after
//! which consumers drain the remaining items and then observe
//! `QueueMessage::Done` on every further `get`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unit of work moved from one stage to the next
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem<T> {
    pub id: Uuid,
    /// Ordinal position in the producer's sequence
    pub index: usize,
    pub document_id: Uuid,
    pub payload: T,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl<T> QueueItem<T> {
    pub fn new(index: usize, document_id: Uuid, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            document_id,
            payload,
            metadata: serde_json::Map::new(),
        }
    }

    /// Carry identifiers and metadata over to the next stage's payload
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueueItem<U> {
        QueueItem {
            id: self.id,
            index: self.index,
            document_id: self.document_id,
            payload: f(self.payload),
            metadata: self.metadata,
        }
    }
}

/// Result of a `get`
#[derive(Debug, PartialEq)]
pub enum QueueMessage<T> {
    Item(T),
    /// The producer called `mark_done` and the queue is drained
    Done,
}

/// Bounded multi-consumer queue
pub struct StageQueue<T> {
    name: String,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<T>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<T>>,
    len: AtomicUsize,
}

impl<T: Send> StageQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            capacity,
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueue an item, waiting while the queue is full
    pub async fn put(&self, item: T) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| Error::QueueClosed(self.name.clone()))?;

        let permit = sender
            .reserve()
            .await
            .map_err(|_| Error::QueueClosed(self.name.clone()))?;
        self.len.fetch_add(1, Ordering::SeqCst);
        permit.send(item);
        Ok(())
    }

    /// Dequeue the next item, waiting while the queue is empty.
    ///
    /// Returns `Done` once `mark_done` was called and every item enqueued
    /// before it has been handed out.
    pub async fn get(&self) -> QueueMessage<T> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Some(item) => {
                self.len.fetch_sub(1, Ordering::SeqCst);
                QueueMessage::Item(item)
            }
            None => QueueMessage::Done,
        }
    }

    /// Signal that no more items will be put
    pub fn mark_done(&self) {
        if self.sender.lock().take().is_some() {
            tracing::debug!("Queue '{}' marked done ({} items pending)", self.name, self.len());
        }
    }

    pub fn is_done(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
