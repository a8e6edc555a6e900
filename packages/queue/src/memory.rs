//! In-process queue with SQS-like delivery semantics.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{BoxFuture, DeadLetter, QueueError, ReceivedMessage, WorkQueue};

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    id: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    ready: VecDeque<StoredMessage>,
    /// Deliveries handed out and not yet deleted, by receipt handle.
    in_flight: HashMap<String, StoredMessage>,
    deleted: Vec<String>,
    dead_letters: Vec<String>,
    next_id: u64,
    next_receipt: u64,
}

/// Queue kept in memory.
///
/// Received messages stay in flight until deleted; [`MemoryQueue::expire_in_flight`]
/// plays the part of the visibility timeout and makes them receivable again.
/// `receive` never blocks: an empty queue answers `None` straight away.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    dead_letter_enabled: bool,
}

impl MemoryQueue {
    /// Create an empty queue with a dead-letter queue attached.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            dead_letter_enabled: true,
        }
    }

    /// Create an empty queue without a dead-letter queue.
    pub fn without_dead_letter() -> Self {
        Self {
            dead_letter_enabled: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a message body and return its message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("msg-{}", state.next_id);
        let seq = state.next_id;
        state.ready.push_back(StoredMessage {
            seq,
            id: id.clone(),
            body: body.into(),
            receive_count: 0,
        });
        id
    }

    /// Return every undeleted delivery to the front of the queue.
    pub fn expire_in_flight(&self) {
        let mut state = self.lock();
        let mut expired: Vec<StoredMessage> = state.in_flight.drain().map(|(_, m)| m).collect();
        expired.sort_by(|a, b| b.seq.cmp(&a.seq));
        for message in expired {
            state.ready.push_front(message);
        }
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Messages received but neither deleted nor expired.
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Ids of deleted messages, in deletion order.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Bodies forwarded to the dead-letter queue.
    pub fn dead_letters(&self) -> Vec<String> {
        self.lock().dead_letters.clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue for MemoryQueue {
    fn receive(&self, _wait: Duration) -> BoxFuture<'_, Result<Option<ReceivedMessage>, QueueError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let Some(mut message) = state.ready.pop_front() else {
                return Ok(None);
            };
            message.receive_count += 1;
            state.next_receipt += 1;
            let receipt_handle = format!("{}-r{}", message.id, state.next_receipt);
            let received = ReceivedMessage {
                message_id: message.id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
                receive_count: message.receive_count,
            };
            state.in_flight.insert(receipt_handle, message);
            Ok(Some(received))
        })
    }

    fn delete<'a>(&'a self, message: &'a ReceivedMessage) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let stored = state
                .in_flight
                .remove(&message.receipt_handle)
                .ok_or_else(|| QueueError::UnknownReceipt(message.receipt_handle.clone()))?;
            state.deleted.push(stored.id);
            Ok(())
        })
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> BoxFuture<'a, Result<DeadLetter, QueueError>> {
        Box::pin(async move {
            if !self.dead_letter_enabled {
                return Ok(DeadLetter::NotConfigured);
            }
            self.lock().dead_letters.push(message.body.clone());
            Ok(DeadLetter::Forwarded)
        })
    }
}
