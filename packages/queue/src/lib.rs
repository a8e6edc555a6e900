//! Durable work queue access for the font worker.
//!
//! The consumer only needs three operations: receive at most one message,
//! delete it once the job is fully done, and forward it to a dead-letter queue
//! when it has been redelivered too often. Two backends implement them:
//!
//! - [`SqsQueue`] - Amazon SQS (or any SQS-compatible endpoint)
//! - [`MemoryQueue`] - in-process queue with redelivery, for tests and local runs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

mod memory;
mod sqs;

pub use memory::MemoryQueue;
pub use sqs::{SqsConfig, SqsQueue};

/// Future type for object-safe async queue calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid queue config: {0}")]
    InvalidConfig(String),

    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("message {0} carries no receipt handle")]
    MissingReceipt(String),

    #[error("unknown or expired receipt handle: {0}")]
    UnknownReceipt(String),
}

/// A message pulled from the queue, not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Token that acknowledges this particular delivery.
    pub receipt_handle: String,
    pub body: String,
    /// How many times the queue has handed this message out, this delivery included.
    pub receive_count: u32,
}

/// What happened to a message given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetter {
    /// Copied to the dead-letter queue.
    Forwarded,
    /// No dead-letter queue is configured; nothing was copied.
    NotConfigured,
}

/// At-least-once queue used by the consumer loop.
pub trait WorkQueue: Send + Sync + 'static {
    /// Wait up to `wait` for at most one message.
    fn receive(&self, wait: Duration) -> BoxFuture<'_, Result<Option<ReceivedMessage>, QueueError>>;

    /// Acknowledge a delivery; the message will not be redelivered.
    fn delete<'a>(&'a self, message: &'a ReceivedMessage) -> BoxFuture<'a, Result<(), QueueError>>;

    /// Copy a message body to the dead-letter queue, if there is one.
    ///
    /// Does not delete the original delivery.
    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> BoxFuture<'a, Result<DeadLetter, QueueError>>;
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
