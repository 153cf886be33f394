//! Per-connection message queue
//!
//! A FIFO byte-buffer queue owned exclusively by one connection. The queue
//! absorbs backpressure between the client-facing session and the backend
//! socket: the session layer enqueues, the relay write path dequeues.
//! Ownership of a message transfers to the consumer on dequeue.
//!
//! The queue is unbounded; the relay path is expected to drain it before
//! resource exhaustion becomes a concern.

use std::collections::VecDeque;

use bytes::Bytes;

/// A single queued payload
#[derive(Debug, Clone)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Create a message from an owned byte buffer
    #[must_use]
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Create a message by copying a slice
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data),
        }
    }

    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Borrow the payload
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

/// FIFO queue of messages, insertion order preserved
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<Message>,
    queued_bytes: usize,
}

impl MessageQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message; O(1), never blocks
    pub fn enqueue(&mut self, msg: Message) {
        self.queued_bytes += msg.len();
        self.items.push_back(msg);
    }

    /// Remove and return the head; O(1), never blocks
    pub fn dequeue(&mut self) -> Option<Message> {
        let msg = self.items.pop_front();
        if let Some(ref m) = msg {
            self.queued_bytes -= m.len();
        }
        msg
    }

    /// Check whether the queue holds no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Total payload bytes currently queued
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}
