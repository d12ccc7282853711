//! Outbound backlog used while no channel is ready.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::engine::Payload;

/// A message waiting for an open active channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Message body.
    pub payload: Payload,
    /// When it was first queued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Stamp `payload` with the current time.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO of undelivered messages.
///
/// No deduplication and no priorities. Items leave only through
/// [`pop_front`](Self::pop_front); a failed delivery puts the same item back
/// with [`push_front`](Self::push_front), so nothing is duplicated or lost.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail.
    pub fn enqueue(&mut self, message: QueuedMessage) {
        self.items.push_back(message);
    }

    /// Take the head.
    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    /// Return an undelivered head item.
    pub fn push_front(&mut self, message: QueuedMessage) {
        self.items.push_front(message);
    }

    /// Peek at the head.
    pub fn front(&self) -> Option<&QueuedMessage> {
        self.items.front()
    }

    /// Peek at the tail.
    pub fn back(&self) -> Option<&QueuedMessage> {
        self.items.back()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> QueuedMessage {
        QueuedMessage::new(Payload::Text(s.to_string()))
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new();
        queue.enqueue(text("A"));
        queue.enqueue(text("B"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().map(|m| m.payload), Some(Payload::Text("A".into())));
        assert_eq!(queue.pop_front().map(|m| m.payload), Some(Payload::Text("B".into())));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut queue = MessageQueue::new();
        queue.enqueue(text("same"));
        queue.enqueue(text("same"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_push_front_restores_head() {
        let mut queue = MessageQueue::new();
        queue.enqueue(text("A"));
        queue.enqueue(text("B"));
        let head = queue.pop_front().unwrap();
        let stamp = head.enqueued_at;
        queue.push_front(head);
        let front = queue.front().unwrap();
        assert_eq!(front.payload, Payload::Text("A".into()));
        assert_eq!(front.enqueued_at, stamp);
        assert_eq!(queue.back().map(|m| &m.payload), Some(&Payload::Text("B".into())));
    }
}
