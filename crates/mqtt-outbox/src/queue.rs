//! In-memory queue of encoded events awaiting delivery.

use crate::error::{OutboxError, OutboxResult};
use crate::event::Event;
use std::collections::VecDeque;

/// An encoded event waiting to be published.
///
/// The source event is kept so the topic can be rendered at publish time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub event: Event,
    pub payload: Vec<u8>,
}

impl PendingItem {
    pub fn new(event: Event, payload: Vec<u8>) -> Self {
        Self { event, payload }
    }
}

/// FIFO buffer of pending items.
///
/// Items leave the queue only through [`EventQueue::pop_first`], which the
/// publish driver calls after the broker accepted the head item. Unbounded
/// unless built with [`EventQueue::bounded`].
#[derive(Debug, Default)]
pub struct EventQueue {
    items: VecDeque<PendingItem>,
    capacity: Option<usize>,
}

impl EventQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: Some(capacity),
        }
    }

    /// Create a queue from an optional bound.
    pub fn with_capacity_limit(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::new(),
        }
    }

    /// Check that `incoming` more items fit.
    pub fn ensure_room(&self, incoming: usize) -> OutboxResult<()> {
        match self.capacity {
            Some(capacity) if self.items.len() + incoming > capacity => {
                Err(OutboxError::QueueFull {
                    pending: self.items.len(),
                    incoming,
                    capacity,
                })
            }
            _ => Ok(()),
        }
    }

    /// Append an item at the tail.
    pub fn push(&mut self, item: PendingItem) -> OutboxResult<()> {
        self.ensure_room(1)?;
        self.items.push_back(item);
        Ok(())
    }

    /// The head item, or `None` when empty.
    pub fn peek_first(&self) -> Option<&PendingItem> {
        self.items.front()
    }

    /// Remove and return the head item.
    pub fn pop_first(&mut self) -> Option<PendingItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
