//! The queue model: an ordered, unbounded buffer of message records.
//!
//! Live messages are kept in FIFO insertion order. A message is either
//! `Pending` (visible, waiting for a consumer) or `InFlight` (held by a
//! consumer under a visibility lock). Depth counts both.
//!
//! In-flight handling goes through [`DeliveryRecord`]s. A record is not
//! cloneable and both [`MessageQueue::commit`] and [`MessageQueue::restore`]
//! consume it, so every dispatch has exactly one outcome.

use crate::id::{ConsumerId, MessageId};
use crate::timer::Millis;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Misuse of the in-flight protocol. Ordinary empty-queue reads are not
/// errors; they return `None`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("message not found: {0:?}")]
    NotFound(MessageId),
    #[error("message {0:?} is not pending")]
    NotPending(MessageId),
    #[error("message {0:?} is not in flight")]
    NotInFlight(MessageId),
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Visibility of a live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    InFlight,
}

/// A message record owned by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Monotonic per-queue sequence number, starting at 1. Used for display
    /// ("Order #7") and as a stable ordering key.
    pub seq: u64,
    pub created_at: Millis,
    pub status: MessageStatus,
    /// How many times the message was handed to a consumer.
    pub attempts: u32,
    /// Display-only.
    pub payload: Option<String>,
}

/// Tracks a message that is out for processing.
#[derive(Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    message: MessageId,
    consumer: ConsumerId,
    dispatched_at: Millis,
    deadline: Millis,
}

impl DeliveryRecord {
    pub fn message(&self) -> MessageId {
        self.message
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub fn dispatched_at(&self) -> Millis {
        self.dispatched_at
    }

    pub fn deadline(&self) -> Millis {
        self.deadline
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_overdue(&self, now: Millis) -> bool {
        now >= self.deadline
    }
}

// ---------------------------------------------------------------------------
// MessageQueue
// ---------------------------------------------------------------------------

/// FIFO buffer of live messages.
#[derive(Debug, Default)]
pub struct MessageQueue {
    store: SlotMap<MessageId, Message>,
    /// Live message ids in queue order (pending and in-flight).
    order: VecDeque<MessageId>,
    next_seq: u64,
    total_enqueued: u64,
    total_removed: u64,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the tail. Never fails.
    pub fn enqueue(&mut self, now: Millis, payload: Option<String>) -> MessageId {
        self.next_seq += 1;
        let seq = self.next_seq;
        let id = self.store.insert_with_key(|id| Message {
            id,
            seq,
            created_at: now,
            status: MessageStatus::Pending,
            attempts: 0,
            payload,
        });
        self.order.push_back(id);
        self.total_enqueued += 1;
        id
    }

    /// Remove and return the head pending message, skipping in-flight ones.
    pub fn dequeue_front(&mut self) -> Option<Message> {
        let pos = self.front_pending_position()?;
        let id = self.order.remove(pos)?;
        self.total_removed += 1;
        self.store.remove(id)
    }

    /// The head pending message.
    pub fn peek_front(&self) -> Option<&Message> {
        self.front_pending_position()
            .and_then(|pos| self.store.get(self.order[pos]))
    }

    fn front_pending_position(&self) -> Option<usize> {
        self.order.iter().position(|id| {
            self.store
                .get(*id)
                .is_some_and(|m| m.status == MessageStatus::Pending)
        })
    }

    /// Number of live messages (pending plus in-flight).
    pub fn depth(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.front_pending_position().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.depth() - self.pending_count()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.store.get(id)
    }

    /// The message, if it is live and in flight.
    pub fn in_flight(&self, id: MessageId) -> Result<&Message, QueueError> {
        match self.store.get(id) {
            None => Err(QueueError::NotFound(id)),
            Some(m) if m.status != MessageStatus::InFlight => Err(QueueError::NotInFlight(id)),
            Some(m) => Ok(m),
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.store.contains_key(id)
    }

    /// Live messages in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + '_ {
        self.order.iter().filter_map(|id| self.store.get(*id))
    }

    /// Pending messages in queue order.
    pub fn pending(&self) -> impl Iterator<Item = &Message> + '_ {
        self.iter().filter(|m| m.status == MessageStatus::Pending)
    }

    /// Total messages ever enqueued.
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued
    }

    /// Total messages permanently removed (dequeued or committed).
    pub fn total_removed(&self) -> u64 {
        self.total_removed
    }

    // -----------------------------------------------------------------------
    // In-flight protocol
    // -----------------------------------------------------------------------

    /// Hand a pending message to `consumer`. The message stays in the queue,
    /// hidden from the pending view, until the record is committed or
    /// restored.
    pub fn mark_in_flight(
        &mut self,
        id: MessageId,
        consumer: ConsumerId,
        now: Millis,
        timeout: Millis,
    ) -> Result<DeliveryRecord, QueueError> {
        let message = self.store.get_mut(id).ok_or(QueueError::NotFound(id))?;
        if message.status != MessageStatus::Pending {
            return Err(QueueError::NotPending(id));
        }
        message.status = MessageStatus::InFlight;
        message.attempts += 1;
        Ok(DeliveryRecord {
            message: id,
            consumer,
            dispatched_at: now,
            deadline: now.saturating_add(timeout),
        })
    }

    /// Make an in-flight message visible again, at the front of the queue.
    pub fn restore(&mut self, record: DeliveryRecord) -> Result<(), QueueError> {
        let id = record.message;
        let message = self.store.get_mut(id).ok_or(QueueError::NotFound(id))?;
        if message.status != MessageStatus::InFlight {
            return Err(QueueError::NotInFlight(id));
        }
        message.status = MessageStatus::Pending;
        if let Some(pos) = self.order.iter().position(|m| *m == id) {
            self.order.remove(pos);
        }
        self.order.push_front(id);
        Ok(())
    }

    /// Permanently delete an in-flight message.
    pub fn commit(&mut self, record: DeliveryRecord) -> Result<Message, QueueError> {
        let id = record.message;
        self.in_flight(id)?;
        if let Some(pos) = self.order.iter().position(|m| *m == id) {
            self.order.remove(pos);
        }
        self.total_removed += 1;
        self.store.remove(id).ok_or(QueueError::NotFound(id))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
