//! Acknowledgment protocol: at-least-once redelivery.
//!
//! ```text
//! Enqueued ──dispatch──► Dispatched ──acknowledge──► Acknowledged (deleted)
//!    ▲                        │
//!    └────────expire──────────┘
//! ```
//!
//! A message is deleted if and only if it is acknowledged. Expiry restores it
//! to the front of the queue. Deadlines are recorded and observable, but no
//! timeout fires on its own: expiry is always an explicit call.

use crate::id::{ConsumerId, MessageId};
use crate::queue::{DeliveryRecord, Message, MessageQueue, MessageStatus, QueueError};
use crate::timer::Millis;
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use tracing::{debug, warn};

/// Default visibility timeout for dispatched messages.
pub const DEFAULT_VISIBILITY_TIMEOUT: Millis = 30_000;

/// Where a message is in the acknowledgment protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Visible in the queue, not assigned.
    Enqueued,
    /// Held by a consumer, awaiting acknowledgment.
    Dispatched,
    /// Terminal: deleted from the queue.
    Acknowledged,
    /// Restored to the front after a failed delivery, not yet dispatched
    /// again.
    Expired,
}

/// Outstanding delivery records, keyed by message.
#[derive(Debug)]
pub struct AckLedger {
    records: SecondaryMap<MessageId, DeliveryRecord>,
    /// Last settled outcome per message; cleared by the next dispatch.
    outcomes: SecondaryMap<MessageId, DeliveryState>,
    visibility_timeout: Millis,
    acknowledged: u64,
    expired: u64,
}

impl Default for AckLedger {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl AckLedger {
    pub fn new(visibility_timeout: Millis) -> Self {
        Self {
            records: SecondaryMap::new(),
            outcomes: SecondaryMap::new(),
            visibility_timeout,
            acknowledged: 0,
            expired: 0,
        }
    }

    /// Dispatch the head pending message to `consumer`. Returns `None` when
    /// nothing is pending.
    pub fn dispatch(
        &mut self,
        queue: &mut MessageQueue,
        consumer: ConsumerId,
        now: Millis,
    ) -> Option<MessageId> {
        let id = queue.peek_front()?.id;
        match queue.mark_in_flight(id, consumer, now, self.visibility_timeout) {
            Ok(record) => {
                debug!(?id, %consumer, deadline = record.deadline(), "message dispatched");
                self.records.insert(id, record);
                self.outcomes.remove(id);
                Some(id)
            }
            Err(err) => {
                warn!(%err, "dispatch of head message failed");
                None
            }
        }
    }

    /// Take the record for `id` once `queue` confirms the message is in
    /// flight. On error the record stays in the ledger.
    fn take_record(
        &mut self,
        queue: &MessageQueue,
        id: MessageId,
    ) -> Result<DeliveryRecord, QueueError> {
        if !self.records.contains_key(id) {
            return Err(QueueError::NotInFlight(id));
        }
        queue.in_flight(id)?;
        self.records.remove(id).ok_or(QueueError::NotInFlight(id))
    }

    /// Confirm processing: the message is deleted permanently.
    pub fn acknowledge(
        &mut self,
        queue: &mut MessageQueue,
        id: MessageId,
    ) -> Result<Message, QueueError> {
        let record = self.take_record(queue, id)?;
        let message = queue.commit(record)?;
        self.acknowledged += 1;
        self.outcomes.insert(id, DeliveryState::Acknowledged);
        debug!(?id, "message acknowledged");
        Ok(message)
    }

    /// Give up on a dispatch: the message becomes visible again at the front.
    pub fn expire(&mut self, queue: &mut MessageQueue, id: MessageId) -> Result<(), QueueError> {
        let record = self.take_record(queue, id)?;
        queue.restore(record)?;
        self.expired += 1;
        self.outcomes.insert(id, DeliveryState::Expired);
        debug!(?id, "message expired and restored");
        Ok(())
    }

    /// Current protocol state of a message: `Acknowledged` after deletion,
    /// `Expired` while a restored message waits for redelivery. `None` for
    /// messages this ledger never settled and the queue does not hold.
    pub fn state_of(&self, queue: &MessageQueue, id: MessageId) -> Option<DeliveryState> {
        let outcome = self.outcomes.get(id).copied();
        let Some(message) = queue.get(id) else {
            return outcome.filter(|s| *s == DeliveryState::Acknowledged);
        };
        Some(match (message.status, outcome) {
            (MessageStatus::InFlight, _) => DeliveryState::Dispatched,
            (MessageStatus::Pending, Some(DeliveryState::Expired)) => DeliveryState::Expired,
            (MessageStatus::Pending, _) => DeliveryState::Enqueued,
        })
    }

    pub fn record(&self, id: MessageId) -> Option<&DeliveryRecord> {
        self.records.get(id)
    }

    /// Dispatched messages whose deadline has passed.
    pub fn overdue(&self, now: Millis) -> Vec<MessageId> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_overdue(now))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn in_flight_records(&self) -> impl Iterator<Item = &DeliveryRecord> + '_ {
        self.records.values()
    }

    pub fn in_flight(&self) -> usize {
        self.records.len()
    }

    pub fn visibility_timeout(&self) -> Millis {
        self.visibility_timeout
    }

    pub fn acknowledged_count(&self) -> u64 {
        self.acknowledged
    }

    pub fn expired_count(&self) -> u64 {
        self.expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> ConsumerId {
        ConsumerId(0)
    }

    #[test]
    fn dispatch_empty_queue_is_none() {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::default();
        assert!(ledger.dispatch(&mut q, worker(), 0).is_none());
        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn dispatch_then_ack_deletes() {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::new(1_000);
        let id = q.enqueue(0, None);
        assert_eq!(ledger.dispatch(&mut q, worker(), 100), Some(id));
        assert_eq!(ledger.state_of(&q, id), Some(DeliveryState::Dispatched));
        assert_eq!(ledger.record(id).unwrap().deadline(), 1_100);
        assert_eq!(q.pending_count(), 0);

        ledger.acknowledge(&mut q, id).unwrap();
        assert_eq!(ledger.state_of(&q, id), Some(DeliveryState::Acknowledged));
        assert_eq!(q.depth(), 0);
        assert_eq!(ledger.acknowledged_count(), 1);
    }

    #[test]
    fn dispatch_then_expire_restores() {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::default();
        let id = q.enqueue(0, None);
        let other = q.enqueue(0, None);
        ledger.dispatch(&mut q, worker(), 0);
        ledger.expire(&mut q, id).unwrap();

        assert_eq!(ledger.state_of(&q, id), Some(DeliveryState::Expired));
        assert_eq!(ledger.state_of(&q, other), Some(DeliveryState::Enqueued));
        assert_eq!(q.peek_front().unwrap().id, id);
        assert_eq!(q.depth(), 2);
        assert_eq!(ledger.expired_count(), 1);
        assert_eq!(ledger.in_flight(), 0);
        assert!(q.contains(other));
    }

    #[test]
    fn ack_without_dispatch_fails() {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::default();
        let id = q.enqueue(0, None);
        assert_eq!(
            ledger.acknowledge(&mut q, id),
            Err(QueueError::NotInFlight(id))
        );
        assert_eq!(q.depth(), 1);
    }

    #[test]
    fn exactly_one_outcome_per_dispatch() {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::default();
        let id = q.enqueue(0, None);
        ledger.dispatch(&mut q, worker(), 0);
        ledger.acknowledge(&mut q, id).unwrap();
        assert!(ledger.expire(&mut q, id).is_err());
        assert!(ledger.acknowledge(&mut q, id).is_err());
    }

    #[test]
    fn overdue_lists_only_late_records() {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::new(100);
        let a = q.enqueue(0, None);
        let b = q.enqueue(0, None);
        ledger.dispatch(&mut q, worker(), 0);
        ledger.dispatch(&mut q, ConsumerId(1), 50);
        assert_eq!(ledger.overdue(99), Vec::<MessageId>::new());
        assert_eq!(ledger.overdue(100), vec![a]);
        let mut late = ledger.overdue(150);
        late.sort_by_key(|id| q.get(*id).map(|m| m.seq));
        assert_eq!(late, vec![a, b]);
        // Overdue records are never expired implicitly.
        assert_eq!(ledger.in_flight(), 2);
    }

    #[test]
    fn redelivery_increments_attempts() {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::default();
        let id = q.enqueue(0, None);
        ledger.dispatch(&mut q, worker(), 0);
        ledger.expire(&mut q, id).unwrap();
        ledger.dispatch(&mut q, worker(), 10);
        assert_eq!(q.get(id).unwrap().attempts, 2);
        assert_eq!(ledger.state_of(&q, id), Some(DeliveryState::Dispatched));
    }

    #[test]
    fn wrong_queue_keeps_the_record() {
        let mut q = MessageQueue::new();
        let mut elsewhere = MessageQueue::new();
        let mut ledger = AckLedger::default();
        let id = q.enqueue(0, None);
        ledger.dispatch(&mut q, worker(), 0);

        assert_eq!(
            ledger.acknowledge(&mut elsewhere, id),
            Err(QueueError::NotFound(id))
        );
        assert_eq!(
            ledger.expire(&mut elsewhere, id),
            Err(QueueError::NotFound(id))
        );
        assert_eq!(ledger.in_flight(), 1);
        assert!(ledger.record(id).is_some());

        // Still recoverable against the right queue.
        ledger.expire(&mut q, id).unwrap();
        assert_eq!(q.in_flight_count(), 0);
        assert_eq!(ledger.expired_count(), 1);
    }
}
