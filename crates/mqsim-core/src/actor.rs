//! Producer and consumer state machines.
//!
//! Actors own their activity state and the timer slot of their role. They
//! schedule their own work through the [`Scheduler`], but never dispatch
//! fired timers themselves: the owning scenario matches on its timer action
//! and calls back into the actor.
//!
//! Consumers are level-triggered. The scenario calls [`Consumer::poll`] or
//! [`DrainConsumer::reconcile`] after every mutation, and the actor decides
//! from the current queue and gate state whether to start or stop.

use crate::id::{ConsumerId, MessageId};
use crate::queue::{DeliveryRecord, Message, MessageQueue};
use crate::timer::{Millis, Scheduler, TimerSlot};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Activity states
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProducerState {
    #[default]
    Idle,
    /// Handing a message off; further sends are rejected.
    Busy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumerActivity {
    #[default]
    Idle,
    Processing,
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// `Idle -> Busy -> Idle`. A send arms the hand-off timer; the message is
/// enqueued by the scenario when that timer fires.
#[derive(Debug, Clone)]
pub struct Producer {
    state: ProducerState,
    handoff: Millis,
    slot: TimerSlot,
    sent: u64,
}

impl Producer {
    pub fn new(handoff: Millis) -> Self {
        Self {
            state: ProducerState::Idle,
            handoff,
            slot: TimerSlot::new(),
            sent: 0,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn handoff(&self) -> Millis {
        self.handoff
    }

    /// Messages handed off so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Start a hand-off. Returns `false` (and does nothing) while busy.
    pub fn send<T: Clone>(&mut self, scheduler: &mut Scheduler<T>, action: T) -> bool {
        if self.state == ProducerState::Busy {
            return false;
        }
        self.state = ProducerState::Busy;
        self.slot.arm_after(scheduler, self.handoff, action);
        debug!(handoff = self.handoff, "producer busy");
        true
    }

    /// The hand-off timer fired. Returns `false` if the producer was not busy.
    pub fn finish_handoff(&mut self) -> bool {
        if self.state == ProducerState::Idle {
            return false;
        }
        self.state = ProducerState::Idle;
        self.sent += 1;
        true
    }

    /// Abandon a hand-off in progress. Returns `true` if the producer was
    /// busy.
    pub fn halt<T: Clone>(&mut self, scheduler: &mut Scheduler<T>) -> bool {
        self.slot.cancel(scheduler);
        let was_busy = self.state == ProducerState::Busy;
        self.state = ProducerState::Idle;
        was_busy
    }
}

// ---------------------------------------------------------------------------
// Consumer (per-message)
// ---------------------------------------------------------------------------

/// `Idle -> Processing -> Idle`, one message at a time. While processing the
/// consumer holds the message's delivery record; the message stays in the
/// queue as in-flight.
#[derive(Debug)]
pub struct Consumer {
    id: ConsumerId,
    duration: Millis,
    current: Option<DeliveryRecord>,
    slot: TimerSlot,
    processed: u64,
}

impl Consumer {
    pub fn new(id: ConsumerId, duration: Millis) -> Self {
        Self {
            id,
            duration,
            current: None,
            slot: TimerSlot::new(),
            processed: 0,
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn duration(&self) -> Millis {
        self.duration
    }

    /// Takes effect from the next message.
    pub fn set_duration(&mut self, duration: Millis) {
        self.duration = duration;
    }

    pub fn activity(&self) -> ConsumerActivity {
        if self.current.is_some() {
            ConsumerActivity::Processing
        } else {
            ConsumerActivity::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn current_message(&self) -> Option<MessageId> {
        self.current.as_ref().map(DeliveryRecord::message)
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// If idle and a message is pending, take the head and arm the
    /// completion timer built by `done`. Returns the message taken.
    pub fn poll<T: Clone>(
        &mut self,
        queue: &mut MessageQueue,
        scheduler: &mut Scheduler<T>,
        done: impl FnOnce(MessageId) -> T,
    ) -> Option<MessageId> {
        if !self.is_idle() {
            return None;
        }
        let head = queue.peek_front()?.id;
        let record = match queue.mark_in_flight(head, self.id, scheduler.now(), self.duration) {
            Ok(record) => record,
            Err(err) => {
                warn!(%err, consumer = %self.id, "could not take head message");
                return None;
            }
        };
        self.current = Some(record);
        self.slot.arm_after(scheduler, self.duration, done(head));
        debug!(consumer = %self.id, ?head, duration = self.duration, "consumer processing");
        Some(head)
    }

    /// The completion timer fired: delete the held message and go idle.
    pub fn complete(&mut self, queue: &mut MessageQueue) -> Option<Message> {
        let record = self.current.take()?;
        match queue.commit(record) {
            Ok(message) => {
                self.processed += 1;
                Some(message)
            }
            Err(err) => {
                warn!(%err, consumer = %self.id, "completed message was not in flight");
                None
            }
        }
    }

    /// Stop processing. A held message goes back to the front of the queue,
    /// still counting its delivery attempt. Returns the abandoned message.
    pub fn halt<T: Clone>(
        &mut self,
        queue: &mut MessageQueue,
        scheduler: &mut Scheduler<T>,
    ) -> Option<MessageId> {
        self.slot.cancel(scheduler);
        let record = self.current.take()?;
        let message = record.message();
        if let Err(err) = queue.restore(record) {
            warn!(%err, consumer = %self.id, "abandoned message was not in flight");
        }
        debug!(consumer = %self.id, ?message, "consumer halted");
        Some(message)
    }
}

// ---------------------------------------------------------------------------
// DrainConsumer (periodic)
// ---------------------------------------------------------------------------

/// Removes one message per interval while its gate is open and the queue has
/// work. Runs a single periodic timer; re-arming always cancels the old one.
#[derive(Debug, Clone)]
pub struct DrainConsumer {
    id: ConsumerId,
    interval: Millis,
    slot: TimerSlot,
    running: bool,
    drained: u64,
}

impl DrainConsumer {
    pub fn new(id: ConsumerId, interval: Millis) -> Self {
        Self {
            id,
            interval,
            slot: TimerSlot::new(),
            running: false,
            drained: 0,
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn interval(&self) -> Millis {
        self.interval
    }

    pub fn activity(&self) -> ConsumerActivity {
        if self.running {
            ConsumerActivity::Processing
        } else {
            ConsumerActivity::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn drained(&self) -> u64 {
        self.drained
    }

    /// Start or stop the drain loop to match `has_work && gate_open`.
    /// Returns the new activity when it changed.
    pub fn reconcile<T: Clone>(
        &mut self,
        has_work: bool,
        gate_open: bool,
        scheduler: &mut Scheduler<T>,
        action: T,
    ) -> Option<ConsumerActivity> {
        let should_run = has_work && gate_open;
        if should_run && !self.running {
            self.slot.arm_every(scheduler, self.interval, action);
            self.running = true;
            debug!(consumer = %self.id, interval = self.interval, "drain started");
            Some(ConsumerActivity::Processing)
        } else if !should_run && self.running {
            self.slot.cancel(scheduler);
            self.running = false;
            debug!(consumer = %self.id, "drain stopped");
            Some(ConsumerActivity::Idle)
        } else {
            None
        }
    }

    /// Remove the head pending message. Called when the drain timer fires.
    pub fn drain_one(&mut self, queue: &mut MessageQueue) -> Option<Message> {
        let message = queue.dequeue_front()?;
        self.drained += 1;
        Some(message)
    }

    /// Change the drain interval. A running loop is restarted with the new
    /// interval. Returns whether a restart happened.
    pub fn set_interval<T: Clone>(
        &mut self,
        interval: Millis,
        scheduler: &mut Scheduler<T>,
        action: T,
    ) -> bool {
        self.interval = interval;
        if self.running {
            self.slot.arm_every(scheduler, interval, action);
            true
        } else {
            false
        }
    }

    /// Stop the drain loop regardless of work and gate. Returns the new
    /// activity when it changed.
    pub fn halt<T: Clone>(&mut self, scheduler: &mut Scheduler<T>) -> Option<ConsumerActivity> {
        self.slot.cancel(scheduler);
        if !self.running {
            return None;
        }
        self.running = false;
        debug!(consumer = %self.id, "drain halted");
        Some(ConsumerActivity::Idle)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
