//! Delivery guarantees: a message is deleted only once the consumer
//! acknowledges it. A crash during processing puts it back at the front of
//! the queue.
//!
//! ```text
//! Idle ──start──► Receiving ──1s──► Processing ──ack───► Acknowledged ──2s──► Idle
//!                                        │
//!                                        └──crash──► Expired ──2s──► Idle (restored)
//! ```

use crate::ack::AckLedger;
use crate::actor::ConsumerActivity;
use crate::config::GuaranteesConfig;
use crate::event::Event;
use crate::id::{ConsumerId, MessageId};
use crate::queue::{MessageQueue, MessageStatus};
use crate::session::{Context, Reaction, Scenario};
use crate::timer::{Millis, TimerSlot};
use serde::Serialize;
use tracing::warn;

use super::note_activity;

const WORKER: ConsumerId = ConsumerId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuaranteesTrigger {
    StartProcessing,
    Acknowledge,
    Crash,
    Publish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuaranteesTimer {
    Received,
    AckShown,
    ExpiryShown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    #[default]
    Idle,
    /// On its way to the consumer.
    Receiving { message: MessageId },
    /// Waiting for the user to acknowledge or crash.
    Processing { message: MessageId },
    Acknowledged { message: MessageId },
    Expired { message: MessageId },
}

impl Phase {
    fn activity(self) -> ConsumerActivity {
        match self {
            Phase::Receiving { .. } | Phase::Processing { .. } => ConsumerActivity::Processing,
            _ => ConsumerActivity::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub seq: u64,
    pub status: MessageStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightView {
    pub seq: u64,
    pub consumer: ConsumerId,
    pub deadline: Millis,
    pub overdue: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuaranteesSnapshot {
    pub at: Millis,
    pub phase: Phase,
    pub messages: Vec<MessageView>,
    pub in_flight: Option<InFlightView>,
    pub acknowledged: u64,
    pub expired: u64,
}

#[derive(Debug)]
pub struct Guarantees {
    queue: MessageQueue,
    ledger: AckLedger,
    phase: Phase,
    slot: TimerSlot,
    receive_ms: Millis,
    ack_display_ms: Millis,
    expiry_display_ms: Millis,
}

impl Default for Guarantees {
    fn default() -> Self {
        Self::new(&GuaranteesConfig::default())
    }
}

impl Guarantees {
    pub fn new(config: &GuaranteesConfig) -> Self {
        let mut queue = MessageQueue::new();
        for _ in 0..config.initial_messages {
            queue.enqueue(0, None);
        }
        Self {
            queue,
            ledger: AckLedger::new(config.visibility_timeout_ms),
            phase: Phase::Idle,
            slot: TimerSlot::new(),
            receive_ms: config.receive_ms,
            ack_display_ms: config.ack_display_ms,
            expiry_display_ms: config.expiry_display_ms,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &AckLedger {
        &self.ledger
    }

    fn restore(&mut self, message: MessageId, ctx: &mut Context<'_, GuaranteesTimer>) {
        let at = ctx.now();
        match self.ledger.expire(&mut self.queue, message) {
            Ok(_) => ctx.emit(Event::MessageRestored { message, at }),
            Err(err) => warn!(%err, "restore of expired message failed"),
        }
    }

    fn react(&mut self, trigger: GuaranteesTrigger, ctx: &mut Context<'_, GuaranteesTimer>) -> Reaction {
        let at = ctx.now();
        match (trigger, self.phase) {
            (GuaranteesTrigger::Publish, _) => {
                let message = self.queue.enqueue(at, None);
                ctx.emit(Event::MessageEnqueued {
                    message,
                    depth: self.queue.depth(),
                    at,
                });
            }
            (GuaranteesTrigger::StartProcessing, Phase::Idle) => {
                let Some(message) = self.ledger.dispatch(&mut self.queue, WORKER, at) else {
                    return Reaction::Ignored;
                };
                ctx.emit(Event::MessageDispatched {
                    message,
                    consumer: WORKER,
                    at,
                });
                self.phase = Phase::Receiving { message };
                self.slot
                    .arm_after(ctx.scheduler(), self.receive_ms, GuaranteesTimer::Received);
            }
            (GuaranteesTrigger::Acknowledge, Phase::Processing { message }) => {
                if let Err(err) = self.ledger.acknowledge(&mut self.queue, message) {
                    warn!(%err, "acknowledge of processing message failed");
                    return Reaction::Ignored;
                }
                ctx.emit(Event::MessageAcknowledged { message, at });
                self.phase = Phase::Acknowledged { message };
                self.slot
                    .arm_after(ctx.scheduler(), self.ack_display_ms, GuaranteesTimer::AckShown);
            }
            (GuaranteesTrigger::Crash, Phase::Processing { message }) => {
                ctx.emit(Event::MessageExpired { message, at });
                self.phase = Phase::Expired { message };
                self.slot.arm_after(
                    ctx.scheduler(),
                    self.expiry_display_ms,
                    GuaranteesTimer::ExpiryShown,
                );
            }
            _ => return Reaction::Ignored,
        }
        Reaction::Applied
    }
}

impl Scenario for Guarantees {
    type Trigger = GuaranteesTrigger;
    type Timer = GuaranteesTimer;
    type Snapshot = GuaranteesSnapshot;

    fn name(&self) -> &'static str {
        "guarantees"
    }

    fn handle(
        &mut self,
        trigger: GuaranteesTrigger,
        ctx: &mut Context<'_, GuaranteesTimer>,
    ) -> Reaction {
        let before = self.phase.activity();
        let reaction = self.react(trigger, ctx);
        note_activity(ctx, WORKER, before, self.phase.activity());
        reaction
    }

    fn on_timer(&mut self, timer: GuaranteesTimer, ctx: &mut Context<'_, GuaranteesTimer>) {
        let before = self.phase.activity();
        match (timer, self.phase) {
            (GuaranteesTimer::Received, Phase::Receiving { message }) => {
                self.phase = Phase::Processing { message };
            }
            (GuaranteesTimer::AckShown, Phase::Acknowledged { .. }) => {
                self.phase = Phase::Idle;
            }
            (GuaranteesTimer::ExpiryShown, Phase::Expired { message }) => {
                self.restore(message, ctx);
                self.phase = Phase::Idle;
            }
            (timer, phase) => warn!(?timer, ?phase, "timer does not match phase"),
        }
        note_activity(ctx, WORKER, before, self.phase.activity());
    }

    /// A message still out for processing is treated as a lost consumer:
    /// it expires and is restored for redelivery.
    fn on_end(&mut self, ctx: &mut Context<'_, GuaranteesTimer>) {
        self.slot.cancel(ctx.scheduler());
        let before = self.phase.activity();
        let at = ctx.now();
        match self.phase {
            Phase::Receiving { message } | Phase::Processing { message } => {
                ctx.emit(Event::MessageExpired { message, at });
                self.restore(message, ctx);
            }
            Phase::Expired { message } => self.restore(message, ctx),
            Phase::Idle | Phase::Acknowledged { .. } => {}
        }
        self.phase = Phase::Idle;
        note_activity(ctx, WORKER, before, self.phase.activity());
    }

    fn snapshot(&self, now: Millis) -> GuaranteesSnapshot {
        let messages = self
            .queue
            .iter()
            .map(|m| MessageView {
                seq: m.seq,
                status: m.status,
                attempts: m.attempts,
            })
            .collect();
        let in_flight = self.ledger.in_flight_records().next().and_then(|record| {
            let seq = self.queue.get(record.message())?.seq;
            Some(InFlightView {
                seq,
                consumer: record.consumer(),
                deadline: record.deadline(),
                overdue: record.is_overdue(now),
            })
        });
        GuaranteesSnapshot {
            at: now,
            phase: self.phase,
            messages,
            in_flight,
            acknowledged: self.ledger.acknowledged_count(),
            expired: self.ledger.expired_count(),
        }
    }
}
