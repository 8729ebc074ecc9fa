//! Restaurant analogy: a waiter pins order tickets on a rail, a chef cooks
//! them one at a time.
//!
//! The waiter never waits for the chef. While the chef cooks, new tickets
//! pile up on the rail and are picked up in order.

use crate::actor::{Consumer, ConsumerActivity, Producer, ProducerState};
use crate::config::KitchenConfig;
use crate::event::Event;
use crate::id::{ConsumerId, MessageId};
use crate::queue::{MessageQueue, MessageStatus};
use crate::session::{Context, Reaction, Scenario};
use crate::timer::Millis;
use serde::Serialize;

use super::note_activity;

const CHEF: ConsumerId = ConsumerId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KitchenTrigger {
    PlaceOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KitchenTimer {
    HandedOff,
    Cooked(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TicketStatus {
    Waiting,
    Cooking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub number: u64,
    pub status: TicketStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KitchenSnapshot {
    pub at: Millis,
    /// Tickets on the rail, oldest first.
    pub tickets: Vec<Ticket>,
    pub waiter: ProducerState,
    pub chef: ConsumerActivity,
    pub served: u64,
}

#[derive(Debug)]
pub struct Kitchen {
    rail: MessageQueue,
    waiter: Producer,
    chef: Consumer,
}

impl Default for Kitchen {
    fn default() -> Self {
        Self::new(&KitchenConfig::default())
    }
}

impl Kitchen {
    pub fn new(config: &KitchenConfig) -> Self {
        Self {
            rail: MessageQueue::new(),
            waiter: Producer::new(config.handoff_ms),
            chef: Consumer::new(CHEF, config.cook_ms),
        }
    }

    pub fn rail(&self) -> &MessageQueue {
        &self.rail
    }

    fn poll_chef(&mut self, ctx: &mut Context<'_, KitchenTimer>) {
        if let Some(message) = self.chef.poll(&mut self.rail, ctx.scheduler(), KitchenTimer::Cooked) {
            let at = ctx.now();
            ctx.emit(Event::MessageDispatched {
                message,
                consumer: CHEF,
                at,
            });
        }
    }
}

impl Scenario for Kitchen {
    type Trigger = KitchenTrigger;
    type Timer = KitchenTimer;
    type Snapshot = KitchenSnapshot;

    fn name(&self) -> &'static str {
        "kitchen"
    }

    fn handle(&mut self, trigger: KitchenTrigger, ctx: &mut Context<'_, KitchenTimer>) -> Reaction {
        match trigger {
            KitchenTrigger::PlaceOrder => {
                if !self.waiter.send(ctx.scheduler(), KitchenTimer::HandedOff) {
                    return Reaction::Ignored;
                }
                let at = ctx.now();
                ctx.emit(Event::ProducerChanged {
                    state: ProducerState::Busy,
                    at,
                });
                Reaction::Applied
            }
        }
    }

    fn on_timer(&mut self, timer: KitchenTimer, ctx: &mut Context<'_, KitchenTimer>) {
        let before = self.chef.activity();
        let at = ctx.now();
        match timer {
            KitchenTimer::HandedOff => {
                if self.waiter.finish_handoff() {
                    ctx.emit(Event::ProducerChanged {
                        state: ProducerState::Idle,
                        at,
                    });
                    let message = self.rail.enqueue(at, None);
                    ctx.emit(Event::MessageEnqueued {
                        message,
                        depth: self.rail.depth(),
                        at,
                    });
                }
            }
            KitchenTimer::Cooked(message) => {
                if self.chef.current_message() == Some(message)
                    && self.chef.complete(&mut self.rail).is_some()
                {
                    ctx.emit(Event::MessageCompleted {
                        message,
                        consumer: CHEF,
                        at,
                    });
                }
            }
        }
        self.poll_chef(ctx);
        note_activity(ctx, CHEF, before, self.chef.activity());
    }

    fn on_end(&mut self, ctx: &mut Context<'_, KitchenTimer>) {
        let before = self.chef.activity();
        let at = ctx.now();
        if self.waiter.halt(ctx.scheduler()) {
            ctx.emit(Event::ProducerChanged {
                state: ProducerState::Idle,
                at,
            });
        }
        self.chef.halt(&mut self.rail, ctx.scheduler());
        note_activity(ctx, CHEF, before, self.chef.activity());
    }

    fn snapshot(&self, now: Millis) -> KitchenSnapshot {
        let tickets = self
            .rail
            .iter()
            .map(|m| Ticket {
                number: m.seq,
                status: match m.status {
                    MessageStatus::Pending => TicketStatus::Waiting,
                    MessageStatus::InFlight => TicketStatus::Cooking,
                },
            })
            .collect();
        KitchenSnapshot {
            at: now,
            tickets,
            waiter: self.waiter.state(),
            chef: self.chef.activity(),
            served: self.chef.processed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn session() -> Session<Kitchen> {
        Session::new(Kitchen::default())
    }

    #[test]
    fn order_reaches_rail_after_handoff() {
        let mut s = session();
        assert_eq!(s.trigger(KitchenTrigger::PlaceOrder), Reaction::Applied);
        assert_eq!(s.snapshot().waiter, ProducerState::Busy);
        s.advance(499);
        assert!(s.snapshot().tickets.is_empty());
        s.advance(1);
        let snap = s.snapshot();
        assert_eq!(snap.waiter, ProducerState::Idle);
        assert_eq!(
            snap.tickets,
            vec![Ticket {
                number: 1,
                status: TicketStatus::Cooking
            }]
        );
        assert_eq!(snap.chef, ConsumerActivity::Processing);
    }

    #[test]
    fn busy_waiter_ignores_orders() {
        let mut s = session();
        s.trigger(KitchenTrigger::PlaceOrder);
        assert_eq!(s.trigger(KitchenTrigger::PlaceOrder), Reaction::Ignored);
        s.advance(500);
        assert_eq!(s.scenario().rail().total_enqueued(), 1);
    }

    #[test]
    fn backlog_is_cooked_in_order() {
        let mut s = session();
        for _ in 0..3 {
            s.trigger(KitchenTrigger::PlaceOrder);
            s.advance(500);
        }
        // t = 1500: ticket 1 cooking since 500, tickets 2 and 3 waiting.
        let snap = s.snapshot();
        assert_eq!(snap.tickets.len(), 3);
        assert_eq!(snap.tickets[0].status, TicketStatus::Cooking);
        assert_eq!(snap.tickets[1].status, TicketStatus::Waiting);

        s.advance(1_000); // t = 2500: ticket 1 done, ticket 2 starts
        let snap = s.snapshot();
        assert_eq!(snap.served, 1);
        assert_eq!(snap.tickets[0].number, 2);
        assert_eq!(snap.tickets[0].status, TicketStatus::Cooking);

        s.advance(4_000); // t = 6500: all served
        let snap = s.snapshot();
        assert_eq!(snap.served, 3);
        assert!(snap.tickets.is_empty());
        assert_eq!(snap.chef, ConsumerActivity::Idle);
        assert_eq!(s.pending_timers(), 0);
    }

    #[test]
    fn ending_mid_service_rests_waiter_and_chef() {
        let mut s = session();
        s.trigger(KitchenTrigger::PlaceOrder);
        s.advance(500);
        s.trigger(KitchenTrigger::PlaceOrder);
        assert_eq!(s.end(), 2);

        let snap = s.snapshot();
        assert_eq!(snap.waiter, ProducerState::Idle);
        assert_eq!(snap.chef, ConsumerActivity::Idle);
        // The half-cooked ticket is back on the rail, waiting.
        assert_eq!(
            snap.tickets,
            vec![Ticket {
                number: 1,
                status: TicketStatus::Waiting
            }]
        );
        s.advance(10_000);
        assert_eq!(s.snapshot(), snap);
    }
}
