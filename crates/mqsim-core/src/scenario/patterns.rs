//! Distribution patterns: the same publish routed as a worker queue
//! (point-to-point) or as a topic (fan-out).

use crate::config::PatternsConfig;
use crate::distribution::{DistributionMode, Distributor};
use crate::event::Event;
use crate::id::ConsumerId;
use crate::queue::MessageQueue;
use crate::session::{Context, Reaction, Scenario};
use crate::timer::Millis;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternsTrigger {
    Publish,
    SetMode(DistributionMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternsTimer {
    /// The delivery of message `seq` has arrived.
    Arrived(u64),
}

/// A routed message on its way to its consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub seq: u64,
    pub targets: Vec<ConsumerId>,
    pub sent_at: Millis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternsSnapshot {
    pub at: Millis,
    pub mode: DistributionMode,
    pub exchange: &'static str,
    pub in_transit: Vec<Delivery>,
    pub received: Vec<(ConsumerId, u64)>,
    pub next_target: Option<ConsumerId>,
}

#[derive(Debug)]
pub struct Patterns {
    queue: MessageQueue,
    distributor: Distributor,
    in_transit: Vec<Delivery>,
    transit_ms: Millis,
}

impl Default for Patterns {
    fn default() -> Self {
        Self::new(&PatternsConfig::default())
    }
}

impl Patterns {
    pub fn new(config: &PatternsConfig) -> Self {
        Self {
            queue: MessageQueue::new(),
            distributor: Distributor::with_consumer_count(config.mode, config.consumers),
            in_transit: Vec::new(),
            transit_ms: config.transit_ms,
        }
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    fn publish(&mut self, ctx: &mut Context<'_, PatternsTimer>) {
        let at = ctx.now();
        let id = self.queue.enqueue(at, None);
        ctx.emit(Event::MessageEnqueued {
            message: id,
            depth: self.queue.depth(),
            at,
        });
        // The exchange forwards immediately; nothing waits in the queue.
        let Some(message) = self.queue.dequeue_front() else {
            return;
        };
        let targets = self.distributor.route();
        ctx.emit(Event::MessageRouted {
            message: message.id,
            targets: targets.len(),
            at,
        });
        for &consumer in &targets {
            ctx.emit(Event::MessageDispatched {
                message: message.id,
                consumer,
                at,
            });
        }
        self.in_transit.push(Delivery {
            seq: message.seq,
            targets,
            sent_at: at,
        });
        ctx.scheduler()
            .after(self.transit_ms, PatternsTimer::Arrived(message.seq));
    }
}

impl Scenario for Patterns {
    type Trigger = PatternsTrigger;
    type Timer = PatternsTimer;
    type Snapshot = PatternsSnapshot;

    fn name(&self) -> &'static str {
        "patterns"
    }

    fn handle(&mut self, trigger: PatternsTrigger, ctx: &mut Context<'_, PatternsTimer>) -> Reaction {
        match trigger {
            PatternsTrigger::Publish => self.publish(ctx),
            PatternsTrigger::SetMode(mode) => {
                if mode == self.distributor.mode() {
                    return Reaction::Ignored;
                }
                self.distributor.set_mode(mode);
            }
        }
        Reaction::Applied
    }

    fn on_timer(&mut self, timer: PatternsTimer, _ctx: &mut Context<'_, PatternsTimer>) {
        match timer {
            PatternsTimer::Arrived(seq) => self.in_transit.retain(|d| d.seq != seq),
        }
    }

    /// Arrival timers are gone, so nothing stays in transit.
    fn on_end(&mut self, _ctx: &mut Context<'_, PatternsTimer>) {
        self.in_transit.clear();
    }

    fn snapshot(&self, now: Millis) -> PatternsSnapshot {
        let mode = self.distributor.mode();
        let next_target = match mode {
            DistributionMode::PointToPoint => self
                .distributor
                .consumers()
                .get(self.distributor.round_robin_index())
                .copied(),
            DistributionMode::FanOut => None,
        };
        PatternsSnapshot {
            at: now,
            mode,
            exchange: mode.exchange_label(),
            in_transit: self.in_transit.clone(),
            received: self.distributor.received_counts(),
            next_target,
        }
    }
}
