//! Load leveling: a traffic spike lands in the queue at once and a single
//! consumer works it off at a steady pace.

use crate::actor::DrainConsumer;
use crate::config::{ConsumerSpeed, LoadLevelingConfig};
use crate::event::Event;
use crate::id::ConsumerId;
use crate::queue::MessageQueue;
use crate::session::{Context, Reaction, Scenario};
use crate::timer::{Millis, TimerSlot};
use serde::Serialize;

const WORKER: ConsumerId = ConsumerId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadLevelingTrigger {
    TriggerSpike,
    /// Milliseconds per message; clamped into the allowed range.
    SetConsumerSpeed(Millis),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadLevelingTimer {
    SpikeBatch,
    Drain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadLevelingSnapshot {
    pub at: Millis,
    pub depth: usize,
    pub consumer_speed_ms: Millis,
    pub processing: bool,
    pub spike_active: bool,
    pub overloaded: bool,
    /// Queue fill relative to one spike, capped at 100.
    pub fill_percent: u32,
    pub processed: u64,
}

#[derive(Debug)]
pub struct LoadLeveling {
    queue: MessageQueue,
    consumer: DrainConsumer,
    speed: ConsumerSpeed,
    spike: TimerSlot,
    /// Messages of the current spike not yet injected. Zero when no spike
    /// is running.
    spike_remaining: u32,
    spike_injected: u32,
    spike_size: u32,
    spike_batch: u32,
    spike_interval_ms: Millis,
    overload_threshold: usize,
}

impl Default for LoadLeveling {
    fn default() -> Self {
        Self::new(&LoadLevelingConfig::default())
    }
}

impl LoadLeveling {
    pub fn new(config: &LoadLevelingConfig) -> Self {
        let speed = config.consumer_speed_ms;
        Self {
            queue: MessageQueue::new(),
            consumer: DrainConsumer::new(WORKER, speed.as_millis()),
            speed,
            spike: TimerSlot::new(),
            spike_remaining: 0,
            spike_injected: 0,
            spike_size: config.spike_size,
            spike_batch: config.spike_batch.max(1),
            spike_interval_ms: config.spike_interval_ms,
            overload_threshold: config.overload_threshold,
        }
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn speed(&self) -> ConsumerSpeed {
        self.speed
    }

    pub fn spike_active(&self) -> bool {
        self.spike_remaining > 0
    }

    fn fill_percent(&self) -> u32 {
        if self.spike_size == 0 {
            return 0;
        }
        let depth = self.queue.depth() as u64;
        let percent = depth * 100 / u64::from(self.spike_size);
        percent.min(100) as u32
    }

    fn inject_batch(&mut self, ctx: &mut Context<'_, LoadLevelingTimer>) {
        let at = ctx.now();
        let count = self.spike_batch.min(self.spike_remaining);
        for _ in 0..count {
            let message = self.queue.enqueue(at, None);
            ctx.emit(Event::MessageEnqueued {
                message,
                depth: self.queue.depth(),
                at,
            });
        }
        self.spike_remaining -= count;
        self.spike_injected += count;
        if self.spike_remaining == 0 {
            self.spike.cancel(ctx.scheduler());
            ctx.emit(Event::SpikeFinished {
                injected: self.spike_injected,
                at,
            });
        }
    }

    fn reconcile(&mut self, ctx: &mut Context<'_, LoadLevelingTimer>) {
        let has_work = self.queue.has_pending();
        if let Some(activity) =
            self.consumer
                .reconcile(has_work, true, ctx.scheduler(), LoadLevelingTimer::Drain)
        {
            let at = ctx.now();
            ctx.emit(Event::ConsumerChanged {
                consumer: WORKER,
                activity,
                at,
            });
        }
    }
}

impl Scenario for LoadLeveling {
    type Trigger = LoadLevelingTrigger;
    type Timer = LoadLevelingTimer;
    type Snapshot = LoadLevelingSnapshot;

    fn name(&self) -> &'static str {
        "load-leveling"
    }

    fn handle(
        &mut self,
        trigger: LoadLevelingTrigger,
        ctx: &mut Context<'_, LoadLevelingTimer>,
    ) -> Reaction {
        match trigger {
            LoadLevelingTrigger::TriggerSpike => {
                if self.spike_active() || self.spike_size == 0 {
                    return Reaction::Ignored;
                }
                self.spike_remaining = self.spike_size;
                self.spike_injected = 0;
                self.spike.arm_every(
                    ctx.scheduler(),
                    self.spike_interval_ms,
                    LoadLevelingTimer::SpikeBatch,
                );
                let at = ctx.now();
                ctx.emit(Event::SpikeStarted {
                    size: self.spike_size,
                    at,
                });
            }
            LoadLevelingTrigger::SetConsumerSpeed(ms) => {
                self.speed = ConsumerSpeed::clamped(ms);
                self.consumer.set_interval(
                    self.speed.as_millis(),
                    ctx.scheduler(),
                    LoadLevelingTimer::Drain,
                );
            }
        }
        self.reconcile(ctx);
        Reaction::Applied
    }

    fn on_timer(&mut self, timer: LoadLevelingTimer, ctx: &mut Context<'_, LoadLevelingTimer>) {
        match timer {
            LoadLevelingTimer::SpikeBatch => self.inject_batch(ctx),
            LoadLevelingTimer::Drain => {
                if let Some(message) = self.consumer.drain_one(&mut self.queue) {
                    let at = ctx.now();
                    ctx.emit(Event::MessageCompleted {
                        message: message.id,
                        consumer: WORKER,
                        at,
                    });
                    ctx.emit(Event::ConsumerTick {
                        consumer: WORKER,
                        at,
                    });
                }
            }
        }
        self.reconcile(ctx);
    }

    fn on_end(&mut self, ctx: &mut Context<'_, LoadLevelingTimer>) {
        self.spike.cancel(ctx.scheduler());
        self.spike_remaining = 0;
        if let Some(activity) = self.consumer.halt(ctx.scheduler()) {
            let at = ctx.now();
            ctx.emit(Event::ConsumerChanged {
                consumer: WORKER,
                activity,
                at,
            });
        }
    }

    fn snapshot(&self, now: Millis) -> LoadLevelingSnapshot {
        let depth = self.queue.depth();
        LoadLevelingSnapshot {
            at: now,
            depth,
            consumer_speed_ms: self.speed.as_millis(),
            processing: self.consumer.is_running(),
            spike_active: self.spike_active(),
            overloaded: depth > self.overload_threshold,
            fill_percent: self.fill_percent(),
            processed: self.consumer.drained(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::session::Session;
    use crate::test_utils::EventRecorder;

    fn session() -> Session<LoadLeveling> {
        Session::new(LoadLeveling::default())
    }

    #[test]
    fn spike_injects_exactly_spike_size() {
        let mut s = session();
        s.trigger(LoadLevelingTrigger::TriggerSpike);
        assert!(s.snapshot().spike_active);
        s.advance(20);
        assert_eq!(s.snapshot().depth, 5);
        s.advance(380);
        let snap = s.snapshot();
        // 100 injected by t = 400; the first drain tick is at 520.
        assert_eq!(snap.depth, 100);
        assert!(!snap.spike_active);
        assert!(snap.overloaded);
        assert_eq!(snap.fill_percent, 100);
        assert_eq!(s.events().total_emitted(EventKind::MessageEnqueued), 100);
        assert_eq!(s.events().total_emitted(EventKind::SpikeFinished), 1);
    }

    #[test]
    fn spike_is_ignored_while_active() {
        let mut s = session();
        s.trigger(LoadLevelingTrigger::TriggerSpike);
        s.advance(100);
        assert_eq!(s.trigger(LoadLevelingTrigger::TriggerSpike), Reaction::Ignored);
        s.advance(300);
        assert_eq!(s.scenario().queue().total_enqueued(), 100);
        assert_eq!(s.trigger(LoadLevelingTrigger::TriggerSpike), Reaction::Applied);
    }

    #[test]
    fn consumer_drains_at_configured_speed() {
        let mut s = session();
        s.trigger(LoadLevelingTrigger::TriggerSpike);
        s.advance(1_000);
        // The drain started with the first batch at t = 20.
        assert_eq!(s.snapshot().processed, 1);
        s.advance(1_000);
        assert_eq!(s.snapshot().processed, 3);
        assert_eq!(s.snapshot().depth, 97);
    }

    #[test]
    fn speed_is_clamped_and_rearms_drain() {
        let mut s = session();
        s.trigger(LoadLevelingTrigger::TriggerSpike);
        s.advance(400);
        s.trigger(LoadLevelingTrigger::SetConsumerSpeed(10));
        let snap = s.snapshot();
        assert_eq!(snap.consumer_speed_ms, 100);
        // One drain loop only.
        assert_eq!(s.pending_timers(), 1);
        s.advance(1_000);
        assert_eq!(s.snapshot().processed, 10);

        s.trigger(LoadLevelingTrigger::SetConsumerSpeed(60_000));
        assert_eq!(s.snapshot().consumer_speed_ms, 2_000);
    }

    #[test]
    fn idle_consumer_stops_when_empty() {
        let mut s = session();
        s.trigger(LoadLevelingTrigger::SetConsumerSpeed(100));
        s.trigger(LoadLevelingTrigger::TriggerSpike);
        s.run_until_quiet(60_000);
        let snap = s.snapshot();
        assert_eq!(snap.depth, 0);
        assert!(!snap.processing);
        assert_eq!(snap.processed, 100);
        assert_eq!(s.pending_timers(), 0);
    }

    #[test]
    fn batch_larger_than_event_ring_is_fully_observed() {
        let config = LoadLevelingConfig {
            spike_size: 300,
            spike_batch: 300,
            ..LoadLevelingConfig::default()
        };
        let mut s = Session::new(LoadLeveling::new(&config));
        let recorder = EventRecorder::attach(&mut s, &[EventKind::MessageEnqueued]);
        s.trigger(LoadLevelingTrigger::TriggerSpike);
        s.advance(20);
        assert_eq!(s.snapshot().depth, 300);
        assert_eq!(recorder.count(EventKind::MessageEnqueued), 300);
    }

    #[test]
    fn ending_mid_spike_leaves_nothing_running() {
        let mut s = session();
        s.trigger(LoadLevelingTrigger::TriggerSpike);
        s.advance(100);
        assert_eq!(s.end(), 2);

        let snap = s.snapshot();
        assert!(!snap.spike_active);
        assert!(!snap.processing);
        assert_eq!(snap.depth, 25);
        assert_eq!(s.pending_timers(), 0);
    }
}
