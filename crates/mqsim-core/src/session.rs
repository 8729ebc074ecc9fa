//! Session driver: one scenario instance, its clock, its events and its
//! observers.
//!
//! A [`Session`] runs every reaction to completion before anything else
//! happens:
//!
//! 1. the scenario handles a trigger or a fired timer, mutating its queue and
//!    actors and re-evaluating its consumers,
//! 2. buffered events are delivered to passive listeners,
//! 3. a snapshot is published to every observer.
//!
//! Triggers can be applied immediately ([`Session::trigger`]) or queued and
//! applied at the start of the next [`Session::advance`]
//! ([`Session::submit`]).

use crate::event::{Event, EventBus};
use crate::timer::{Millis, Scheduler};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// History entries kept by default.
pub const DEFAULT_TRIGGER_HISTORY: usize = 64;

// ---------------------------------------------------------------------------
// Scenario trait
// ---------------------------------------------------------------------------

/// Outcome of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Reaction {
    Applied,
    /// The trigger is not valid in the current state and changed nothing.
    Ignored,
}

impl Reaction {
    pub fn is_applied(self) -> bool {
        self == Reaction::Applied
    }
}

/// What a scenario may touch while reacting.
pub struct Context<'a, T> {
    scheduler: &'a mut Scheduler<T>,
    events: &'a mut EventBus,
}

impl<'a, T: Clone> Context<'a, T> {
    pub fn new(scheduler: &'a mut Scheduler<T>, events: &'a mut EventBus) -> Self {
        Self { scheduler, events }
    }

    pub fn now(&self) -> Millis {
        self.scheduler.now()
    }

    pub fn scheduler(&mut self) -> &mut Scheduler<T> {
        &mut *self.scheduler
    }

    pub fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }
}

/// A simulation that a [`Session`] can drive.
///
/// Triggers and timers are plain enums matched by the scenario. The scenario
/// must leave every consumer re-evaluated at the end of each reaction.
pub trait Scenario {
    type Trigger: Clone + fmt::Debug;
    type Timer: Clone + fmt::Debug;
    type Snapshot: Clone + fmt::Debug + Serialize;

    fn name(&self) -> &'static str;

    fn handle(&mut self, trigger: Self::Trigger, ctx: &mut Context<'_, Self::Timer>) -> Reaction;

    fn on_timer(&mut self, timer: Self::Timer, ctx: &mut Context<'_, Self::Timer>);

    /// The session is ending and its timers are already cancelled. Put every
    /// actor whose work was cut short back into a resting state.
    fn on_end(&mut self, _ctx: &mut Context<'_, Self::Timer>) {}

    fn snapshot(&self, now: Millis) -> Self::Snapshot;
}

// ---------------------------------------------------------------------------
// TriggerLog
// ---------------------------------------------------------------------------

/// Triggers waiting for the next advance, plus a bounded history of applied
/// triggers.
#[derive(Debug, Clone)]
pub struct TriggerLog<T> {
    pending: Vec<T>,
    history: Vec<(Millis, T)>,
    /// 0 = no history.
    max_history: usize,
}

impl<T: Clone> TriggerLog<T> {
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            pending: Vec::new(),
            history: Vec::new(),
            max_history,
        }
    }

    pub fn push(&mut self, trigger: T) {
        self.pending.push(trigger);
    }

    /// Take every queued trigger in submission order.
    pub fn take_pending(&mut self) -> Vec<T> {
        std::mem::take(&mut self.pending)
    }

    /// Remember an applied trigger, evicting the oldest past the limit.
    pub fn record(&mut self, at: Millis, trigger: T) {
        if self.max_history == 0 {
            return;
        }
        self.history.push((at, trigger));
        let excess = self.history.len().saturating_sub(self.max_history);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> &[(Millis, T)] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.history.clear();
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Counters for one [`Session::advance`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceResult {
    pub triggers_applied: usize,
    pub triggers_ignored: usize,
    pub timers_fired: usize,
}

impl AdvanceResult {
    fn absorb(&mut self, other: AdvanceResult) {
        self.triggers_applied += other.triggers_applied;
        self.triggers_ignored += other.triggers_ignored;
        self.timers_fired += other.timers_fired;
    }
}

pub type Observer<Snap> = Box<dyn FnMut(&Snap)>;

pub struct Session<S: Scenario> {
    scenario: S,
    scheduler: Scheduler<S::Timer>,
    events: EventBus,
    log: TriggerLog<S::Trigger>,
    observers: Vec<Observer<S::Snapshot>>,
    ended: bool,
}

impl<S: Scenario + fmt::Debug> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("scenario", &self.scenario)
            .field("now", &self.scheduler.now())
            .field("pending_timers", &self.scheduler.pending())
            .field("observers", &self.observers.len())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl<S: Scenario> Session<S> {
    pub fn new(scenario: S) -> Self {
        Self::with_history(scenario, DEFAULT_TRIGGER_HISTORY)
    }

    pub fn with_history(scenario: S, max_history: usize) -> Self {
        debug!(scenario = scenario.name(), "session started");
        Self {
            scenario,
            scheduler: Scheduler::new(),
            events: EventBus::default(),
            log: TriggerLog::with_max_history(max_history),
            observers: Vec::new(),
            ended: false,
        }
    }

    pub fn now(&self) -> Millis {
        self.scheduler.now()
    }

    pub fn scenario(&self) -> &S {
        &self.scenario
    }

    pub fn snapshot(&self) -> S::Snapshot {
        self.scenario.snapshot(self.scheduler.now())
    }

    /// Receive a snapshot after every applied trigger and every timer firing.
    pub fn subscribe(&mut self, observer: Observer<S::Snapshot>) {
        self.observers.push(observer);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register passive listeners or suppress kinds.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Applied triggers with the time they were applied at.
    pub fn history(&self) -> &[(Millis, S::Trigger)] {
        self.log.history()
    }

    /// Triggers submitted for the next advance.
    pub fn queued_triggers(&self) -> usize {
        self.log.pending_count()
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn next_due(&mut self) -> Option<Millis> {
        self.scheduler.next_due()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Apply a trigger now.
    pub fn trigger(&mut self, trigger: S::Trigger) -> Reaction {
        if self.ended {
            debug!(scenario = self.scenario.name(), ?trigger, "trigger after session end");
            return Reaction::Ignored;
        }
        self.apply(trigger)
    }

    /// Queue a trigger for the start of the next [`advance`](Self::advance).
    pub fn submit(&mut self, trigger: S::Trigger) {
        if self.ended {
            debug!(scenario = self.scenario.name(), ?trigger, "submit after session end");
            return;
        }
        self.log.push(trigger);
    }

    fn apply(&mut self, trigger: S::Trigger) -> Reaction {
        let now = self.scheduler.now();
        let mut ctx = Context::new(&mut self.scheduler, &mut self.events);
        let reaction = self.scenario.handle(trigger.clone(), &mut ctx);
        match reaction {
            Reaction::Applied => {
                self.log.record(now, trigger);
                self.finish_reaction();
            }
            Reaction::Ignored => {
                debug!(scenario = self.scenario.name(), ?trigger, now, "trigger ignored");
                self.events.deliver();
            }
        }
        reaction
    }

    fn finish_reaction(&mut self) {
        self.events.deliver();
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.scenario.snapshot(self.scheduler.now());
        for observer in &mut self.observers {
            observer(&snapshot);
        }
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Apply queued triggers, then fire every timer due within `dt` of now in
    /// due order. The clock ends at `now + dt`.
    pub fn advance(&mut self, dt: Millis) -> AdvanceResult {
        let mut result = AdvanceResult::default();
        if self.ended {
            return result;
        }
        for trigger in self.log.take_pending() {
            match self.apply(trigger) {
                Reaction::Applied => result.triggers_applied += 1,
                Reaction::Ignored => result.triggers_ignored += 1,
            }
        }

        let until = self.scheduler.now().saturating_add(dt);
        while let Some(fired) = self.scheduler.pop_due(until) {
            let mut ctx = Context::new(&mut self.scheduler, &mut self.events);
            self.scenario.on_timer(fired.action, &mut ctx);
            self.finish_reaction();
            result.timers_fired += 1;
        }
        self.scheduler.advance_clock(until);
        result
    }

    /// Jump from timer to timer until nothing is scheduled or the next timer
    /// lies more than `limit` past the current time. Periodic timers keep a
    /// session busy, so they run until the limit.
    pub fn run_until_quiet(&mut self, limit: Millis) -> AdvanceResult {
        let horizon = self.scheduler.now().saturating_add(limit);
        let mut result = self.advance(0);
        while let Some(due) = self.scheduler.next_due() {
            if due > horizon || self.ended {
                break;
            }
            let dt = due - self.scheduler.now();
            result.absorb(self.advance(dt));
        }
        result
    }

    /// Stop the session: every outstanding timer is cancelled, the scenario
    /// winds down its actors (publishing one final snapshot) and later
    /// triggers are ignored. Returns the number of cancelled timers.
    pub fn end(&mut self) -> usize {
        if self.ended {
            return 0;
        }
        self.ended = true;
        self.log.take_pending();
        let cancelled = self.scheduler.cancel_all();
        let mut ctx = Context::new(&mut self.scheduler, &mut self.events);
        self.scenario.on_end(&mut ctx);
        self.finish_reaction();
        debug!(scenario = self.scenario.name(), cancelled, now = self.scheduler.now(), "session ended");
        cancelled
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::id::ConsumerId;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A counter that ticks every `period` once started.
    #[derive(Debug, Default)]
    struct Metronome {
        ticks: u32,
        running: bool,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Cmd {
        Start(Millis),
        Bump,
    }

    #[derive(Debug, Clone)]
    struct Tick;

    impl Scenario for Metronome {
        type Trigger = Cmd;
        type Timer = Tick;
        type Snapshot = u32;

        fn name(&self) -> &'static str {
            "metronome"
        }

        fn handle(&mut self, trigger: Cmd, ctx: &mut Context<'_, Tick>) -> Reaction {
            match trigger {
                Cmd::Start(_) if self.running => Reaction::Ignored,
                Cmd::Start(period) => {
                    self.running = true;
                    ctx.scheduler().every(period, Tick);
                    Reaction::Applied
                }
                Cmd::Bump => {
                    self.ticks += 100;
                    Reaction::Applied
                }
            }
        }

        fn on_end(&mut self, _ctx: &mut Context<'_, Tick>) {
            self.running = false;
        }

        fn on_timer(&mut self, _: Tick, ctx: &mut Context<'_, Tick>) {
            self.ticks += 1;
            let at = ctx.now();
            ctx.emit(Event::ConsumerTick {
                consumer: ConsumerId(0),
                at,
            });
        }

        fn snapshot(&self, _now: Millis) -> u32 {
            self.ticks
        }
    }

    // ---- Test 1: trigger applies immediately ----
    #[test]
    fn trigger_applies_immediately() {
        let mut session = Session::new(Metronome::default());
        assert_eq!(session.trigger(Cmd::Bump), Reaction::Applied);
        assert_eq!(session.snapshot(), 100);
        assert_eq!(session.history(), &[(0, Cmd::Bump)]);
    }

    // ---- Test 2: ignored trigger is not recorded ----
    #[test]
    fn ignored_trigger_not_recorded() {
        let mut session = Session::new(Metronome::default());
        session.trigger(Cmd::Start(10));
        assert_eq!(session.trigger(Cmd::Start(10)), Reaction::Ignored);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.pending_timers(), 1);
    }

    // ---- Test 3: submitted triggers wait for advance ----
    #[test]
    fn submit_applies_at_next_advance() {
        let mut session = Session::new(Metronome::default());
        session.submit(Cmd::Bump);
        assert_eq!(session.snapshot(), 0);
        assert_eq!(session.queued_triggers(), 1);
        let result = session.advance(0);
        assert_eq!(result.triggers_applied, 1);
        assert_eq!(session.snapshot(), 100);
        assert_eq!(session.queued_triggers(), 0);
    }

    // ---- Test 4: advance fires due timers and moves the clock ----
    #[test]
    fn advance_fires_due_timers() {
        let mut session = Session::new(Metronome::default());
        session.trigger(Cmd::Start(100));
        let result = session.advance(350);
        assert_eq!(result.timers_fired, 3);
        assert_eq!(session.now(), 350);
        assert_eq!(session.snapshot(), 3);
    }

    // ---- Test 5: observers see every reaction ----
    #[test]
    fn observers_receive_snapshots() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut session = Session::new(Metronome::default());
        session.subscribe(Box::new(move |snap: &u32| sink.borrow_mut().push(*snap)));
        session.trigger(Cmd::Start(50));
        session.advance(100);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    // ---- Test 6: events reach passive listeners after each reaction ----
    #[test]
    fn events_delivered_per_reaction() {
        let ticks = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&ticks);
        let mut session = Session::new(Metronome::default());
        session.events_mut().on_passive(
            EventKind::ConsumerTick,
            Box::new(move |e| sink.borrow_mut().push(e.at())),
        );
        session.trigger(Cmd::Start(40));
        session.advance(120);
        assert_eq!(*ticks.borrow(), vec![40, 80, 120]);
        assert_eq!(session.events().buffered_count(EventKind::ConsumerTick), 0);
    }

    // ---- Test 7: end cancels timers and ignores later triggers ----
    #[test]
    fn end_cancels_everything() {
        let mut session = Session::new(Metronome::default());
        session.trigger(Cmd::Start(10));
        session.advance(25);
        assert_eq!(session.end(), 1);
        assert_eq!(session.pending_timers(), 0);
        assert_eq!(session.trigger(Cmd::Bump), Reaction::Ignored);
        assert_eq!(session.advance(1_000), AdvanceResult::default());
        assert_eq!(session.snapshot(), 2);
        assert_eq!(session.end(), 0);
        assert!(!session.scenario().running);
    }

    // ---- Test 8: run_until_quiet stops at the horizon for periodic timers ----
    #[test]
    fn run_until_quiet_respects_limit() {
        let mut session = Session::new(Metronome::default());
        session.trigger(Cmd::Start(100));
        let result = session.run_until_quiet(1_000);
        assert_eq!(result.timers_fired, 10);
        assert_eq!(session.now(), 1_000);
    }

    // ---- Test 9: bounded history ----
    #[test]
    fn history_is_bounded() {
        let mut session = Session::with_history(Metronome::default(), 2);
        for _ in 0..5 {
            session.trigger(Cmd::Bump);
        }
        assert_eq!(session.history().len(), 2);

        let mut silent = Session::with_history(Metronome::default(), 0);
        silent.trigger(Cmd::Bump);
        assert!(silent.history().is_empty());
    }
}
