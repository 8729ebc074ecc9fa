//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::event::{Event, EventKind};
use crate::session::{Scenario, Session};
use crate::timer::Millis;
use std::cell::RefCell;
use std::rc::Rc;

// ===========================================================================
// Recorders
// ===========================================================================

/// Collects delivered events of the given kinds, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<Event>>>,
}

impl EventRecorder {
    /// Register on `session` for every kind in `kinds`.
    pub fn attach<S: Scenario>(session: &mut Session<S>, kinds: &[EventKind]) -> Self {
        let recorder = Self::default();
        for &kind in kinds {
            let sink = Rc::clone(&recorder.events);
            session
                .events_mut()
                .on_passive(kind, Box::new(move |e| sink.borrow_mut().push(e.clone())));
        }
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.borrow().iter().filter(|e| e.kind() == kind).count()
    }

    /// Times of every recorded event of `kind`.
    pub fn times(&self, kind: EventKind) -> Vec<Millis> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.kind() == kind)
            .map(Event::at)
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

/// Collects every snapshot a session publishes.
#[derive(Debug)]
pub struct SnapshotRecorder<Snap> {
    snapshots: Rc<RefCell<Vec<Snap>>>,
}

impl<Snap: Clone + 'static> SnapshotRecorder<Snap> {
    pub fn attach<S: Scenario<Snapshot = Snap>>(session: &mut Session<S>) -> Self {
        let snapshots = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&snapshots);
        session.subscribe(Box::new(move |snap: &Snap| sink.borrow_mut().push(snap.clone())));
        Self { snapshots }
    }

    pub fn len(&self) -> usize {
        self.snapshots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.borrow().is_empty()
    }

    pub fn last(&self) -> Option<Snap> {
        self.snapshots.borrow().last().cloned()
    }

    pub fn all(&self) -> Vec<Snap> {
        self.snapshots.borrow().clone()
    }
}

// ===========================================================================
// Session helpers
// ===========================================================================

/// Advance in `step` increments until `pred` holds or `limit` ms have
/// passed. Returns the time at which `pred` first held.
pub fn advance_until<S: Scenario>(
    session: &mut Session<S>,
    step: Millis,
    limit: Millis,
    mut pred: impl FnMut(&S::Snapshot) -> bool,
) -> Option<Millis> {
    let end = session.now().saturating_add(limit);
    let step = step.max(1);
    loop {
        if pred(&session.snapshot()) {
            return Some(session.now());
        }
        if session.now() >= end {
            return None;
        }
        let dt = step.min(end - session.now());
        session.advance(dt);
    }
}

/// Apply `trigger` `n` times, returning how many were applied.
pub fn trigger_n<S: Scenario>(session: &mut Session<S>, trigger: S::Trigger, n: usize) -> usize {
    (0..n)
        .filter(|_| session.trigger(trigger.clone()).is_applied())
        .count()
}
