//! Virtual-time scheduler for delayed and periodic timers.
//!
//! Every suspension point of a simulation flows through a [`Scheduler`].
//! Timers carry a typed action (usually a scenario-specific enum) instead of a
//! boxed callback; the owner pops due timers and dispatches on the action.
//! The scheduler is its own clock, so tests drive it deterministically.
//!
//! # Ordering
//!
//! Timers fire in due-time order. Timers due at the same instant fire in the
//! order they were scheduled (or last re-armed, for periodic timers).
//!
//! # Cancellation
//!
//! [`Scheduler::cancel`] is idempotent. Cancelling an unknown, already
//! cancelled or already fired handle returns `false` and does nothing.

use crate::id::TimerHandle;
use slotmap::SlotMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::trace;

/// Virtual milliseconds since the start of a session.
pub type Millis = u64;

// ---------------------------------------------------------------------------
// Timer entries
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TimerEntry<T> {
    action: T,
    due: Millis,
    /// `Some` for periodic timers.
    interval: Option<Millis>,
    /// Sequence number of the live heap entry. Older heap entries for this
    /// timer are stale and skipped.
    seq: u64,
}

/// A timer that came due, returned by [`Scheduler::pop_due`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<T> {
    pub handle: TimerHandle,
    /// The instant the timer was due. The clock equals this after the pop.
    pub at: Millis,
    pub action: T,
    /// Whether the timer stays scheduled (periodic).
    pub repeating: bool,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Delayed and periodic timers over a virtual clock.
#[derive(Debug)]
pub struct Scheduler<T> {
    now: Millis,
    next_seq: u64,
    timers: SlotMap<TimerHandle, TimerEntry<T>>,
    heap: BinaryHeap<Reverse<(Millis, u64, TimerHandle)>>,
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Scheduler<T> {
    /// Create a scheduler with the clock at zero.
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            timers: SlotMap::with_key(),
            heap: BinaryHeap::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Millis {
        self.now
    }

    /// Schedule `action` to fire once, `delay` milliseconds from now.
    pub fn after(&mut self, delay: Millis, action: T) -> TimerHandle {
        self.insert(delay, None, action)
    }

    /// Schedule `action` to fire every `interval` milliseconds, starting one
    /// interval from now. A zero interval is clamped to 1 ms.
    pub fn every(&mut self, interval: Millis, action: T) -> TimerHandle {
        let interval = interval.max(1);
        self.insert(interval, Some(interval), action)
    }

    fn insert(&mut self, delay: Millis, interval: Option<Millis>, action: T) -> TimerHandle {
        let due = self.now.saturating_add(delay);
        let seq = self.bump_seq();
        let handle = self.timers.insert(TimerEntry {
            action,
            due,
            interval,
            seq,
        });
        self.heap.push(Reverse((due, seq, handle)));
        trace!(now = self.now, due, ?interval, ?handle, "timer scheduled");
        handle
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Cancel a timer. Returns `true` only if the timer was still scheduled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let removed = self.timers.remove(handle).is_some();
        if removed {
            trace!(now = self.now, ?handle, "timer cancelled");
        }
        removed
    }

    /// Cancel every scheduled timer. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        self.timers.clear();
        self.heap.clear();
        count
    }

    /// Whether the handle refers to a timer that will still fire.
    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(handle)
    }

    /// Number of scheduled timers.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Due time of the earliest scheduled timer.
    pub fn next_due(&mut self) -> Option<Millis> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its due time. Periodic timers are re-armed one interval later under
    /// the same handle.
    pub fn pop_due(&mut self, until: Millis) -> Option<Fired<T>> {
        self.discard_stale();
        let Reverse((due, _, handle)) = *self.heap.peek()?;
        if due > until {
            return None;
        }
        self.heap.pop();
        self.now = self.now.max(due);

        let interval = self.timers.get(handle)?.interval;
        let fired = match interval {
            Some(interval) => {
                let seq = self.bump_seq();
                let entry = self.timers.get_mut(handle)?;
                entry.due = due.saturating_add(interval);
                entry.seq = seq;
                let next = entry.due;
                let action = entry.action.clone();
                self.heap.push(Reverse((next, seq, handle)));
                Fired {
                    handle,
                    at: due,
                    action,
                    repeating: true,
                }
            }
            None => {
                let entry = self.timers.remove(handle)?;
                Fired {
                    handle,
                    at: due,
                    action: entry.action,
                    repeating: false,
                }
            }
        };
        trace!(now = self.now, ?handle, repeating = fired.repeating, "timer fired");
        Some(fired)
    }

    /// Move the clock forward without firing anything. Never moves backwards.
    pub fn advance_clock(&mut self, to: Millis) {
        self.now = self.now.max(to);
    }

    /// Drop heap entries whose timer was cancelled or re-armed.
    fn discard_stale(&mut self) {
        while let Some(&Reverse((_, seq, handle))) = self.heap.peek() {
            match self.timers.get(handle) {
                Some(entry) if entry.seq == seq => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TimerSlot
// ---------------------------------------------------------------------------

/// Tracks the single active timer of one role (a drain loop, a display
/// delay, ...). Arming the slot cancels whatever it previously held, so a
/// role never has two live timers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerSlot(Option<TimerHandle>);

impl TimerSlot {
    pub fn new() -> Self {
        Self(None)
    }

    /// Cancel the previous timer of this role, then schedule a one-shot.
    pub fn arm_after<T: Clone>(
        &mut self,
        scheduler: &mut Scheduler<T>,
        delay: Millis,
        action: T,
    ) -> TimerHandle {
        self.cancel(scheduler);
        let handle = scheduler.after(delay, action);
        self.0 = Some(handle);
        handle
    }

    /// Cancel the previous timer of this role, then schedule a periodic timer.
    pub fn arm_every<T: Clone>(
        &mut self,
        scheduler: &mut Scheduler<T>,
        interval: Millis,
        action: T,
    ) -> TimerHandle {
        self.cancel(scheduler);
        let handle = scheduler.every(interval, action);
        self.0 = Some(handle);
        handle
    }

    /// Cancel the held timer, if any. Safe to call repeatedly.
    pub fn cancel<T: Clone>(&mut self, scheduler: &mut Scheduler<T>) -> bool {
        self.0.take().is_some_and(|h| scheduler.cancel(h))
    }

    /// Whether the slot holds a timer that will still fire.
    pub fn is_armed<T: Clone>(&self, scheduler: &Scheduler<T>) -> bool {
        self.0.is_some_and(|h| scheduler.is_scheduled(h))
    }

    pub fn handle(&self) -> Option<TimerHandle> {
        self.0
    }
}

// ===========================================================================
// Tests
// ===========================================================================
