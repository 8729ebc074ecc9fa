//! mqsim Core -- a discrete-event engine for message-queue teaching
//! simulations.
//!
//! Every queue, producer and consumer is a timer-driven state machine over a
//! virtual clock. Nothing runs concurrently and nothing persists: a
//! [`session::Session`] owns one scenario together with its scheduler,
//! events and observers.
//!
//! # Reaction Cycle
//!
//! Each trigger or fired timer runs to completion:
//!
//! 1. **React** -- the scenario mutates its queue and actors and arms timers.
//! 2. **Re-evaluate** -- every consumer checks whether it should start or
//!    stop (level-triggered).
//! 3. **Deliver** -- buffered events reach passive listeners.
//! 4. **Publish** -- a snapshot goes to every observer.
//!
//! ```rust,ignore
//! let mut session = Session::new(LoadLeveling::default());
//! session.trigger(LoadLevelingTrigger::TriggerSpike);
//! session.advance(400);
//! assert_eq!(session.snapshot().depth, 100);
//! ```
//!
//! # Key Types
//!
//! - [`timer::Scheduler`] -- delayed and periodic timers with idempotent
//!   cancellation.
//! - [`queue::MessageQueue`] -- FIFO buffer with an in-flight protocol.
//! - [`actor`] -- producer, per-message consumer and periodic drain consumer.
//! - [`distribution::Distributor`] -- round-robin or fan-out routing.
//! - [`ack::AckLedger`] -- at-least-once delivery with explicit expiry.
//! - [`event::EventBus`] -- typed events with per-kind ring buffers.
//! - [`scenario`] -- kitchen, decoupling, load leveling, patterns and
//!   guarantees.
//! - [`config::SimConfig`] -- per-scenario settings with defaults.

pub mod ack;
pub mod actor;
pub mod config;
pub mod distribution;
pub mod event;
pub mod id;
pub mod queue;
pub mod scenario;
pub mod session;
pub mod timer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
