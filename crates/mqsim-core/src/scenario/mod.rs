//! The five teaching simulations.
//!
//! Each scenario owns its queue and actors, implements [`Scenario`] and is
//! driven by a [`Session`](crate::session::Session). Scenarios share no
//! state; two sessions of the same scenario are fully independent.
//!
//! [`Scenario`]: crate::session::Scenario

pub mod decoupling;
pub mod guarantees;
pub mod kitchen;
pub mod load_leveling;
pub mod patterns;

pub use decoupling::Decoupling;
pub use guarantees::Guarantees;
pub use kitchen::Kitchen;
pub use load_leveling::LoadLeveling;
pub use patterns::Patterns;

use crate::actor::ConsumerActivity;
use crate::event::Event;
use crate::id::ConsumerId;
use crate::session::Context;

/// Emit a `ConsumerChanged` event if the activity moved during a reaction.
pub(crate) fn note_activity<T: Clone>(
    ctx: &mut Context<'_, T>,
    consumer: ConsumerId,
    before: ConsumerActivity,
    after: ConsumerActivity,
) {
    if before != after {
        let at = ctx.now();
        ctx.emit(Event::ConsumerChanged {
            consumer,
            activity: after,
            at,
        });
    }
}
