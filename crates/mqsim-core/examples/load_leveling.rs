//! Runs a load-leveling spike and prints one JSON snapshot per second of
//! virtual time.
//!
//! ```text
//! RUST_LOG=mqsim_core=debug cargo run -p mqsim-core --example load_leveling
//! ```

use mqsim_core::event::EventKind;
use mqsim_core::scenario::load_leveling::{LoadLeveling, LoadLevelingTrigger};
use mqsim_core::session::Session;
use std::cell::Cell;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,mqsim_core=info")),
        )
        .init();

    let mut session = Session::new(LoadLeveling::default());

    let ticks = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&ticks);
    session.events_mut().on_passive(
        EventKind::ConsumerTick,
        Box::new(move |_| counter.set(counter.get() + 1)),
    );

    session.trigger(LoadLevelingTrigger::TriggerSpike);
    for second in 0..=60 {
        if second == 10 {
            session.trigger(LoadLevelingTrigger::SetConsumerSpeed(200));
        }
        let snapshot = session.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("snapshot not serializable: {err}"),
        }
        if snapshot.depth == 0 && !snapshot.spike_active && second > 0 {
            break;
        }
        session.advance(1_000);
    }

    println!("consumer ticks: {}", ticks.get());
    session.end();
}
