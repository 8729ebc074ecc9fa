//! Property-based tests for the mqsim core engine.
//!
//! Uses proptest to generate random operation sequences against the queue,
//! the distributor, the acknowledgment ledger, the scheduler and the load
//! leveling scenario, then verify their invariants hold.

use mqsim_core::ack::AckLedger;
use mqsim_core::config::LoadLevelingConfig;
use mqsim_core::distribution::{DistributionMode, Distributor};
use mqsim_core::id::{ConsumerId, MessageId};
use mqsim_core::queue::MessageQueue;
use mqsim_core::scenario::load_leveling::{LoadLeveling, LoadLevelingTrigger};
use mqsim_core::session::Session;
use mqsim_core::timer::Scheduler;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

/// Operations against a queue guarded by an ack ledger.
#[derive(Debug, Clone)]
enum AckOp {
    Enqueue,
    Dispatch(u32),
    /// Acknowledge the n-th outstanding record (modulo the count).
    Ack(usize),
    /// Expire the n-th outstanding record (modulo the count).
    Expire(usize),
}

fn arb_ack_ops(max_ops: usize) -> impl Strategy<Value = Vec<AckOp>> {
    proptest::collection::vec(
        prop_oneof![
            3 => Just(AckOp::Enqueue),
            3 => (0..4u32).prop_map(AckOp::Dispatch),
            2 => (0..16usize).prop_map(AckOp::Ack),
            2 => (0..16usize).prop_map(AckOp::Expire),
        ],
        1..=max_ops,
    )
}

/// Scheduler operations for cancellation properties.
#[derive(Debug, Clone)]
enum TimerOp {
    After(u64),
    Every(u64),
    Cancel(usize),
    Advance(u64),
}

fn arb_timer_ops(max_ops: usize) -> impl Strategy<Value = Vec<TimerOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0..500u64).prop_map(TimerOp::After),
            (1..200u64).prop_map(TimerOp::Every),
            (0..32usize).prop_map(TimerOp::Cancel),
            (0..300u64).prop_map(TimerOp::Advance),
        ],
        1..=max_ops,
    )
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// N enqueues with no dequeue give depth N.
    #[test]
    fn depth_counts_enqueues(n in 0..500usize) {
        let mut q = MessageQueue::new();
        for i in 0..n {
            q.enqueue(i as u64, None);
        }
        prop_assert_eq!(q.depth(), n);
        prop_assert_eq!(q.pending_count(), n);
    }

    /// Dequeue order equals enqueue order.
    #[test]
    fn dequeue_is_fifo(n in 1..200usize) {
        let mut q = MessageQueue::new();
        let ids: Vec<MessageId> = (0..n).map(|_| q.enqueue(0, None)).collect();
        let drained: Vec<MessageId> =
            std::iter::from_fn(|| q.dequeue_front()).map(|m| m.id).collect();
        prop_assert_eq!(drained, ids);
        prop_assert!(q.is_empty());
    }

    /// Point-to-point: dispatch n goes to consumer n mod K, and every
    /// consumer gets floor(N/K) or ceil(N/K) messages.
    #[test]
    fn round_robin_is_fair(k in 1..10u32, n in 0..300usize) {
        let mut d = Distributor::with_consumer_count(DistributionMode::PointToPoint, k);
        for i in 0..n {
            let targets = d.route();
            prop_assert_eq!(targets, vec![ConsumerId((i % k as usize) as u32)]);
        }
        let floor = (n / k as usize) as u64;
        let ceil = n.div_ceil(k as usize) as u64;
        for (_, received) in d.received_counts() {
            prop_assert!(received == floor || received == ceil);
        }
    }

    /// Fan-out: every consumer gets every message.
    #[test]
    fn fan_out_is_complete(k in 1..10u32, n in 0..100usize) {
        let mut d = Distributor::with_consumer_count(DistributionMode::FanOut, k);
        for _ in 0..n {
            prop_assert_eq!(d.route().len(), k as usize);
        }
        for (_, received) in d.received_counts() {
            prop_assert_eq!(received, n as u64);
        }
    }

    /// Messages leave the queue only through acknowledgment, and every
    /// dispatch ends in exactly one outcome.
    #[test]
    fn ack_conserves_unacknowledged(ops in arb_ack_ops(120)) {
        let mut q = MessageQueue::new();
        let mut ledger = AckLedger::default();
        let mut outstanding: Vec<MessageId> = Vec::new();
        let mut enqueued = 0u64;
        let mut now = 0;

        for op in ops {
            now += 10;
            match op {
                AckOp::Enqueue => {
                    q.enqueue(now, None);
                    enqueued += 1;
                }
                AckOp::Dispatch(c) => {
                    if let Some(id) = ledger.dispatch(&mut q, ConsumerId(c), now) {
                        outstanding.push(id);
                    }
                }
                AckOp::Ack(i) if !outstanding.is_empty() => {
                    let id = outstanding.remove(i % outstanding.len());
                    prop_assert!(ledger.acknowledge(&mut q, id).is_ok());
                    prop_assert!(ledger.expire(&mut q, id).is_err());
                }
                AckOp::Expire(i) if !outstanding.is_empty() => {
                    let id = outstanding.remove(i % outstanding.len());
                    prop_assert!(ledger.expire(&mut q, id).is_ok());
                    prop_assert_eq!(q.peek_front().map(|m| m.id), Some(id));
                }
                _ => {}
            }
            prop_assert_eq!(q.depth() as u64, enqueued - ledger.acknowledged_count());
            prop_assert_eq!(q.in_flight_count(), ledger.in_flight());
            prop_assert_eq!(ledger.in_flight(), outstanding.len());
        }
    }

    /// Cancelling is idempotent and a cancelled timer never fires.
    #[test]
    fn cancel_is_idempotent(ops in arb_timer_ops(80)) {
        let mut s: Scheduler<usize> = Scheduler::new();
        let mut handles = Vec::new();
        let mut cancelled = Vec::new();

        for op in ops {
            match op {
                TimerOp::After(d) => handles.push(s.after(d, handles.len())),
                TimerOp::Every(i) => handles.push(s.every(i, handles.len())),
                TimerOp::Cancel(i) if !handles.is_empty() => {
                    let idx = i % handles.len();
                    let h = handles[idx];
                    let was = s.is_scheduled(h);
                    prop_assert_eq!(s.cancel(h), was);
                    prop_assert!(!s.cancel(h));
                    cancelled.push(idx);
                }
                TimerOp::Advance(dt) => {
                    let until = s.now() + dt;
                    while let Some(fired) = s.pop_due(until) {
                        prop_assert!(!cancelled.contains(&fired.action));
                    }
                    s.advance_clock(until);
                }
                _ => {}
            }
        }
    }

    /// A spike injects exactly `spike_size` messages whatever the batch.
    #[test]
    fn spike_injects_exactly_size(size in 1..300u32, batch in 1..20u32) {
        let config = LoadLevelingConfig {
            spike_size: size,
            spike_batch: batch,
            ..LoadLevelingConfig::default()
        };
        let mut session = Session::new(LoadLeveling::new(&config));
        session.trigger(LoadLevelingTrigger::TriggerSpike);
        while session.snapshot().spike_active {
            session.advance(config.spike_interval_ms);
        }
        prop_assert_eq!(session.scenario().queue().total_enqueued(), size as u64);
    }

    /// Speed changes never leave more than one drain loop running.
    #[test]
    fn speed_changes_keep_one_drain(speeds in proptest::collection::vec(0..3_000u64, 1..20)) {
        let mut session = Session::new(LoadLeveling::default());
        session.trigger(LoadLevelingTrigger::TriggerSpike);
        session.advance(400);
        for speed in speeds {
            session.trigger(LoadLevelingTrigger::SetConsumerSpeed(speed));
            prop_assert!(session.pending_timers() <= 1);
            session.advance(250);
        }
        let snap = session.snapshot();
        prop_assert_eq!(snap.depth as u64 + snap.processed, 100);
    }
}
