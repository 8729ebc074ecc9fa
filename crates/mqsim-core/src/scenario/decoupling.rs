//! Temporal decoupling: the same request sent synchronously and through a
//! queue while the receiving service goes up and down.
//!
//! A synchronous call fails if the peer is offline when it resolves. A queued
//! message is always accepted; it waits in the queue until the peer is back,
//! then drains one message per interval.

use crate::actor::DrainConsumer;
use crate::config::DecouplingConfig;
use crate::event::Event;
use crate::id::ConsumerId;
use crate::queue::MessageQueue;
use crate::session::{Context, Reaction, Scenario};
use crate::timer::{Millis, TimerSlot};
use serde::Serialize;

const SERVICE_B: ConsumerId = ConsumerId(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecouplingTrigger {
    SendAsync,
    SendSync,
    TogglePeer,
    SetPeerOnline(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecouplingTimer {
    NoticeElapsed,
    SyncResolved,
    SyncReset,
    Drain,
}

/// The synchronous call, as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SyncCall {
    #[default]
    Idle,
    Sending,
    Succeeded,
    Failed,
}

/// Explanatory banner under the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DecouplingHint {
    /// Peer offline with messages waiting: nothing is lost.
    BacklogSafe,
    /// Peer online and working through the backlog.
    Draining,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecouplingSnapshot {
    pub at: Millis,
    pub peer_online: bool,
    pub depth: usize,
    pub draining: bool,
    pub sync: SyncCall,
    pub notice_visible: bool,
    pub hint: Option<DecouplingHint>,
}

#[derive(Debug)]
pub struct Decoupling {
    queue: MessageQueue,
    consumer: DrainConsumer,
    peer_online: bool,
    notice: TimerSlot,
    notice_ms: Millis,
    notice_visible: bool,
    sync: SyncCall,
    sync_slot: TimerSlot,
    sync_latency_ms: Millis,
    sync_result_ms: Millis,
}

impl Default for Decoupling {
    fn default() -> Self {
        Self::new(&DecouplingConfig::default())
    }
}

impl Decoupling {
    pub fn new(config: &DecouplingConfig) -> Self {
        Self {
            queue: MessageQueue::new(),
            consumer: DrainConsumer::new(SERVICE_B, config.drain_interval_ms),
            peer_online: config.peer_online,
            notice: TimerSlot::new(),
            notice_ms: config.async_notice_ms,
            notice_visible: false,
            sync: SyncCall::Idle,
            sync_slot: TimerSlot::new(),
            sync_latency_ms: config.sync_latency_ms,
            sync_result_ms: config.sync_result_ms,
        }
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn peer_online(&self) -> bool {
        self.peer_online
    }

    fn set_peer(&mut self, online: bool, ctx: &mut Context<'_, DecouplingTimer>) {
        self.peer_online = online;
        let at = ctx.now();
        ctx.emit(Event::PeerChanged { online, at });
    }

    /// Drain while the peer is online and there is something to drain.
    fn reconcile(&mut self, ctx: &mut Context<'_, DecouplingTimer>) {
        let has_work = self.queue.has_pending();
        if let Some(activity) =
            self.consumer
                .reconcile(has_work, self.peer_online, ctx.scheduler(), DecouplingTimer::Drain)
        {
            let at = ctx.now();
            ctx.emit(Event::ConsumerChanged {
                consumer: SERVICE_B,
                activity,
                at,
            });
        }
    }

    fn hint(&self) -> Option<DecouplingHint> {
        if !self.peer_online && !self.queue.is_empty() {
            Some(DecouplingHint::BacklogSafe)
        } else if self.consumer.is_running() {
            Some(DecouplingHint::Draining)
        } else {
            None
        }
    }
}

impl Scenario for Decoupling {
    type Trigger = DecouplingTrigger;
    type Timer = DecouplingTimer;
    type Snapshot = DecouplingSnapshot;

    fn name(&self) -> &'static str {
        "decoupling"
    }

    fn handle(
        &mut self,
        trigger: DecouplingTrigger,
        ctx: &mut Context<'_, DecouplingTimer>,
    ) -> Reaction {
        let at = ctx.now();
        match trigger {
            DecouplingTrigger::SendAsync => {
                let message = self.queue.enqueue(at, None);
                ctx.emit(Event::MessageEnqueued {
                    message,
                    depth: self.queue.depth(),
                    at,
                });
                self.notice_visible = true;
                self.notice
                    .arm_after(ctx.scheduler(), self.notice_ms, DecouplingTimer::NoticeElapsed);
            }
            DecouplingTrigger::SendSync => {
                if self.sync == SyncCall::Sending {
                    return Reaction::Ignored;
                }
                self.sync = SyncCall::Sending;
                self.sync_slot.arm_after(
                    ctx.scheduler(),
                    self.sync_latency_ms,
                    DecouplingTimer::SyncResolved,
                );
            }
            DecouplingTrigger::TogglePeer => {
                self.set_peer(!self.peer_online, ctx);
            }
            DecouplingTrigger::SetPeerOnline(online) => {
                if online == self.peer_online {
                    return Reaction::Ignored;
                }
                self.set_peer(online, ctx);
            }
        }
        self.reconcile(ctx);
        Reaction::Applied
    }

    fn on_timer(&mut self, timer: DecouplingTimer, ctx: &mut Context<'_, DecouplingTimer>) {
        let at = ctx.now();
        match timer {
            DecouplingTimer::NoticeElapsed => self.notice_visible = false,
            DecouplingTimer::SyncResolved => {
                // The outcome depends on the peer at resolution time.
                let succeeded = self.peer_online;
                self.sync = if succeeded {
                    SyncCall::Succeeded
                } else {
                    SyncCall::Failed
                };
                ctx.emit(Event::SyncCallResolved { succeeded, at });
                self.sync_slot
                    .arm_after(ctx.scheduler(), self.sync_result_ms, DecouplingTimer::SyncReset);
            }
            DecouplingTimer::SyncReset => self.sync = SyncCall::Idle,
            DecouplingTimer::Drain => {
                if let Some(message) = self.consumer.drain_one(&mut self.queue) {
                    ctx.emit(Event::MessageCompleted {
                        message: message.id,
                        consumer: SERVICE_B,
                        at,
                    });
                    ctx.emit(Event::ConsumerTick {
                        consumer: SERVICE_B,
                        at,
                    });
                }
            }
        }
        self.reconcile(ctx);
    }

    fn on_end(&mut self, ctx: &mut Context<'_, DecouplingTimer>) {
        self.notice.cancel(ctx.scheduler());
        self.sync_slot.cancel(ctx.scheduler());
        self.notice_visible = false;
        self.sync = SyncCall::Idle;
        if let Some(activity) = self.consumer.halt(ctx.scheduler()) {
            let at = ctx.now();
            ctx.emit(Event::ConsumerChanged {
                consumer: SERVICE_B,
                activity,
                at,
            });
        }
    }

    fn snapshot(&self, now: Millis) -> DecouplingSnapshot {
        DecouplingSnapshot {
            at: now,
            peer_online: self.peer_online,
            depth: self.queue.depth(),
            draining: self.consumer.is_running(),
            sync: self.sync,
            notice_visible: self.notice_visible,
            hint: self.hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn session() -> Session<Decoupling> {
        Session::new(Decoupling::default())
    }

    #[test]
    fn sync_call_succeeds_when_peer_online() {
        let mut s = session();
        s.trigger(DecouplingTrigger::SendSync);
        assert_eq!(s.snapshot().sync, SyncCall::Sending);
        assert_eq!(s.trigger(DecouplingTrigger::SendSync), Reaction::Ignored);
        s.advance(1_000);
        assert_eq!(s.snapshot().sync, SyncCall::Succeeded);
        s.advance(2_000);
        assert_eq!(s.snapshot().sync, SyncCall::Idle);
    }

    #[test]
    fn sync_call_fails_if_peer_drops_before_resolution() {
        let mut s = session();
        s.trigger(DecouplingTrigger::SendSync);
        s.advance(400);
        s.trigger(DecouplingTrigger::TogglePeer);
        s.advance(600);
        assert_eq!(s.snapshot().sync, SyncCall::Failed);
    }

    #[test]
    fn async_send_never_fails_offline() {
        let mut s = session();
        s.trigger(DecouplingTrigger::SetPeerOnline(false));
        for _ in 0..3 {
            assert_eq!(s.trigger(DecouplingTrigger::SendAsync), Reaction::Applied);
        }
        s.advance(10_000);
        let snap = s.snapshot();
        assert_eq!(snap.depth, 3);
        assert!(!snap.draining);
        assert_eq!(snap.hint, Some(DecouplingHint::BacklogSafe));
    }

    #[test]
    fn notice_shows_for_half_a_second_and_restarts() {
        let mut s = session();
        s.trigger(DecouplingTrigger::SetPeerOnline(false));
        s.trigger(DecouplingTrigger::SendAsync);
        s.advance(300);
        s.trigger(DecouplingTrigger::SendAsync);
        s.advance(300);
        assert!(s.snapshot().notice_visible);
        s.advance(200);
        assert!(!s.snapshot().notice_visible);
    }

    #[test]
    fn reconnect_drains_one_per_interval() {
        let mut s = session();
        s.trigger(DecouplingTrigger::SetPeerOnline(false));
        for _ in 0..3 {
            s.trigger(DecouplingTrigger::SendAsync);
        }
        s.advance(5_000);
        s.trigger(DecouplingTrigger::SetPeerOnline(true));
        assert!(s.snapshot().draining);
        assert_eq!(s.snapshot().hint, Some(DecouplingHint::Draining));

        s.advance(999);
        assert_eq!(s.snapshot().depth, 3);
        s.advance(1);
        assert_eq!(s.snapshot().depth, 2);
        s.advance(2_000);
        let snap = s.snapshot();
        assert_eq!(snap.depth, 0);
        assert!(!snap.draining);
        assert_eq!(snap.hint, None);
    }

    #[test]
    fn going_offline_pauses_drain() {
        let mut s = session();
        for _ in 0..4 {
            s.trigger(DecouplingTrigger::SendAsync);
        }
        s.advance(1_000);
        assert_eq!(s.snapshot().depth, 3);
        s.trigger(DecouplingTrigger::TogglePeer);
        s.advance(5_000);
        assert_eq!(s.snapshot().depth, 3);
    }

    #[test]
    fn redundant_peer_setting_is_ignored() {
        let mut s = session();
        assert_eq!(
            s.trigger(DecouplingTrigger::SetPeerOnline(true)),
            Reaction::Ignored
        );
    }

    #[test]
    fn ending_while_draining_stops_everything() {
        let mut s = session();
        for _ in 0..3 {
            s.trigger(DecouplingTrigger::SendAsync);
        }
        s.trigger(DecouplingTrigger::SendSync);
        s.advance(100);
        s.end();

        let snap = s.snapshot();
        assert!(!snap.draining);
        assert!(!snap.notice_visible);
        assert_eq!(snap.sync, SyncCall::Idle);
        assert_eq!(snap.depth, 3);
        assert_eq!(snap.hint, None);
        assert_eq!(s.pending_timers(), 0);
    }
}
