//! Typed simulation events with per-kind ring buffers.
//!
//! Events are emitted while a session reacts to a trigger or a timer firing,
//! and delivered in batch once the reaction has finished. Undelivered events
//! are queued without a bound, so a reaction never loses one. Each event kind
//! also keeps its most recent events in an [`EventBuffer`] with a
//! configurable capacity, for inspection after delivery.
//!
//! Listeners are passive: they observe and never mutate the simulation. The
//! view layer uses them for transient effects such as the [`Event::ConsumerTick`]
//! highlight.
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`EventBus::suppress`], which prevents
//! any allocation or recording for that kind.

use crate::actor::{ConsumerActivity, ProducerState};
use crate::id::{ConsumerId, MessageId};
use crate::timer::Millis;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation event. All events carry the virtual time they occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Queue --
    MessageEnqueued {
        message: MessageId,
        depth: usize,
        at: Millis,
    },
    MessageDispatched {
        message: MessageId,
        consumer: ConsumerId,
        at: Millis,
    },
    /// Removed after processing, without the acknowledgment protocol.
    MessageCompleted {
        message: MessageId,
        consumer: ConsumerId,
        at: Millis,
    },
    MessageRouted {
        message: MessageId,
        targets: usize,
        at: Millis,
    },

    // -- Acknowledgment --
    MessageAcknowledged {
        message: MessageId,
        at: Millis,
    },
    MessageExpired {
        message: MessageId,
        at: Millis,
    },
    MessageRestored {
        message: MessageId,
        at: Millis,
    },

    // -- Actors --
    ProducerChanged {
        state: ProducerState,
        at: Millis,
    },
    ConsumerChanged {
        consumer: ConsumerId,
        activity: ConsumerActivity,
        at: Millis,
    },
    /// One unit of work finished; a pulse for the view.
    ConsumerTick {
        consumer: ConsumerId,
        at: Millis,
    },
    PeerChanged {
        online: bool,
        at: Millis,
    },

    // -- Traffic --
    SpikeStarted {
        size: u32,
        at: Millis,
    },
    SpikeFinished {
        injected: u32,
        at: Millis,
    },
    SyncCallResolved {
        succeeded: bool,
        at: Millis,
    },
}

/// Discriminant tag for event types, used for suppression and subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageEnqueued,
    MessageDispatched,
    MessageCompleted,
    MessageRouted,
    MessageAcknowledged,
    MessageExpired,
    MessageRestored,
    ProducerChanged,
    ConsumerChanged,
    ConsumerTick,
    PeerChanged,
    SpikeStarted,
    SpikeFinished,
    SyncCallResolved,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 14;

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MessageEnqueued { .. } => EventKind::MessageEnqueued,
            Event::MessageDispatched { .. } => EventKind::MessageDispatched,
            Event::MessageCompleted { .. } => EventKind::MessageCompleted,
            Event::MessageRouted { .. } => EventKind::MessageRouted,
            Event::MessageAcknowledged { .. } => EventKind::MessageAcknowledged,
            Event::MessageExpired { .. } => EventKind::MessageExpired,
            Event::MessageRestored { .. } => EventKind::MessageRestored,
            Event::ProducerChanged { .. } => EventKind::ProducerChanged,
            Event::ConsumerChanged { .. } => EventKind::ConsumerChanged,
            Event::ConsumerTick { .. } => EventKind::ConsumerTick,
            Event::PeerChanged { .. } => EventKind::PeerChanged,
            Event::SpikeStarted { .. } => EventKind::SpikeStarted,
            Event::SpikeFinished { .. } => EventKind::SpikeFinished,
            Event::SyncCallResolved { .. } => EventKind::SyncCallResolved,
        }
    }

    /// Virtual time the event occurred at.
    pub fn at(&self) -> Millis {
        match self {
            Event::MessageEnqueued { at, .. }
            | Event::MessageDispatched { at, .. }
            | Event::MessageCompleted { at, .. }
            | Event::MessageRouted { at, .. }
            | Event::MessageAcknowledged { at, .. }
            | Event::MessageExpired { at, .. }
            | Event::MessageRestored { at, .. }
            | Event::ProducerChanged { at, .. }
            | Event::ConsumerChanged { at, .. }
            | Event::ConsumerTick { at, .. }
            | Event::PeerChanged { at, .. }
            | Event::SpikeStarted { at, .. }
            | Event::SpikeFinished { at, .. }
            | Event::SyncCallResolved { at, .. } => *at,
        }
    }
}

impl EventKind {
    /// Convert to usize index for array lookups.
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer: pre-allocated ring buffer
// ---------------------------------------------------------------------------

/// A pre-allocated ring buffer for events. Fixed capacity; when full, the
/// oldest events are dropped.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<Event>>,
    /// Write position (wraps around).
    head: usize,
    len: usize,
    /// Total events ever written (including dropped).
    total_written: u64,
}

impl EventBuffer {
    /// Create a new ring buffer with the given capacity.
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
        }
    }

    /// Push an event into the ring buffer. If full, the oldest event is dropped.
    pub fn push(&mut self, event: Event) {
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Iterate over events in order from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        let start = if self.len < self.capacity() {
            0
        } else {
            // head points at the next write position, which is the oldest entry
            self.head
        };
        (0..self.len).filter_map(move |i| self.events[(start + i) % self.capacity()].as_ref())
    }

    /// Clear all events from the buffer.
    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type Listener = Box<dyn FnMut(&Event)>;

/// Optional predicate that filters events for a listener.
pub type EventFilter = Box<dyn Fn(&Event) -> bool>;

/// Priority level for listeners. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

struct ListenerEntry {
    listener: Listener,
    priority: ListenerPriority,
    filter: Option<EventFilter>,
    insertion_order: u64,
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("insertion_order", &self.insertion_order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Holds the undelivered events and one history ring per event kind,
/// listener lists, and suppression flags.
pub struct EventBus {
    /// Emitted during the current reaction, not yet delivered.
    pending: [Vec<Event>; EVENT_KIND_COUNT],
    /// Recent history; the oldest entries are dropped when full.
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<ListenerEntry>; EVENT_KIND_COUNT],
    default_capacity: usize,
    /// Monotonically increasing counter for stable sort ordering.
    next_insertion_order: u64,
    /// Total events delivered to at least the buffer stage, per kind.
    emitted: [u64; EVENT_KIND_COUNT],
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("default_capacity", &self.default_capacity)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a new event bus with the given default buffer capacity per kind.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            pending: Default::default(),
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: Default::default(),
            default_capacity,
            next_insertion_order: 0,
            emitted: [0; EVENT_KIND_COUNT],
        }
    }

    /// Suppress an event kind. Suppressed events are never allocated or buffered.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.pending[kind.index()].clear();
        self.buffers[kind.index()] = None;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Emit an event. No-ops if the event kind is suppressed.
    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        self.emitted[idx] += 1;
        let capacity = self.default_capacity;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event.clone());
        self.pending[idx].push(event);
    }

    /// Register a listener for an event kind with Normal priority and no filter.
    pub fn on_passive(&mut self, kind: EventKind, listener: Listener) {
        self.on_passive_filtered(kind, ListenerPriority::Normal, None, listener);
    }

    /// Register a listener with explicit priority and optional filter.
    pub fn on_passive_filtered(
        &mut self,
        kind: EventKind,
        priority: ListenerPriority,
        filter: Option<EventFilter>,
        listener: Listener,
    ) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        let entries = &mut self.listeners[kind.index()];
        entries.push(ListenerEntry {
            listener,
            priority,
            filter,
            insertion_order: order,
        });
        entries.sort_by_key(|entry| (entry.priority, entry.insertion_order));
    }

    /// Deliver every pending event to listeners. History rings are kept.
    ///
    /// Kinds are visited in declaration order. Within a kind, events go
    /// oldest to newest, and each event reaches listeners in
    /// `(priority, registration)` order.
    pub fn deliver(&mut self) {
        for idx in 0..EVENT_KIND_COUNT {
            if self.pending[idx].is_empty() {
                continue;
            }
            let events = std::mem::take(&mut self.pending[idx]);

            for event in &events {
                for entry in &mut self.listeners[idx] {
                    if let Some(ref filter) = entry.filter
                        && !filter(event)
                    {
                        continue;
                    }
                    (entry.listener)(event);
                }
            }
        }
    }

    /// Recent history for a specific kind (read-only).
    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    /// Events currently buffered (not yet delivered) for a kind.
    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.pending[kind.index()].len()
    }

    /// Total events ever emitted for a kind, across deliveries.
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.emitted[kind.index()]
    }

    /// Drop pending events and history. Listeners and suppression settings
    /// are kept.
    pub fn clear_all(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
