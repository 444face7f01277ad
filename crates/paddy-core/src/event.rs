//! Typed, synchronous event bus.
//!
//! [`EventBus::emit`] delivers to every matching subscriber before it
//! returns, so within one logical action the order "resource changed →
//! unlock check → production recalculated" is fixed by the caller. The bus
//! also keeps a bounded history ring buffer for diagnostics and tests.
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`EventBus::suppress`]. Suppressed
//! events are neither delivered nor recorded.

use slotmap::SlotMap;

use crate::id::{BuildingId, EraId, ResourceId, StackId, SubscriptionId, UpgradeId};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // -- Resources --
    ResourceChanged {
        resource: ResourceId,
        current: f64,
        delta: f64,
    },
    ResourceUnlocked {
        resource: ResourceId,
    },
    CapacityChanged {
        resource: ResourceId,
        max_capacity: Option<f64>,
    },

    // -- Buildings --
    BuildingPurchased {
        building: BuildingId,
        count: u32,
        owned: u32,
    },
    BuildingRemoved {
        building: BuildingId,
        count: u32,
        owned: u32,
    },
    BuildingUnlocked {
        building: BuildingId,
    },
    BuildingDisabled {
        building: BuildingId,
    },
    BuildingEnabled {
        building: BuildingId,
    },
    /// A consuming building could not be fully supplied this tick.
    ResourceShortage {
        building: BuildingId,
        missing: Vec<(ResourceId, f64)>,
        damage: f64,
        health: f64,
    },

    // -- Upgrades & progression --
    UpgradePurchased {
        upgrade: UpgradeId,
        purchase_count: u32,
    },
    UpgradeUnlocked {
        upgrade: UpgradeId,
    },
    EraChanged {
        era: EraId,
    },
    PrestigeChanged {
        level: u32,
    },

    // -- Engine --
    MultiplierChanged {
        stack: StackId,
        value: f64,
    },
    ProductionRecalculated,
    StateLoaded,
    StateReset,
    /// The game loop paused itself after repeated tick failures.
    LoopPaused {
        consecutive_errors: u32,
    },
}

/// Discriminant for [`Event`] variants, used for suppression and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventKind {
    ResourceChanged = 0,
    ResourceUnlocked = 1,
    CapacityChanged = 2,
    BuildingPurchased = 3,
    BuildingRemoved = 4,
    BuildingUnlocked = 5,
    BuildingDisabled = 6,
    BuildingEnabled = 7,
    ResourceShortage = 8,
    UpgradePurchased = 9,
    UpgradeUnlocked = 10,
    EraChanged = 11,
    PrestigeChanged = 12,
    MultiplierChanged = 13,
    ProductionRecalculated = 14,
    StateLoaded = 15,
    StateReset = 16,
    LoopPaused = 17,
}

/// Total number of event kinds.
pub const EVENT_KIND_COUNT: usize = 18;

impl EventKind {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ResourceChanged { .. } => EventKind::ResourceChanged,
            Event::ResourceUnlocked { .. } => EventKind::ResourceUnlocked,
            Event::CapacityChanged { .. } => EventKind::CapacityChanged,
            Event::BuildingPurchased { .. } => EventKind::BuildingPurchased,
            Event::BuildingRemoved { .. } => EventKind::BuildingRemoved,
            Event::BuildingUnlocked { .. } => EventKind::BuildingUnlocked,
            Event::BuildingDisabled { .. } => EventKind::BuildingDisabled,
            Event::BuildingEnabled { .. } => EventKind::BuildingEnabled,
            Event::ResourceShortage { .. } => EventKind::ResourceShortage,
            Event::UpgradePurchased { .. } => EventKind::UpgradePurchased,
            Event::UpgradeUnlocked { .. } => EventKind::UpgradeUnlocked,
            Event::EraChanged { .. } => EventKind::EraChanged,
            Event::PrestigeChanged { .. } => EventKind::PrestigeChanged,
            Event::MultiplierChanged { .. } => EventKind::MultiplierChanged,
            Event::ProductionRecalculated => EventKind::ProductionRecalculated,
            Event::StateLoaded => EventKind::StateLoaded,
            Event::StateReset => EventKind::StateReset,
            Event::LoopPaused { .. } => EventKind::LoopPaused,
        }
    }
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

/// Fixed-capacity ring buffer of recent events. Overwrites the oldest entry
/// when full.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Vec<Option<Event>>,
    head: usize,
    len: usize,
    total_written: u64,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: vec![None; capacity],
            head: 0,
            len: 0,
            total_written: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        let cap = self.capacity();
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % cap;
        if self.len < cap {
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

    /// Total events written since creation (including overwritten ones).
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity() as u64)
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        let cap = self.capacity();
        let start = if self.len < cap { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.events[(start + i) % cap].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// A listener receives events read-only.
pub type Listener = Box<dyn FnMut(&Event)>;

/// Priority level for event subscribers. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriberPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

struct SubscriberEntry {
    listener: Listener,
    /// `None` subscribes to every kind.
    kind: Option<EventKind>,
    priority: SubscriberPriority,
    insertion_order: u64,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub struct EventBus {
    history: EventBuffer,
    suppressed: [bool; EVENT_KIND_COUNT],
    emitted: [u64; EVENT_KIND_COUNT],
    subscribers: SlotMap<SubscriptionId, SubscriberEntry>,
    /// Delivery order, rebuilt when subscriptions change.
    order: Vec<SubscriptionId>,
    next_insertion_order: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("history_len", &self.history.len())
            .field("suppressed", &self.suppressed)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus whose history keeps the last `history_capacity` events.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: EventBuffer::new(history_capacity),
            suppressed: [false; EVENT_KIND_COUNT],
            emitted: [0; EVENT_KIND_COUNT],
            subscribers: SlotMap::with_key(),
            order: Vec::new(),
            next_insertion_order: 0,
        }
    }

    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
    }

    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Subscribe to one event kind at normal priority.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.subscribe(Some(kind), SubscriberPriority::Normal, listener)
    }

    /// Subscribe to every event kind at normal priority.
    pub fn on_any(&mut self, listener: Listener) -> SubscriptionId {
        self.subscribe(None, SubscriberPriority::Normal, listener)
    }

    pub fn subscribe(
        &mut self,
        kind: Option<EventKind>,
        priority: SubscriberPriority,
        listener: Listener,
    ) -> SubscriptionId {
        let insertion_order = self.next_insertion_order;
        self.next_insertion_order += 1;
        let id = self.subscribers.insert(SubscriberEntry {
            listener,
            kind,
            priority,
            insertion_order,
        });
        self.rebuild_order();
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            self.rebuild_order();
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn rebuild_order(&mut self) {
        let mut order: Vec<_> = self
            .subscribers
            .iter()
            .map(|(id, e)| (e.priority, e.insertion_order, id))
            .collect();
        order.sort_by_key(|&(priority, insertion, _)| (priority, insertion));
        self.order = order.into_iter().map(|(_, _, id)| id).collect();
    }

    /// Record `event` and deliver it to every matching subscriber before
    /// returning. No-op for suppressed kinds.
    pub fn emit(&mut self, event: Event) {
        let kind = event.kind();
        if self.suppressed[kind.index()] {
            return;
        }
        self.emitted[kind.index()] += 1;
        for id in &self.order {
            if let Some(entry) = self.subscribers.get_mut(*id)
                && entry.kind.is_none_or(|k| k == kind)
            {
                (entry.listener)(&event);
            }
        }
        self.history.push(event);
    }

    /// Recent events, oldest first.
    pub fn history(&self) -> &EventBuffer {
        &self.history
    }

    /// Total events of `kind` emitted (not counting suppressed ones).
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.emitted[kind.index()]
    }

    /// Clear the history. Subscribers and suppression settings are kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
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
