//! Canonical game state and the manager that owns it.
//!
//! Every mutation goes through a narrow [`StateManager`] method that
//! re-establishes the state invariants and emits an [`Event`]:
//!
//! - `0 <= current <= max_capacity` for every resource
//! - `lifetime` never decreases
//! - `owned <= max_owned`, `resource_limit` in `[0, 1]`,
//!   `health` in `[0, max_health]`
//! - `purchased` is one-way
//!
//! State-changed subscribers receive an `Arc<GameState>` snapshot from
//! [`StateManager::notify_subscribers`], only when something changed since
//! the previous notification.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::condition::{hour_of_day, ConditionContext};
use crate::event::{Event, EventBus};
use crate::hash::StateHash;
use crate::id::{BuildingId, EraId, ResourceId, SubscriptionId, UpgradeId};
use crate::registry::{BuildingDef, Catalogue, ResourceAmount, ResourceDef};
use crate::rng::SimRng;

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceState {
    pub current: f64,
    /// All-time gains. Never decreases.
    pub lifetime: f64,
    pub max_capacity: Option<f64>,
    pub unlocked: bool,
}

impl ResourceState {
    pub fn from_def(def: &ResourceDef) -> Self {
        let mut state = Self {
            current: def.initial_amount,
            lifetime: 0.0,
            max_capacity: def.max_capacity,
            unlocked: def.unlocked,
        };
        state.normalize();
        state
    }

    fn clamp_amount(&self, value: f64) -> f64 {
        let value = if value.is_nan() { 0.0 } else { value.max(0.0) };
        match self.max_capacity {
            Some(cap) => value.min(cap.max(0.0)),
            None => value,
        }
    }

    fn normalize(&mut self) {
        self.current = self.clamp_amount(self.current);
        if self.lifetime.is_nan() || self.lifetime < 0.0 {
            self.lifetime = 0.0;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildingState {
    pub owned: u32,
    pub total_purchased: u32,
    pub unlocked: bool,
    /// Shared by every owned unit. Only meaningful with consumption.
    pub health: f64,
    pub max_health: f64,
    /// Batch throttle in `[0, 1]`.
    pub resource_limit: f64,
    /// Net per-second rates from the last aggregate recalculation.
    pub production_rate: BTreeMap<ResourceId, f64>,
    pub disabled: bool,
    /// Accrued batch timer.
    pub batch_progress_ms: f64,
}

impl Default for BuildingState {
    fn default() -> Self {
        Self {
            owned: 0,
            total_purchased: 0,
            unlocked: false,
            health: 0.0,
            max_health: 0.0,
            resource_limit: 1.0,
            production_rate: BTreeMap::new(),
            disabled: false,
            batch_progress_ms: 0.0,
        }
    }
}

impl BuildingState {
    pub fn from_def(def: &BuildingDef) -> Self {
        let max_health = def.consumption.as_ref().map_or(0.0, |c| c.max_health);
        Self {
            unlocked: def.unlocked,
            health: max_health,
            max_health,
            resource_limit: def.resource_limit.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    fn normalize(&mut self, max_owned: Option<u32>) {
        if let Some(max) = max_owned {
            self.owned = self.owned.min(max);
        }
        self.total_purchased = self.total_purchased.max(self.owned);
        self.resource_limit = if self.resource_limit.is_nan() {
            1.0
        } else {
            self.resource_limit.clamp(0.0, 1.0)
        };
        self.max_health = self.max_health.max(0.0);
        self.health = if self.health.is_nan() {
            self.max_health
        } else {
            self.health.clamp(0.0, self.max_health)
        };
        if self.batch_progress_ms.is_nan() || self.batch_progress_ms < 0.0 {
            self.batch_progress_ms = 0.0;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeState {
    pub purchased: bool,
    pub purchase_count: u32,
    pub tier: u32,
    pub unlocked: bool,
}

/// Everything that is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    pub resources: BTreeMap<ResourceId, ResourceState>,
    pub buildings: BTreeMap<BuildingId, BuildingState>,
    pub upgrades: BTreeMap<UpgradeId, UpgradeState>,
    pub era: Option<EraId>,
    pub prestige_level: u32,
    /// Wall-clock ms of the last processed tick.
    pub last_played_at: u64,
    /// Simulated time, in ms.
    pub total_play_time_ms: f64,
    pub rng: SimRng,
}

impl GameState {
    /// A fresh game for `catalogue`.
    pub fn fresh(catalogue: &Catalogue, rng_seed: u64) -> Self {
        Self {
            resources: catalogue
                .resources()
                .iter()
                .map(|d| (d.id.clone(), ResourceState::from_def(d)))
                .collect(),
            buildings: catalogue
                .buildings()
                .iter()
                .map(|d| (d.id.clone(), BuildingState::from_def(d)))
                .collect(),
            upgrades: catalogue
                .upgrades()
                .iter()
                .map(|d| {
                    let state = UpgradeState {
                        unlocked: d.unlocked,
                        ..Default::default()
                    };
                    (d.id.clone(), state)
                })
                .collect(),
            era: catalogue.first_era().cloned(),
            prestige_level: 0,
            last_played_at: 0,
            total_play_time_ms: 0.0,
            rng: SimRng::new(rng_seed),
        }
    }

    /// Current amount of a resource (0 if unknown).
    pub fn amount(&self, resource: &str) -> f64 {
        self.resources.get(resource).map_or(0.0, |r| r.current)
    }

    /// Owned count of a building (0 if unknown).
    pub fn owned(&self, building: &str) -> u32 {
        self.buildings.get(building).map_or(0, |b| b.owned)
    }

    pub fn is_purchased(&self, upgrade: &str) -> bool {
        self.upgrades.get(upgrade).is_some_and(|u| u.purchased)
    }

    /// Snapshot of what multiplier conditions read.
    pub fn condition_context(&self, era_order: Vec<EraId>, now_ms: u64) -> ConditionContext {
        ConditionContext {
            resources: self
                .resources
                .iter()
                .map(|(id, r)| (id.clone(), r.current))
                .collect(),
            buildings: self
                .buildings
                .iter()
                .map(|(id, b)| (id.clone(), b.owned))
                .collect(),
            upgrades: self
                .upgrades
                .iter()
                .filter(|(_, u)| u.purchased)
                .map(|(id, _)| id.clone())
                .collect(),
            era: self.era.clone(),
            era_order,
            prestige_level: self.prestige_level,
            hour_of_day: hour_of_day(now_ms),
        }
    }

    /// Deterministic fingerprint. Cached display fields
    /// (`production_rate`) are excluded.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        for (id, r) in &self.resources {
            h.write_str(id.as_str());
            h.write_f64(r.current);
            h.write_f64(r.lifetime);
            h.write_f64(r.max_capacity.unwrap_or(-1.0));
            h.write_bool(r.unlocked);
        }
        for (id, b) in &self.buildings {
            h.write_str(id.as_str());
            h.write_u32(b.owned);
            h.write_u32(b.total_purchased);
            h.write_bool(b.unlocked);
            h.write_f64(b.health);
            h.write_f64(b.resource_limit);
            h.write_bool(b.disabled);
            h.write_f64(b.batch_progress_ms);
        }
        for (id, u) in &self.upgrades {
            h.write_str(id.as_str());
            h.write_bool(u.purchased);
            h.write_u32(u.purchase_count);
            h.write_u32(u.tier);
        }
        h.write_str(self.era.as_ref().map_or("", |e| e.as_str()));
        h.write_u32(self.prestige_level);
        h.write_u64(self.rng.state());
        h.finish()
    }
}

// ---------------------------------------------------------------------------
// StateManager
// ---------------------------------------------------------------------------

/// Listener for state-changed notifications.
pub type StateListener = Box<dyn FnMut(&Arc<GameState>)>;

pub struct StateManager {
    catalogue: Arc<Catalogue>,
    state: GameState,
    rng_seed: u64,
    events: EventBus,
    subscribers: SlotMap<SubscriptionId, StateListener>,
    dirty: bool,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("state", &self.state)
            .field("dirty", &self.dirty)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl StateManager {
    pub fn new(catalogue: Arc<Catalogue>, rng_seed: u64) -> Self {
        let state = GameState::fresh(&catalogue, rng_seed);
        Self {
            catalogue,
            state,
            rng_seed,
            events: EventBus::default(),
            subscribers: SlotMap::with_key(),
            dirty: true,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        &self.catalogue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Emit an event on the shared bus.
    pub fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }

    pub fn rng_mut(&mut self) -> &mut SimRng {
        &mut self.state.rng
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn touch(&mut self, event: Event) {
        self.dirty = true;
        self.events.emit(event);
    }

    // -- Resources ----------------------------------------------------------

    /// Add `delta` (may be negative) to a resource, clamped to
    /// `[0, max_capacity]`. Returns the delta actually applied; positive
    /// applied amounts count toward `lifetime`.
    pub fn update_resource(&mut self, id: &str, delta: f64) -> f64 {
        let Some(r) = self.state.resources.get_mut(id) else {
            tracing::debug!(resource = id, "update for unknown resource ignored");
            return 0.0;
        };
        if !delta.is_finite() {
            tracing::warn!(resource = id, delta, "non-finite resource delta ignored");
            return 0.0;
        }
        let before = r.current;
        r.current = r.clamp_amount(before + delta);
        let applied = r.current - before;
        if applied > 0.0 {
            r.lifetime += applied;
        }
        if applied == 0.0 {
            return 0.0;
        }
        let event = Event::ResourceChanged {
            resource: ResourceId::from(id),
            current: r.current,
            delta: applied,
        };
        self.touch(event);
        applied
    }

    /// Overwrite a resource amount (clamped). Does not count toward
    /// `lifetime`.
    pub fn set_resource(&mut self, id: &str, value: f64) {
        let Some(r) = self.state.resources.get_mut(id) else {
            return;
        };
        let before = r.current;
        r.current = r.clamp_amount(value);
        if r.current != before {
            let event = Event::ResourceChanged {
                resource: ResourceId::from(id),
                current: r.current,
                delta: r.current - before,
            };
            self.touch(event);
        }
    }

    pub fn can_afford(&self, cost: &[ResourceAmount]) -> bool {
        sum_amounts(cost)
            .iter()
            .all(|(id, &amount)| self.state.amount(id.as_str()) >= amount)
    }

    /// Deduct every amount, or nothing at all.
    pub fn spend_resources(&mut self, cost: &[ResourceAmount]) -> bool {
        if !self.can_afford(cost) {
            return false;
        }
        for (id, amount) in sum_amounts(cost) {
            if amount > 0.0 {
                self.update_resource(id.as_str(), -amount);
            }
        }
        true
    }

    pub fn set_capacity(&mut self, id: &str, max_capacity: Option<f64>) {
        let Some(r) = self.state.resources.get_mut(id) else {
            return;
        };
        if r.max_capacity == max_capacity {
            return;
        }
        r.max_capacity = max_capacity;
        let before = r.current;
        r.normalize();
        let current = r.current;
        self.touch(Event::CapacityChanged {
            resource: ResourceId::from(id),
            max_capacity,
        });
        if current != before {
            self.touch(Event::ResourceChanged {
                resource: ResourceId::from(id),
                current,
                delta: current - before,
            });
        }
    }

    /// Returns `true` if the resource was newly unlocked.
    pub fn unlock_resource(&mut self, id: &str) -> bool {
        match self.state.resources.get_mut(id) {
            Some(r) if !r.unlocked => {
                r.unlocked = true;
                self.touch(Event::ResourceUnlocked {
                    resource: ResourceId::from(id),
                });
                true
            }
            _ => false,
        }
    }

    // -- Buildings ----------------------------------------------------------

    /// Apply `f` to a building's state, then re-enforce its invariants.
    /// Returns `false` for unknown buildings.
    pub fn update_building(&mut self, id: &str, f: impl FnOnce(&mut BuildingState)) -> bool {
        let max_owned = self.catalogue.building(id).and_then(|d| d.max_owned);
        let Some(b) = self.state.buildings.get_mut(id) else {
            return false;
        };
        f(b);
        b.normalize(max_owned);
        self.dirty = true;
        true
    }

    /// Add purchased units, clamped to `max_owned`. Returns the number
    /// actually added.
    pub fn add_buildings(&mut self, id: &str, count: u32) -> u32 {
        let Some(def) = self.catalogue.building(id) else {
            return 0;
        };
        let max_owned = def.max_owned;
        let max_health = def.consumption.as_ref().map_or(0.0, |c| c.max_health);
        let Some(b) = self.state.buildings.get_mut(id) else {
            return 0;
        };
        let room = max_owned.unwrap_or(u32::MAX).saturating_sub(b.owned);
        let added = count.min(room);
        if added == 0 {
            return 0;
        }
        if b.owned == 0 {
            b.max_health = max_health;
            b.health = max_health;
        }
        b.owned = b.owned.saturating_add(added);
        b.total_purchased = b.total_purchased.saturating_add(added);
        b.normalize(max_owned);
        let owned = b.owned;
        self.touch(Event::BuildingPurchased {
            building: BuildingId::from(id),
            count: added,
            owned,
        });
        added
    }

    /// Remove units (starvation or explicit removal). Returns the number
    /// actually removed. When none remain the building returns to full
    /// health and is re-enabled.
    pub fn remove_buildings(&mut self, id: &str, count: u32) -> u32 {
        let Some(b) = self.state.buildings.get_mut(id) else {
            return 0;
        };
        let removed = count.min(b.owned);
        if removed == 0 {
            return 0;
        }
        b.owned -= removed;
        if b.owned == 0 {
            b.health = b.max_health;
            b.disabled = false;
            b.batch_progress_ms = 0.0;
            b.production_rate.clear();
        }
        let owned = b.owned;
        self.touch(Event::BuildingRemoved {
            building: BuildingId::from(id),
            count: removed,
            owned,
        });
        removed
    }

    pub fn unlock_building(&mut self, id: &str) -> bool {
        match self.state.buildings.get_mut(id) {
            Some(b) if !b.unlocked => {
                b.unlocked = true;
                self.touch(Event::BuildingUnlocked {
                    building: BuildingId::from(id),
                });
                true
            }
            _ => false,
        }
    }

    pub fn set_disabled(&mut self, id: &str, disabled: bool) {
        let Some(b) = self.state.buildings.get_mut(id) else {
            return;
        };
        if b.disabled == disabled {
            return;
        }
        b.disabled = disabled;
        let building = BuildingId::from(id);
        self.touch(if disabled {
            Event::BuildingDisabled { building }
        } else {
            Event::BuildingEnabled { building }
        });
    }

    pub fn set_resource_limit(&mut self, id: &str, limit: f64) -> bool {
        self.update_building(id, |b| b.resource_limit = limit)
    }

    /// Store cached display rates. Does not emit an event.
    pub fn set_production_rates(&mut self, id: &str, rates: BTreeMap<ResourceId, f64>) {
        if let Some(b) = self.state.buildings.get_mut(id)
            && b.production_rate != rates
        {
            b.production_rate = rates;
            self.dirty = true;
        }
    }

    // -- Upgrades & progression ---------------------------------------------

    /// Record a purchase. Returns the new purchase count, or `None` for an
    /// unknown upgrade.
    pub fn purchase_upgrade(&mut self, id: &str) -> Option<u32> {
        let u = self.state.upgrades.get_mut(id)?;
        u.purchased = true;
        u.purchase_count = u.purchase_count.saturating_add(1);
        u.tier = u.purchase_count;
        let purchase_count = u.purchase_count;
        self.touch(Event::UpgradePurchased {
            upgrade: UpgradeId::from(id),
            purchase_count,
        });
        Some(purchase_count)
    }

    pub fn unlock_upgrade(&mut self, id: &str) -> bool {
        match self.state.upgrades.get_mut(id) {
            Some(u) if !u.unlocked => {
                u.unlocked = true;
                self.touch(Event::UpgradeUnlocked {
                    upgrade: UpgradeId::from(id),
                });
                true
            }
            _ => false,
        }
    }

    pub fn set_era(&mut self, era: EraId) {
        if self.state.era.as_ref() == Some(&era) {
            return;
        }
        self.state.era = Some(era.clone());
        self.touch(Event::EraChanged { era });
    }

    pub fn set_prestige_level(&mut self, level: u32) {
        if self.state.prestige_level == level {
            return;
        }
        self.state.prestige_level = level;
        self.touch(Event::PrestigeChanged { level });
    }

    /// Advance the clocks. Does not emit an event.
    pub fn record_time(&mut self, now_ms: u64, simulated_ms: f64) {
        self.state.last_played_at = now_ms;
        if simulated_ms.is_finite() && simulated_ms > 0.0 {
            self.state.total_play_time_ms += simulated_ms;
        }
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Replace the state with a loaded one, repairing it against the
    /// current catalogue.
    pub fn load_state(&mut self, mut state: GameState) {
        self.ensure_state_integrity(&mut state);
        self.state = state;
        self.touch(Event::StateLoaded);
    }

    /// Start over with a fresh game.
    pub fn reset(&mut self) {
        self.state = GameState::fresh(&self.catalogue, self.rng_seed);
        self.touch(Event::StateReset);
    }

    /// Synthesize entries the catalogue declares but `state` lacks, drop
    /// entries the catalogue no longer declares, and re-enforce every
    /// invariant.
    pub fn ensure_state_integrity(&self, state: &mut GameState) {
        let cat = &self.catalogue;

        let before = state.resources.len();
        state.resources.retain(|id, _| cat.resource(id.as_str()).is_some());
        let dropped = before - state.resources.len();
        for def in cat.resources() {
            state
                .resources
                .entry(def.id.clone())
                .or_insert_with(|| ResourceState::from_def(def))
                .normalize();
        }

        let before = state.buildings.len();
        state.buildings.retain(|id, _| cat.building(id.as_str()).is_some());
        let dropped = dropped + before - state.buildings.len();
        for def in cat.buildings() {
            let b = state
                .buildings
                .entry(def.id.clone())
                .or_insert_with(|| BuildingState::from_def(def));
            b.max_health = def.consumption.as_ref().map_or(0.0, |c| c.max_health);
            b.normalize(def.max_owned);
        }

        let before = state.upgrades.len();
        state.upgrades.retain(|id, _| cat.upgrade(id.as_str()).is_some());
        let dropped = dropped + before - state.upgrades.len();
        for def in cat.upgrades() {
            state
                .upgrades
                .entry(def.id.clone())
                .or_insert_with(|| UpgradeState {
                    unlocked: def.unlocked,
                    ..Default::default()
                });
        }

        if state.era.as_ref().is_none_or(|e| cat.era(e.as_str()).is_none()) {
            state.era = cat.first_era().cloned();
        }

        if dropped > 0 {
            tracing::debug!(dropped, "dropped state entries unknown to the catalogue");
        }
    }

    // -- Subscriptions ------------------------------------------------------

    pub fn subscribe(&mut self, listener: StateListener) -> SubscriptionId {
        self.subscribers.insert(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Hand every subscriber a snapshot if anything changed since the last
    /// call. Returns `true` if a notification went out.
    pub fn notify_subscribers(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        if self.subscribers.is_empty() {
            return false;
        }
        let snapshot = Arc::new(self.state.clone());
        for listener in self.subscribers.values_mut() {
            listener(&snapshot);
        }
        true
    }
}

/// Fold duplicate resources in a cost list.
pub fn sum_amounts(amounts: &[ResourceAmount]) -> BTreeMap<ResourceId, f64> {
    let mut total = BTreeMap::new();
    for a in amounts {
        *total.entry(a.resource.clone()).or_insert(0.0) += a.amount;
    }
    total
}

// ===========================================================================
// Tests
// ===========================================================================
