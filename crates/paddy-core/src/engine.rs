//! The simulation engine: owns every component and runs the tick pipeline.
//!
//! # Tick pipeline
//!
//! Each [`Engine::process_tick`] runs, in order:
//! 1. **Production** -- continuous and batch output for `dt` seconds
//! 2. **Consumption** -- per-tick upkeep, starvation damage, removals
//! 3. **Expiry** -- temporary multiplier sources whose time has passed
//! 4. **Context refresh** -- conditional multipliers re-evaluated
//! 5. **Unlocks** -- eras, resources, buildings, upgrades
//! 6. **Notify** -- state-changed subscribers, if anything changed
//!
//! Player actions (purchases, loads, resets) run between ticks and keep
//! every derived value (synergies, capacities, rates) consistent before
//! returning.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::building::{refresh_capacities, BuildingInfo, BuildingSystem, UnlockReport};
use crate::config::EngineConfig;
use crate::consumption;
use crate::curve::{CurveError, CurveEvaluator};
use crate::event::{Event, EventBus};
use crate::game_loop::{TickError, TickTarget};
use crate::id::{ResourceId, SubscriptionId};
use crate::multiplier::{MultiplierSource, MultiplierSystem};
use crate::offline::{offline_window, OfflineWindow};
use crate::production::{ChanceMode, ProductionProcessor};
use crate::registry::{Catalogue, ResourceAmount};
use crate::sim::{SimContext, SimView};
use crate::state::{GameState, StateListener, StateManager};
use crate::synergy::SynergyProcessor;
use crate::upgrade::{self, UpgradeInfo};

/// Result of crediting an absence.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineReport {
    pub window: OfflineWindow,
    /// Net change per resource. Converters can make entries negative.
    pub resources_gained: BTreeMap<ResourceId, f64>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    state: StateManager,
    multipliers: MultiplierSystem,
    curves: CurveEvaluator,
    production: ProductionProcessor,
    buildings: BuildingSystem,
    tick_count: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tick_count", &self.tick_count)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(catalogue: Arc<Catalogue>, config: EngineConfig) -> Self {
        let mut multipliers = MultiplierSystem::new();
        for stack in catalogue.stacks() {
            multipliers.register_stack(stack.clone());
        }
        let curves = CurveEvaluator::with_presets(catalogue.curves().clone(), config.eval_mode);
        let buildings = BuildingSystem::new(SynergyProcessor::analyze(&catalogue));
        let mut engine = Self {
            state: StateManager::new(catalogue, config.rng_seed),
            production: ProductionProcessor::new(config.accumulator_threshold),
            config,
            multipliers,
            curves,
            buildings,
            tick_count: 0,
        };
        engine.rebuild_derived(0);
        engine
    }

    fn split(&mut self) -> (SimContext<'_>, &mut BuildingSystem) {
        (
            SimContext::new(&mut self.state, &mut self.multipliers, &self.curves),
            &mut self.buildings,
        )
    }

    fn view(&self) -> SimView<'_> {
        SimView::new(&self.state, &self.multipliers, &self.curves)
    }

    /// Re-derive everything that is not persisted: synergy and upgrade
    /// multipliers, capacities, unlocks, cached rates.
    fn rebuild_derived(&mut self, now_ms: u64) {
        let era_order = self.state.catalogue().era_order();
        let (mut ctx, buildings) = self.split();
        buildings.recompute_synergies(&mut ctx);
        upgrade::reapply_all(&mut ctx);
        refresh_capacities(&mut ctx);
        let context = ctx.state.state().condition_context(era_order, now_ms);
        ctx.multipliers.set_condition_context(context);
        buildings.check_unlocks(&mut ctx);
        buildings.recalculate_production(&mut ctx);
        self.forward_multiplier_changes();
    }

    /// Emit one `MultiplierChanged` per stack whose value moved. Returns
    /// whether any did.
    fn forward_multiplier_changes(&mut self) -> bool {
        let changed = self.multipliers.take_changed();
        for stack in &changed {
            let value = self.multipliers.get_value(stack.as_str());
            self.state.emit(Event::MultiplierChanged {
                stack: stack.clone(),
                value,
            });
        }
        !changed.is_empty()
    }

    /// Bookkeeping after a player action.
    fn settle(&mut self) {
        if self.forward_multiplier_changes() {
            let (mut ctx, buildings) = self.split();
            buildings.recalculate_production(&mut ctx);
        }
        self.state.notify_subscribers();
    }

    fn disabled_flags(&self) -> Vec<bool> {
        self.state.state().buildings.values().map(|b| b.disabled).collect()
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds at wall-clock `now_ms`.
    pub fn process_tick(&mut self, dt: f64, now_ms: u64) -> Result<(), TickError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(TickError::InvalidDelta(dt));
        }

        // 1. Production
        self.production.process_tick(
            &mut self.state,
            &self.multipliers,
            &self.curves,
            dt,
            ChanceMode::Roll,
        )?;

        // 2. Consumption
        let disabled_before = self.disabled_flags();
        let removed = consumption::process_tick(&mut self.state);
        let mut rates_stale = disabled_before != self.disabled_flags();
        {
            let (mut ctx, buildings) = self.split();
            for id in &removed {
                let owned = ctx.state.state().owned(id.as_str());
                buildings.synergies().on_building_changed(id.as_str(), owned, ctx.multipliers);
            }
            if !removed.is_empty() {
                refresh_capacities(&mut ctx);
                rates_stale = true;
            }
        }

        // 3. Expiry
        let expired = self.multipliers.process_expired_multipliers(now_ms);
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "temporary multipliers expired");
        }

        // 4. Context refresh
        let era_order = self.state.catalogue().era_order();
        let context = self.state.state().condition_context(era_order, now_ms);
        self.multipliers.set_condition_context(context);
        rates_stale |= self.forward_multiplier_changes();
        if rates_stale {
            let (mut ctx, buildings) = self.split();
            buildings.recalculate_production(&mut ctx);
        }

        // 5. Unlocks
        {
            let (mut ctx, buildings) = self.split();
            buildings.check_unlocks(&mut ctx);
        }

        // 6. Notify
        self.state.record_time(now_ms, dt * 1000.0);
        self.tick_count += 1;
        self.state.notify_subscribers();
        tracing::trace!(tick = self.tick_count, dt, "tick processed");
        Ok(())
    }

    /// Ticks processed since construction.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Push every buffered production remainder into the ledger.
    pub fn flush_all(&mut self) {
        self.production.flush_all(&mut self.state);
    }

    /// Buffered continuous output not yet in the ledger.
    pub fn pending_production(&self, building: &str, resource: &str) -> f64 {
        self.production.pending(building, resource)
    }

    // -----------------------------------------------------------------------
    // Player actions
    // -----------------------------------------------------------------------

    pub fn purchase_building(&mut self, id: &str, count: u32) -> bool {
        let (mut ctx, buildings) = self.split();
        let bought = buildings.purchase_building(&mut ctx, id, count);
        if bought {
            self.settle();
        }
        bought
    }

    pub fn purchase_upgrade(&mut self, id: &str) -> bool {
        let (mut ctx, buildings) = self.split();
        if !upgrade::purchase_upgrade(&mut ctx, id) {
            return false;
        }
        refresh_capacities(&mut ctx);
        buildings.check_unlocks(&mut ctx);
        buildings.recalculate_production(&mut ctx);
        self.settle();
        true
    }

    /// Price of `count` more units of a building.
    pub fn building_cost(&self, id: &str, count: u32) -> Result<Vec<ResourceAmount>, CurveError> {
        self.buildings.calculate_cost(&self.view(), id, count)
    }

    /// Price of an upgrade's next purchase.
    pub fn upgrade_cost(&self, id: &str) -> Result<Vec<ResourceAmount>, CurveError> {
        upgrade::upgrade_cost(&self.view(), id)
    }

    pub fn get_available_buildings(&self) -> Vec<BuildingInfo> {
        self.buildings.get_available_buildings(&self.view())
    }

    pub fn get_available_upgrades(&self) -> Vec<UpgradeInfo> {
        upgrade::get_available_upgrades(&self.view())
    }

    /// Throttle a batch building. Clamped to `[0, 1]`.
    pub fn set_resource_limit(&mut self, id: &str, limit: f64) -> bool {
        if !self.state.set_resource_limit(id, limit) {
            return false;
        }
        let (mut ctx, buildings) = self.split();
        buildings.recalculate_production(&mut ctx);
        self.settle();
        true
    }

    /// Credit (or debit) a resource outside production: rewards, refunds,
    /// debug grants. Returns the delta actually applied.
    pub fn add_resource(&mut self, id: &str, amount: f64) -> f64 {
        let applied = self.state.update_resource(id, amount);
        let (mut ctx, buildings) = self.split();
        buildings.check_unlocks(&mut ctx);
        self.settle();
        applied
    }

    /// Add an externally managed multiplier (events, prestige, boosts).
    pub fn add_multiplier(&mut self, source: MultiplierSource) -> bool {
        let added = self.multipliers.add_multiplier(source);
        self.settle();
        added
    }

    pub fn remove_multiplier(&mut self, stack: &str, source: &str) -> bool {
        let removed = self.multipliers.remove_multiplier(stack, source);
        self.settle();
        removed
    }

    pub fn set_prestige_level(&mut self, level: u32) {
        self.state.set_prestige_level(level);
        self.settle();
    }

    /// Run the unlock pass outside a tick.
    pub fn check_unlocks(&mut self) -> UnlockReport {
        let (mut ctx, buildings) = self.split();
        let report = buildings.check_unlocks(&mut ctx);
        self.settle();
        report
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Replace the state with a loaded one. Buffered production is
    /// dropped and every derived value is rebuilt from the new state.
    pub fn load_state(&mut self, state: GameState) {
        let now_ms = state.last_played_at;
        self.production.clear();
        self.multipliers.clear_sources();
        self.state.load_state(state);
        self.rebuild_derived(now_ms);
        self.state.notify_subscribers();
        tracing::debug!("state loaded");
    }

    /// Start a fresh game.
    pub fn reset(&mut self) {
        self.production.clear();
        self.multipliers.clear_sources();
        self.state.reset();
        self.rebuild_derived(0);
        self.state.notify_subscribers();
        tracing::debug!("state reset");
    }

    /// Credit the time since the last processed tick as a single tick with
    /// expected-value chance outputs. `Ok(None)` when there is nothing to
    /// credit.
    pub fn apply_offline(&mut self, now_ms: u64) -> Result<Option<OfflineReport>, TickError> {
        let Some(window) = offline_window(self.state.state().last_played_at, now_ms, &self.config.offline)
        else {
            return Ok(None);
        };
        let dt = window.effective_seconds();
        let before: BTreeMap<ResourceId, f64> = self
            .state
            .state()
            .resources
            .iter()
            .map(|(id, r)| (id.clone(), r.current))
            .collect();

        self.production.process_tick(
            &mut self.state,
            &self.multipliers,
            &self.curves,
            dt,
            ChanceMode::Expected,
        )?;
        self.production.flush_all(&mut self.state);
        self.state.record_time(now_ms, dt * 1000.0);

        let resources_gained = self
            .state
            .state()
            .resources
            .iter()
            .filter_map(|(id, r)| {
                let delta = r.current - before.get(id).copied().unwrap_or(0.0);
                (delta != 0.0).then(|| (id.clone(), delta))
            })
            .collect();

        {
            let (mut ctx, buildings) = self.split();
            buildings.check_unlocks(&mut ctx);
        }
        self.settle();
        tracing::debug!(offline_ms = window.offline_time_ms, dt, "offline progress applied");
        Ok(Some(OfflineReport {
            window,
            resources_gained,
        }))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> &GameState {
        self.state.state()
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.state
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        self.state.catalogue()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn multipliers(&self) -> &MultiplierSystem {
        &self.multipliers
    }

    pub fn curves(&self) -> &CurveEvaluator {
        &self.curves
    }

    /// Net per-second rate per resource from the last recalculation.
    pub fn net_rates(&self) -> &BTreeMap<ResourceId, f64> {
        self.buildings.net_rates()
    }

    pub fn events(&self) -> &EventBus {
        self.state.events()
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        self.state.events_mut()
    }

    pub fn subscribe(&mut self, listener: StateListener) -> SubscriptionId {
        self.state.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.state.unsubscribe(id)
    }

    pub fn state_hash(&self) -> u64 {
        self.state.state().state_hash()
    }
}

impl TickTarget for Engine {
    fn tick(&mut self, dt_seconds: f64, now_ms: u64) -> Result<(), TickError> {
        self.process_tick(dt_seconds, now_ms)
    }

    /// The engine has no storage of its own; it makes sure buffered
    /// production is in the ledger so whoever persists it sees everything.
    fn emergency_save(&mut self) {
        self.flush_all();
    }

    fn loop_paused(&mut self, consecutive_errors: u32) {
        self.state.emit(Event::LoopPaused { consecutive_errors });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::game_loop::GameLoop;
    use crate::id::stacks;
    use crate::multiplier::SourceType;
    use crate::test_utils::{approx, village_engine};
    use std::cell::RefCell;
    use std::rc::Rc;

    const T0: u64 = 1_700_000_000_000;

    // -----------------------------------------------------------------------
    // Test 1: One paddy field, ten one-second ticks
    // -----------------------------------------------------------------------
    #[test]
    fn paddy_field_scenario() {
        let mut engine = village_engine();
        engine.add_resource("rice", 50.0);
        assert!(engine.purchase_building("paddy_field", 1));
        assert_eq!(engine.state().amount("rice"), 0.0);
        for i in 1..=10 {
            engine.process_tick(1.0, T0 + i * 1000).unwrap();
        }
        engine.flush_all();
        assert!(approx(engine.state().amount("rice"), 5.0));
        assert_eq!(engine.building_cost("paddy_field", 1).unwrap()[0].amount, 58.0);
        assert_eq!(engine.tick_count(), 10);
        assert_eq!(engine.state().last_played_at, T0 + 10_000);
        assert_eq!(engine.state().total_play_time_ms, 10_000.0);
    }

    #[test]
    fn invalid_deltas_are_rejected() {
        let mut engine = village_engine();
        assert!(matches!(engine.process_tick(f64::NAN, T0), Err(TickError::InvalidDelta(_))));
        assert!(matches!(engine.process_tick(-1.0, T0), Err(TickError::InvalidDelta(_))));
        assert_eq!(engine.tick_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 2: Starvation removes a unit and withdraws its synergy
    // -----------------------------------------------------------------------
    #[test]
    fn starving_buffalo_loses_its_synergy() {
        let mut engine = village_engine();
        engine.add_resource("rice", 150.0);
        assert!(engine.purchase_building("paddy_field", 1));
        assert!(engine.purchase_building("buffalo", 1));
        assert!(approx(engine.multipliers().get_value("paddy_output"), 1.1));

        // 3 missing water per tick against 100 health: dies on tick 34.
        for i in 1..=33 {
            engine.process_tick(0.1, T0 + i * 100).unwrap();
        }
        assert_eq!(engine.state().owned("buffalo"), 1);
        engine.process_tick(0.1, T0 + 3_400).unwrap();
        assert_eq!(engine.state().owned("buffalo"), 0);
        assert_eq!(engine.multipliers().get_value("paddy_output"), 1.0);
        assert!(approx(engine.net_rates()["rice"], 0.5));
        assert!(engine.events().total_emitted(EventKind::MultiplierChanged) >= 2);
    }

    // -----------------------------------------------------------------------
    // Test 3: Derived values are rebuilt on load and reset
    // -----------------------------------------------------------------------
    #[test]
    fn load_rebuilds_multipliers_and_capacities() {
        let mut engine = village_engine();
        engine.add_resource("rice", 200.0);
        engine.add_resource("coins", 60.0);
        assert!(engine.purchase_upgrade("iron_sickle"));
        assert!(engine.purchase_upgrade("seed_vault"));
        let saved = engine.state().clone();

        let mut restored = village_engine();
        restored.load_state(saved);
        assert_eq!(restored.multipliers().get_value("paddy_output"), 2.0);
        assert_eq!(restored.state().resources["seed_grain"].max_capacity, Some(600.0));
        assert!(restored.state().resources["seed_grain"].unlocked);
        assert_eq!(restored.state_hash(), engine.state_hash());

        restored.reset();
        assert_eq!(restored.multipliers().get_value("paddy_output"), 1.0);
        assert_eq!(restored.state().resources["seed_grain"].max_capacity, Some(500.0));
    }

    #[test]
    fn load_repairs_unknown_and_missing_entries() {
        let mut engine = village_engine();
        let mut state = engine.state().clone();
        state.buildings.remove("well");
        state.resources.insert("obsolete".into(), Default::default());
        engine.load_state(state);
        assert!(engine.state().buildings.contains_key("well"));
        assert!(!engine.state().resources.contains_key("obsolete"));
    }

    // -----------------------------------------------------------------------
    // Test 4: Offline catch-up
    // -----------------------------------------------------------------------
    #[test]
    fn offline_credits_capped_time_at_half_efficiency() {
        let mut engine = village_engine();
        engine.add_resource("rice", 50.0);
        assert!(engine.purchase_building("paddy_field", 1));
        engine.process_tick(0.0, T0).unwrap();

        let report = engine.apply_offline(T0 + 100_000).unwrap().unwrap();
        assert_eq!(report.window.offline_time_ms, 100_000);
        assert!(approx(report.resources_gained["rice"], 25.0));
        assert!(approx(engine.state().amount("rice"), 25.0));
        assert_eq!(engine.state().last_played_at, T0 + 100_000);

        assert_eq!(engine.apply_offline(T0 + 100_500).unwrap(), None);
    }

    #[test]
    fn offline_uses_expected_value_for_chance_outputs() {
        let mut engine = village_engine();
        engine.add_resource("rice", 30.0);
        assert!(engine.purchase_building("fishing_hut", 1));
        engine.process_tick(0.0, T0).unwrap();
        let rng_before = engine.state().rng.state();
        let report = engine.apply_offline(T0 + 40_000).unwrap().unwrap();
        // 20 effective seconds x 1 fish/s x 0.5 chance.
        assert!(approx(report.resources_gained["fish"], 10.0));
        assert_eq!(engine.state().rng.state(), rng_before);
    }

    // -----------------------------------------------------------------------
    // Test 5: Notifications and expiry
    // -----------------------------------------------------------------------
    #[test]
    fn subscribers_hear_only_about_changes() {
        let mut engine = village_engine();
        let seen = Rc::new(RefCell::new(0u32));
        let counter = seen.clone();
        engine.subscribe(Box::new(move |_| *counter.borrow_mut() += 1));

        engine.process_tick(1.0, T0).unwrap();
        let after_first = *seen.borrow();
        engine.process_tick(1.0, T0 + 1000).unwrap();
        assert_eq!(*seen.borrow(), after_first);

        engine.add_resource("rice", 5.0);
        assert_eq!(*seen.borrow(), after_first + 1);
    }

    #[test]
    fn temporary_multipliers_expire_during_ticks() {
        let mut engine = village_engine();
        engine.add_resource("rice", 50.0);
        assert!(engine.purchase_building("paddy_field", 1));
        engine.add_multiplier(
            MultiplierSource::new(stacks::ALL_PRODUCTION, "festival", 2.0, SourceType::Event)
                .expiring_at(T0 + 1_000),
        );
        assert!(approx(engine.net_rates()["rice"], 1.0));
        engine.process_tick(0.5, T0 + 500).unwrap();
        assert_eq!(engine.multipliers().get_value(stacks::ALL_PRODUCTION), 2.0);
        engine.process_tick(0.5, T0 + 1_000).unwrap();
        assert_eq!(engine.multipliers().get_value(stacks::ALL_PRODUCTION), 1.0);
        assert!(approx(engine.net_rates()["rice"], 0.5));
    }

    // -----------------------------------------------------------------------
    // Test 6: The loop drives the engine
    // -----------------------------------------------------------------------
    #[test]
    fn game_loop_drives_engine_ticks() {
        let mut engine = village_engine();
        engine.add_resource("rice", 50.0);
        assert!(engine.purchase_building("paddy_field", 1));
        let mut game_loop = GameLoop::default();
        game_loop.start(T0);
        for i in 1..=20 {
            game_loop.on_timer(T0 + i * 100, &mut engine);
        }
        engine.flush_all();
        assert!(approx(engine.state().amount("rice"), 1.0));
    }

    #[test]
    fn self_pause_is_announced_on_the_bus() {
        let mut engine = village_engine();
        engine.loop_paused(5);
        assert_eq!(engine.events().total_emitted(EventKind::LoopPaused), 1);
    }
}
