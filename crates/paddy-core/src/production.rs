//! Continuous and batch production.
//!
//! [`ProductionProcessor::process_building`] is the only production code
//! that writes to the resource ledger. [`calculate_production_per_second`]
//! is a pure projection of the same math for display and aggregation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::curve::{CurveContext, CurveError, CurveEvaluator, Neutral};
use crate::id::{stacks, BuildingId, ResourceId};
use crate::multiplier::MultiplierSystem;
use crate::registry::{BatchDef, BuildingDef, FlowDef, OutputDef, ProductionDef};
use crate::state::StateManager;

/// Upper bound on batch cycles fired by one building in one tick.
const MAX_BATCH_CYCLES: u32 = 1_000_000;

/// How `chance` outputs are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChanceMode {
    /// Bernoulli roll per output per tick (live play).
    #[default]
    Roll,
    /// Scale by the probability (offline catch-up).
    Expected,
}

// ---------------------------------------------------------------------------
// Resolved multipliers
// ---------------------------------------------------------------------------

/// Output factor for one building: `all_production × amount stack`.
fn output_scale(def: &BuildingDef, multipliers: &MultiplierSystem) -> f64 {
    let global = multipliers.get_value(stacks::ALL_PRODUCTION);
    let own = def
        .amount_stack_id
        .as_ref()
        .map_or(1.0, |s| multipliers.get_value(s.as_str()));
    global * own
}

/// Effective batch interval in ms, or `None` if the speed stack makes it
/// meaningless.
fn batch_interval_ms(batch: &BatchDef, multipliers: &MultiplierSystem) -> Option<f64> {
    let speed = batch
        .speed_stack_id
        .as_ref()
        .map_or(1.0, |s| multipliers.get_value(s.as_str()));
    let interval = batch.interval_ms / speed;
    (interval.is_finite() && interval > 0.0).then_some(interval)
}

fn base_amount(output: &OutputDef, curves: &CurveEvaluator) -> Result<f64, CurveError> {
    curves.evaluate(&output.base_amount, &CurveContext::owned(0.0), Neutral::Additive)
}

fn flow_required(input: &FlowDef, owned: f64, dt: f64) -> f64 {
    input.amount * owned * dt / input.interval_seconds
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Net per-second rates of `owned` units of `def`: outputs positive,
/// inputs negative. Chance outputs are folded in as expectations, batch
/// rates are per-cycle amounts over the effective interval, scaled by the
/// building's `resource_limit`. Input availability is ignored.
pub fn calculate_production_per_second(
    def: &BuildingDef,
    owned: u32,
    resource_limit: f64,
    multipliers: &MultiplierSystem,
    curves: &CurveEvaluator,
) -> Result<BTreeMap<ResourceId, f64>, CurveError> {
    let mut rates = BTreeMap::new();
    if owned == 0 {
        return Ok(rates);
    }
    let n = f64::from(owned);
    let scale = output_scale(def, multipliers);
    match &def.production {
        None => {}
        Some(ProductionDef::Continuous { inputs, outputs }) => {
            for input in inputs {
                *rates.entry(input.resource.clone()).or_insert(0.0) -=
                    flow_required(input, n, 1.0);
            }
            for output in outputs {
                let p = output.chance.map_or(1.0, |c| c.clamp(0.0, 1.0));
                let per_second = base_amount(output, curves)? * n / output.interval_seconds;
                *rates.entry(output.resource.clone()).or_insert(0.0) += per_second * p * scale;
            }
        }
        Some(ProductionDef::Batch(batch)) => {
            let Some(interval) = batch_interval_ms(batch, multipliers) else {
                return Ok(rates);
            };
            let cycles_per_second = 1000.0 / interval * resource_limit.clamp(0.0, 1.0);
            for input in &batch.inputs {
                *rates.entry(input.resource.clone()).or_insert(0.0) -=
                    input.amount * n * cycles_per_second;
            }
            for output in &batch.outputs {
                *rates.entry(output.resource.clone()).or_insert(0.0) +=
                    output.amount * n * cycles_per_second * scale;
            }
        }
    }
    Ok(rates)
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Applies production to the ledger and buffers small continuous gains.
#[derive(Debug, Clone, Default)]
pub struct ProductionProcessor {
    /// Pending continuous output per (building, resource).
    accumulators: BTreeMap<(BuildingId, ResourceId), f64>,
    threshold: f64,
}

impl ProductionProcessor {
    pub fn new(threshold: f64) -> Self {
        Self {
            accumulators: BTreeMap::new(),
            threshold: threshold.max(0.0),
        }
    }

    /// Run every producing building for `dt` seconds, in catalogue order.
    pub fn process_tick(
        &mut self,
        state: &mut StateManager,
        multipliers: &MultiplierSystem,
        curves: &CurveEvaluator,
        dt: f64,
        mode: ChanceMode,
    ) -> Result<(), CurveError> {
        if !(dt > 0.0) {
            return Ok(());
        }
        let catalogue = state.catalogue().clone();
        for def in catalogue.buildings() {
            if def.production.is_some() {
                self.process_building(def, state, multipliers, curves, dt, mode)?;
            }
        }
        Ok(())
    }

    /// Run one building for `dt` seconds.
    pub fn process_building(
        &mut self,
        def: &BuildingDef,
        state: &mut StateManager,
        multipliers: &MultiplierSystem,
        curves: &CurveEvaluator,
        dt: f64,
        mode: ChanceMode,
    ) -> Result<(), CurveError> {
        let Some(building) = state.state().buildings.get(&def.id) else {
            return Ok(());
        };
        if building.owned == 0 || building.disabled || !(dt > 0.0) {
            return Ok(());
        }
        let owned = f64::from(building.owned);
        match &def.production {
            None => Ok(()),
            Some(ProductionDef::Continuous { inputs, outputs }) => {
                self.run_continuous(def, inputs, outputs, owned, state, multipliers, curves, dt, mode)
            }
            Some(ProductionDef::Batch(batch)) => {
                run_batch(def, batch, owned, state, multipliers, dt);
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_continuous(
        &mut self,
        def: &BuildingDef,
        inputs: &[FlowDef],
        outputs: &[OutputDef],
        owned: f64,
        state: &mut StateManager,
        multipliers: &MultiplierSystem,
        curves: &CurveEvaluator,
        dt: f64,
        mode: ChanceMode,
    ) -> Result<(), CurveError> {
        // Limiting input efficiency.
        let mut efficiency: f64 = 1.0;
        for input in inputs {
            let required = flow_required(input, owned, dt);
            if required <= 0.0 {
                continue;
            }
            let available = state.state().amount(input.resource.as_str());
            efficiency = efficiency.min((available / required).clamp(0.0, 1.0));
        }
        if efficiency <= 0.0 {
            return Ok(());
        }

        // Resolve outputs before touching the ledger so a curve failure
        // leaves inputs unconsumed.
        let scale = output_scale(def, multipliers);
        let mut produced = Vec::with_capacity(outputs.len());
        for output in outputs {
            let mut amount =
                base_amount(output, curves)? * owned * (dt / output.interval_seconds) * efficiency;
            if let Some(p) = output.chance {
                match mode {
                    ChanceMode::Roll => {
                        if !state.rng_mut().chance_f64(p) {
                            continue;
                        }
                    }
                    ChanceMode::Expected => amount *= p.clamp(0.0, 1.0),
                }
            }
            produced.push((&output.resource, amount * scale));
        }

        for input in inputs {
            let required = flow_required(input, owned, dt);
            if required > 0.0 {
                state.update_resource(input.resource.as_str(), -(required * efficiency));
            }
        }
        for (resource, amount) in produced {
            if amount > 0.0 && amount.is_finite() {
                self.accumulate(state, &def.id, resource, amount);
            }
        }
        Ok(())
    }

    fn accumulate(
        &mut self,
        state: &mut StateManager,
        building: &BuildingId,
        resource: &ResourceId,
        amount: f64,
    ) {
        let pending = self
            .accumulators
            .entry((building.clone(), resource.clone()))
            .or_insert(0.0);
        *pending += amount;
        if *pending >= self.threshold {
            let flush = std::mem::take(pending);
            state.update_resource(resource.as_str(), flush);
        }
    }

    /// Push every pending remainder into the ledger.
    pub fn flush_all(&mut self, state: &mut StateManager) {
        for ((_, resource), pending) in std::mem::take(&mut self.accumulators) {
            if pending != 0.0 {
                state.update_resource(resource.as_str(), pending);
            }
        }
    }

    /// Amount buffered but not yet in the ledger.
    pub fn pending(&self, building: &str, resource: &str) -> f64 {
        self.accumulators
            .get(&(BuildingId::from(building), ResourceId::from(resource)))
            .copied()
            .unwrap_or(0.0)
    }

    /// Drop pending remainders without applying them (used on reset/load).
    pub fn clear(&mut self) {
        self.accumulators.clear();
    }
}

/// Fire as many whole batch cycles as the accrued time allows. Each cycle
/// scales inputs and outputs by the same fraction.
fn run_batch(
    def: &BuildingDef,
    batch: &BatchDef,
    owned: f64,
    state: &mut StateManager,
    multipliers: &MultiplierSystem,
    dt: f64,
) {
    let Some(interval) = batch_interval_ms(batch, multipliers) else {
        tracing::warn!(building = %def.id, "batch interval is not positive; skipping");
        return;
    };
    let Some(building) = state.state().buildings.get(&def.id) else {
        return;
    };
    let resource_limit = building.resource_limit;
    let mut progress = building.batch_progress_ms + dt * 1000.0;
    let scale = output_scale(def, multipliers);

    let mut cycles = 0u32;
    while progress >= interval && cycles < MAX_BATCH_CYCLES {
        let fraction = batch.inputs.iter().fold(resource_limit, |f, input| {
            let required = input.amount * owned;
            if required <= 0.0 {
                return f;
            }
            let available = state.state().amount(input.resource.as_str());
            f.min((available / required).clamp(0.0, 1.0))
        });
        if fraction <= 0.0 {
            tracing::trace!(building = %def.id, "batch stalled on inputs");
            break;
        }
        for input in &batch.inputs {
            let amount = input.amount * owned * fraction;
            if amount > 0.0 {
                state.update_resource(input.resource.as_str(), -amount);
            }
        }
        for output in &batch.outputs {
            let amount = output.amount * owned * fraction * scale;
            if amount > 0.0 {
                state.update_resource(output.resource.as_str(), amount);
            }
        }
        progress -= interval;
        cycles += 1;
    }
    if cycles == MAX_BATCH_CYCLES {
        tracing::warn!(building = %def.id, cycles, "batch cycle cap reached");
    }
    state.update_building(def.id.as_str(), |b| b.batch_progress_ms = progress);
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalMode;
    use crate::multiplier::{MultiplierSource, SourceType};
    use crate::test_utils::*;

    struct Rig {
        state: StateManager,
        multipliers: MultiplierSystem,
        curves: CurveEvaluator,
        production: ProductionProcessor,
    }

    impl Rig {
        fn new() -> Self {
            let catalogue = village(EvalMode::Strict);
            let mut multipliers = MultiplierSystem::new();
            for stack in catalogue.stacks() {
                multipliers.register_stack(stack.clone());
            }
            let curves = CurveEvaluator::with_presets(catalogue.curves().clone(), EvalMode::Strict);
            Self {
                state: StateManager::new(catalogue, 7),
                multipliers,
                curves,
                production: ProductionProcessor::new(0.01),
            }
        }

        fn tick(&mut self, dt: f64) {
            self.production
                .process_tick(&mut self.state, &self.multipliers, &self.curves, dt, ChanceMode::Roll)
                .unwrap();
        }

        fn def(&self, id: &str) -> BuildingDef {
            self.state.catalogue().building(id).unwrap().clone()
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: One paddy field for ten seconds yields exactly five rice
    // -----------------------------------------------------------------------
    #[test]
    fn paddy_field_produces_half_rice_per_second() {
        let mut rig = Rig::new();
        rig.state.add_buildings("paddy_field", 1);
        rig.tick(10.0);
        rig.production.flush_all(&mut rig.state);
        assert_eq!(rig.state.state().amount("rice"), 5.0);
    }

    // -----------------------------------------------------------------------
    // Test 2: Multipliers scale outputs
    // -----------------------------------------------------------------------
    #[test]
    fn outputs_scale_by_global_and_building_stacks() {
        let mut rig = Rig::new();
        rig.state.add_buildings("paddy_field", 2);
        rig.multipliers.add_multiplier(MultiplierSource::new(
            stacks::ALL_PRODUCTION,
            "festival",
            1.5,
            SourceType::Event,
        ));
        rig.multipliers
            .add_multiplier(MultiplierSource::new("paddy_output", "sickle", 2.0, SourceType::Upgrade));
        rig.tick(1.0);
        assert!(approx(rig.state.state().amount("rice"), 0.5 * 2.0 * 1.5 * 2.0));
    }

    // -----------------------------------------------------------------------
    // Test 3: Small increments wait in the accumulator
    // -----------------------------------------------------------------------
    #[test]
    fn accumulator_holds_sub_threshold_gains() {
        let mut rig = Rig::new();
        rig.state.add_buildings("paddy_field", 1);
        rig.tick(0.01);
        assert_eq!(rig.state.state().amount("rice"), 0.0);
        assert!(approx(rig.production.pending("paddy_field", "rice"), 0.005));
        rig.tick(0.01);
        assert!(approx(rig.state.state().amount("rice"), 0.01));
        assert_eq!(rig.production.pending("paddy_field", "rice"), 0.0);
    }

    // -----------------------------------------------------------------------
    // Test 4: Converters run at the limiting input efficiency
    // -----------------------------------------------------------------------
    #[test]
    fn converter_limited_by_scarcest_input() {
        let mut rig = Rig::new();
        rig.state.add_buildings("brewery", 1);
        // Needs 2 rice/s; only 1 available over a 1 s tick → 50 %.
        rig.state.update_resource("rice", 1.0);
        rig.tick(1.0);
        rig.production.flush_all(&mut rig.state);
        assert!(approx(rig.state.state().amount("rice"), 0.0));
        assert!(approx(rig.state.state().amount("coins"), 0.5));
    }

    #[test]
    fn converter_without_inputs_does_nothing() {
        let mut rig = Rig::new();
        rig.state.add_buildings("brewery", 1);
        rig.tick(1.0);
        rig.production.flush_all(&mut rig.state);
        assert_eq!(rig.state.state().amount("coins"), 0.0);
    }

    // -----------------------------------------------------------------------
    // Test 5: Batch cycles scale inputs and outputs by the same fraction
    // -----------------------------------------------------------------------
    #[test]
    fn batch_fires_whole_cycles() {
        let mut rig = Rig::new();
        rig.state.add_buildings("trading_boat", 1);
        rig.state.update_resource("rice", 1_000.0);
        rig.tick(25.0); // interval 10 s → two cycles, 5 s carried over
        let s = rig.state.state();
        assert!(approx(s.amount("rice"), 800.0));
        assert!(approx(s.amount("coins"), 80.0));
        assert!(approx(s.buildings["trading_boat"].batch_progress_ms, 5_000.0));
    }

    #[test]
    fn batch_partial_fraction_and_throttle() {
        let mut rig = Rig::new();
        rig.state.add_buildings("trading_boat", 1);
        rig.state.update_resource("rice", 30.0);
        rig.tick(10.0);
        assert!(approx(rig.state.state().amount("rice"), 0.0));
        assert!(approx(rig.state.state().amount("coins"), 40.0 * 0.3));

        rig.state.set_resource_limit("trading_boat", 0.5);
        rig.state.update_resource("rice", 500.0);
        rig.tick(10.0);
        assert!(approx(rig.state.state().amount("rice"), 450.0));
        assert!(approx(rig.state.state().amount("coins"), 12.0 + 20.0));
    }

    #[test]
    fn batch_stalls_without_inputs_and_keeps_time() {
        let mut rig = Rig::new();
        rig.state.add_buildings("trading_boat", 1);
        rig.tick(12.0);
        assert_eq!(rig.state.state().amount("coins"), 0.0);
        assert!(approx(rig.state.state().buildings["trading_boat"].batch_progress_ms, 12_000.0));

        rig.state.update_resource("rice", 100.0);
        rig.tick(0.1);
        assert!(approx(rig.state.state().amount("coins"), 40.0));
        assert!(approx(rig.state.state().buildings["trading_boat"].batch_progress_ms, 2_100.0));
    }

    #[test]
    fn speed_stack_shortens_batch_interval() {
        let mut rig = Rig::new();
        rig.state.add_buildings("trading_boat", 1);
        rig.state.update_resource("rice", 1_000.0);
        rig.multipliers
            .add_multiplier(MultiplierSource::new("boat_speed", "sails", 2.0, SourceType::Upgrade));
        rig.tick(10.0);
        assert!(approx(rig.state.state().amount("coins"), 80.0));
    }

    // -----------------------------------------------------------------------
    // Test 6: Chance outputs
    // -----------------------------------------------------------------------
    #[test]
    fn expected_mode_scales_by_probability() {
        let mut rig = Rig::new();
        rig.state.add_buildings("fishing_hut", 2);
        let def = rig.def("fishing_hut");
        rig.production
            .process_building(&def, &mut rig.state, &rig.multipliers, &rig.curves, 10.0, ChanceMode::Expected)
            .unwrap();
        rig.production.flush_all(&mut rig.state);
        assert!(approx(rig.state.state().amount("fish"), 2.0 * 1.0 * 10.0 * 0.5));
    }

    #[test]
    fn rolled_chance_is_all_or_nothing_per_tick() {
        let mut rig = Rig::new();
        rig.state.add_buildings("fishing_hut", 1);
        let mut last = 0.0;
        for _ in 0..50 {
            rig.tick(1.0);
            rig.production.flush_all(&mut rig.state);
            let now = rig.state.state().amount("fish");
            let gained = now - last;
            assert!(gained == 0.0 || approx(gained, 1.0));
            last = now;
        }
        assert!(last > 0.0 && last < 50.0);
    }

    // -----------------------------------------------------------------------
    // Test 7: Disabled buildings and projections
    // -----------------------------------------------------------------------
    #[test]
    fn disabled_buildings_do_not_produce() {
        let mut rig = Rig::new();
        rig.state.add_buildings("paddy_field", 1);
        rig.state.set_disabled("paddy_field", true);
        rig.tick(10.0);
        rig.production.flush_all(&mut rig.state);
        assert_eq!(rig.state.state().amount("rice"), 0.0);
    }

    #[test]
    fn projection_matches_definitions() {
        let rig = Rig::new();
        let rates = calculate_production_per_second(
            &rig.def("brewery"),
            3,
            1.0,
            &rig.multipliers,
            &rig.curves,
        )
        .unwrap();
        assert!(approx(rates["rice"], -6.0));
        assert!(approx(rates["coins"], 3.0));

        let boat = calculate_production_per_second(
            &rig.def("trading_boat"),
            1,
            1.0,
            &rig.multipliers,
            &rig.curves,
        )
        .unwrap();
        assert!(approx(boat["coins"], 4.0));
        assert!(approx(boat["rice"], -10.0));

        let fish = calculate_production_per_second(
            &rig.def("fishing_hut"),
            1,
            1.0,
            &rig.multipliers,
            &rig.curves,
        )
        .unwrap();
        assert!(approx(fish["fish"], 0.5));
    }
}
