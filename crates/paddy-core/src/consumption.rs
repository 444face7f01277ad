//! Upkeep and starvation.
//!
//! Buildings with a [`ConsumptionDef`] draw their upkeep every tick. A
//! shortfall damages the building type's shared health pool; a fully fed
//! tick heals it at the same rate full starvation would drain it. At zero
//! health the building's `on_death` policy applies. This is the only path
//! that lowers `owned` without a player action.

use crate::event::Event;
use crate::id::{BuildingId, ResourceId};
use crate::registry::{BuildingDef, ConsumptionDef, OnDeath};
use crate::state::StateManager;

/// Result of one building's upkeep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpkeepReport {
    pub damage: f64,
    pub healed: f64,
    /// Units removed by starvation.
    pub removed: u32,
    pub disabled: bool,
}

/// Run upkeep for every consuming building, in catalogue order. Returns
/// the buildings whose owned count changed.
pub fn process_tick(state: &mut StateManager) -> Vec<BuildingId> {
    let catalogue = state.catalogue().clone();
    let mut changed = Vec::new();
    for def in catalogue.buildings() {
        if def.consumption.is_none() {
            continue;
        }
        if let Some(report) = process_building(def, state)
            && report.removed > 0
        {
            changed.push(def.id.clone());
        }
    }
    changed
}

/// Run upkeep for one building. `None` if it has no consumption or no
/// units.
pub fn process_building(def: &BuildingDef, state: &mut StateManager) -> Option<UpkeepReport> {
    let consumption = def.consumption.as_ref()?;
    let building = state.state().buildings.get(&def.id)?;
    if building.owned == 0 {
        return None;
    }
    let owned = f64::from(building.owned);
    let mut report = UpkeepReport::default();

    let mut missing: Vec<(ResourceId, f64)> = Vec::new();
    for entry in &consumption.resources {
        let required = entry.amount_per_tick * owned;
        if required <= 0.0 {
            continue;
        }
        let available = state.state().amount(entry.resource.as_str());
        let consumed = required.min(available);
        if consumed > 0.0 {
            state.update_resource(entry.resource.as_str(), -consumed);
        }
        let short = required - consumed;
        if short > 0.0 {
            report.damage += short * consumption.health_loss_per_missing;
            missing.push((entry.resource.clone(), short));
        }
    }

    if report.damage > 0.0 {
        let mut health = 0.0;
        state.update_building(def.id.as_str(), |b| {
            b.health -= report.damage;
            health = b.health.max(0.0);
        });
        state.emit(Event::ResourceShortage {
            building: def.id.clone(),
            missing,
            damage: report.damage,
            health,
        });
        if health <= 0.0 {
            die(def, consumption, state, &mut report);
        }
    } else {
        let rate = full_starvation_rate(consumption, owned);
        let mut restored = false;
        state.update_building(def.id.as_str(), |b| {
            let before = b.health;
            b.health = (b.health + rate).min(b.max_health);
            report.healed = b.health - before;
            restored = b.disabled && b.health >= b.max_health;
        });
        if restored {
            state.set_disabled(def.id.as_str(), false);
        }
    }
    Some(report)
}

/// Damage per tick if every consumed resource were entirely missing.
fn full_starvation_rate(consumption: &ConsumptionDef, owned: f64) -> f64 {
    consumption
        .resources
        .iter()
        .map(|e| e.amount_per_tick * owned * consumption.health_loss_per_missing)
        .sum()
}

fn die(
    def: &BuildingDef,
    consumption: &ConsumptionDef,
    state: &mut StateManager,
    report: &mut UpkeepReport,
) {
    match consumption.on_death {
        OnDeath::Remove => {
            report.removed = state.remove_buildings(def.id.as_str(), 1);
            state.update_building(def.id.as_str(), |b| b.health = b.max_health);
            tracing::debug!(building = %def.id, "unit starved and was removed");
        }
        OnDeath::Disable => {
            state.update_building(def.id.as_str(), |b| b.health = 0.0);
            if state.state().buildings.get(&def.id).is_some_and(|b| !b.disabled) {
                state.set_disabled(def.id.as_str(), true);
                report.disabled = true;
                tracing::debug!(building = %def.id, "starving building disabled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalMode;
    use crate::registry::{CatalogueBuilder, ResourceDef};
    use crate::test_utils::*;
    use std::sync::Arc;

    fn manager() -> StateManager {
        StateManager::new(village(EvalMode::Strict), 3)
    }

    #[test]
    fn buffalo_starves_after_forty_dry_ticks() {
        let mut m = manager();
        m.add_buildings("buffalo", 2);
        let mut removed_at = None;
        for tick in 1..=40 {
            let changed = process_tick(&mut m);
            if !changed.is_empty() {
                assert!(removed_at.is_none(), "only one buffalo may die");
                removed_at = Some(tick);
                assert_eq!(m.state().buildings["buffalo"].health, 100.0);
            }
        }
        // Two buffalo lose 6 health per tick and die at tick 17.
        assert_eq!(removed_at, Some(17));
        assert_eq!(m.state().owned("buffalo"), 1);
    }

    #[test]
    fn single_buffalo_dies_within_forty_ticks() {
        let mut m = manager();
        m.add_buildings("buffalo", 1);
        for _ in 0..40 {
            process_tick(&mut m);
        }
        let b = &m.state().buildings["buffalo"];
        assert_eq!(b.owned, 0);
        assert_eq!(b.health, 100.0);
    }

    #[test]
    fn partial_supply_damages_by_the_shortfall() {
        let mut m = manager();
        m.add_buildings("buffalo", 1);
        m.update_resource("water", 1.0);
        let report = process_building(&buffalo(), &mut m).unwrap();
        assert_eq!(report.damage, 2.0);
        assert_eq!(m.state().amount("water"), 0.0);
        assert_eq!(m.state().buildings["buffalo"].health, 98.0);
    }

    #[test]
    fn fed_buildings_heal_at_the_starvation_rate() {
        let mut m = manager();
        m.add_buildings("buffalo", 1);
        m.update_building("buffalo", |b| b.health = 50.0);
        m.update_resource("water", 100.0);
        let report = process_building(&buffalo(), &mut m).unwrap();
        assert_eq!(report.healed, 3.0);
        assert_eq!(m.state().buildings["buffalo"].health, 53.0);
        assert_eq!(m.state().amount("water"), 97.0);

        m.update_building("buffalo", |b| b.health = 99.0);
        process_building(&buffalo(), &mut m);
        assert_eq!(m.state().buildings["buffalo"].health, 100.0, "heal caps at max");
    }

    #[test]
    fn shortage_emits_event() {
        use crate::event::EventKind;
        let mut m = manager();
        m.add_buildings("buffalo", 1);
        process_tick(&mut m);
        assert_eq!(m.events().total_emitted(EventKind::ResourceShortage), 1);
    }

    #[test]
    fn disable_policy_keeps_units_and_recovers() {
        let mut ox = buffalo();
        ox.id = "ox".into();
        ox.special_effects.clear();
        ox.base_cost.clear();
        ox.cost_curve = Default::default();
        if let Some(c) = ox.consumption.as_mut() {
            c.on_death = OnDeath::Disable;
            c.max_health = 6.0;
        }
        let catalogue = CatalogueBuilder::new()
            .resource(ResourceDef::new("water"))
            .building(ox.clone())
            .build(EvalMode::Strict)
            .unwrap();
        let mut m = StateManager::new(Arc::new(catalogue), 1);
        m.add_buildings("ox", 1);

        process_building(&ox, &mut m);
        let report = process_building(&ox, &mut m).unwrap();
        assert!(report.disabled);
        let b = &m.state().buildings["ox"];
        assert_eq!((b.owned, b.disabled, b.health), (1, true, 0.0));

        m.update_resource("water", 100.0);
        process_building(&ox, &mut m);
        assert!(m.state().buildings["ox"].disabled, "still recovering");
        process_building(&ox, &mut m);
        assert!(!m.state().buildings["ox"].disabled);
        assert_eq!(m.state().buildings["ox"].health, 6.0);
    }
}
