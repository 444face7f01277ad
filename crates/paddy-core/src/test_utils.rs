//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`. The "village"
//! content set below is small but touches every production mode.

use std::sync::Arc;

use crate::config::{EngineConfig, EvalMode};
use crate::curve::{Curve, CurveRef};
use crate::engine::Engine;
use crate::multiplier::{StackDef, StackType};
use crate::registry::*;
use crate::unlock::{Requirement, UnlockRule};

// ===========================================================================
// Float helper
// ===========================================================================

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

// ===========================================================================
// Resources
// ===========================================================================

pub fn rice() -> ResourceDef {
    ResourceDef::new("rice")
}

pub fn water() -> ResourceDef {
    ResourceDef::new("water")
}

pub fn coins() -> ResourceDef {
    ResourceDef::new("coins")
}

pub fn fish() -> ResourceDef {
    ResourceDef::new("fish")
}

/// Capped at 500, locked until a granary is bought.
pub fn grain_store() -> ResourceDef {
    let mut def = ResourceDef::new("seed_grain");
    def.max_capacity = Some(500.0);
    def.unlocked = false;
    def.unlock = UnlockRule::default().requires(Requirement::UpgradePurchased {
        upgrade: "seed_vault".into(),
    });
    def
}

// ===========================================================================
// Buildings
// ===========================================================================

fn continuous(resource: &str, per_second: f64) -> ProductionDef {
    ProductionDef::Continuous {
        inputs: vec![],
        outputs: vec![OutputDef {
            resource: resource.into(),
            base_amount: per_second.into(),
            interval_seconds: 1.0,
            chance: None,
        }],
    }
}

/// 0.5 rice/s, 50 rice, +15 % per purchase.
pub fn paddy_field() -> BuildingDef {
    let mut def = BuildingDef::new("paddy_field");
    def.base_cost = vec![ResourceAmount::new("rice", 50.0)];
    def.cost_curve = CurveRef::preset("cost_15");
    def.amount_stack_id = Some("paddy_output".into());
    def.production = Some(continuous("rice", 0.5));
    def
}

/// Drinks 3 water per tick; boosts paddy fields by 10 % each.
pub fn buffalo() -> BuildingDef {
    let mut def = BuildingDef::new("buffalo");
    def.base_cost = vec![ResourceAmount::new("rice", 100.0)];
    def.cost_curve = CurveRef::preset("cost_15");
    def.consumption = Some(ConsumptionDef {
        resources: vec![ConsumptionEntry {
            resource: "water".into(),
            amount_per_tick: 3.0,
        }],
        health_loss_per_missing: 1.0,
        max_health: 100.0,
        on_death: OnDeath::Remove,
    });
    def.special_effects = vec![SpecialEffect::Synergy {
        target_building: "paddy_field".into(),
        bonus_per_unit: 0.1,
    }];
    def
}

/// 2 water/s.
pub fn well() -> BuildingDef {
    let mut def = BuildingDef::new("well");
    def.base_cost = vec![ResourceAmount::new("rice", 20.0)];
    def.production = Some(continuous("water", 2.0));
    def
}

/// 2 rice/s → 1 coin/s.
pub fn brewery() -> BuildingDef {
    let mut def = BuildingDef::new("brewery");
    def.base_cost = vec![ResourceAmount::new("rice", 150.0)];
    def.subsequent_cost = Some(vec![ResourceAmount::new("coins", 25.0)]);
    def.cost_curve = Curve::Linear {
        base: 1.0,
        rate: 1.0,
        count_var: "owned".into(),
    }
    .into();
    def.production = Some(ProductionDef::Continuous {
        inputs: vec![FlowDef {
            resource: "rice".into(),
            amount: 2.0,
            interval_seconds: 1.0,
        }],
        outputs: vec![OutputDef {
            resource: "coins".into(),
            base_amount: 1.0.into(),
            interval_seconds: 1.0,
            chance: None,
        }],
    });
    def
}

/// Every 10 s: 100 rice → 40 coins.
pub fn trading_boat() -> BuildingDef {
    let mut def = BuildingDef::new("trading_boat");
    def.base_cost = vec![ResourceAmount::new("coins", 100.0)];
    def.max_owned = Some(3);
    def.production = Some(ProductionDef::Batch(BatchDef {
        interval_ms: 10_000.0,
        speed_stack_id: Some("boat_speed".into()),
        inputs: vec![ResourceAmount::new("rice", 100.0)],
        outputs: vec![ResourceAmount::new("coins", 40.0)],
    }));
    def
}

/// 1 fish/s with a 50 % catch chance.
pub fn fishing_hut() -> BuildingDef {
    let mut def = BuildingDef::new("fishing_hut");
    def.base_cost = vec![ResourceAmount::new("rice", 30.0)];
    def.production = Some(ProductionDef::Continuous {
        inputs: vec![],
        outputs: vec![OutputDef {
            resource: "fish".into(),
            base_amount: 1.0.into(),
            interval_seconds: 1.0,
            chance: Some(0.5),
        }],
    });
    def
}

/// Raises seed grain storage by 250 per unit. Locked until the town era.
pub fn granary() -> BuildingDef {
    let mut def = BuildingDef::new("granary");
    def.base_cost = vec![ResourceAmount::new("coins", 50.0)];
    def.unlocked = false;
    def.unlock = UnlockRule::default().in_era("town");
    def.special_effects = vec![SpecialEffect::Storage {
        resource: "seed_grain".into(),
        capacity_per_unit: 250.0,
    }];
    def.effects = vec![BuildingEffect {
        stack: "trade_discount".into(),
        bonus_per_unit: 0.1,
    }];
    def
}

// ===========================================================================
// Upgrades
// ===========================================================================

/// Doubles paddy output.
pub fn iron_sickle() -> UpgradeDef {
    let mut def = UpgradeDef::new("iron_sickle");
    def.cost = vec![ResourceAmount::new("rice", 100.0)];
    def.effects = vec![UpgradeEffect::Multiplier {
        stack: "paddy_output".into(),
        value: 2.0,
    }];
    def
}

/// Repeatable +10 % to everything, cost doubling each time.
pub fn irrigation() -> UpgradeDef {
    let mut def = UpgradeDef::new("irrigation");
    def.cost = vec![ResourceAmount::new("coins", 10.0)];
    def.cost_curve = Some(
        Curve::Exponential {
            base: 1.0,
            rate: 2.0,
            count_var: "owned".into(),
        }
        .into(),
    );
    def.repeatable = true;
    def.max_purchases = Some(3);
    def.effects = vec![UpgradeEffect::Multiplier {
        stack: "all_production".into(),
        value: 1.1,
    }];
    def
}

/// Unlocks seed grain and raises its cap; locked until 50 lifetime coins.
pub fn seed_vault() -> UpgradeDef {
    let mut def = UpgradeDef::new("seed_vault");
    def.cost = vec![ResourceAmount::new("coins", 20.0)];
    def.unlocked = false;
    def.unlock = UnlockRule::default().requires(Requirement::LifetimeResource {
        resource: "coins".into(),
        amount: 50.0,
    });
    def.effects = vec![
        UpgradeEffect::UnlockResource {
            resource: "seed_grain".into(),
        },
        UpgradeEffect::CapacityBonus {
            resource: "seed_grain".into(),
            amount: 100.0,
        },
    ];
    def
}

/// Moves the game into the town era.
pub fn town_charter() -> UpgradeDef {
    let mut def = UpgradeDef::new("town_charter");
    def.cost = vec![ResourceAmount::new("coins", 40.0)];
    def.effects = vec![UpgradeEffect::AdvanceEra { era: "town".into() }];
    def
}

// ===========================================================================
// Catalogue
// ===========================================================================

/// Full village content set.
pub fn village_builder() -> CatalogueBuilder {
    CatalogueBuilder::new()
        .resource(rice())
        .resource(water())
        .resource(coins())
        .resource(fish())
        .resource(grain_store())
        .stack(StackDef::multiplicative("paddy_output"))
        .stack(StackDef::multiplicative("boat_speed"))
        .stack(StackDef::new("trade_discount", StackType::Diminishing).with_bounds(None, Some(0.5)))
        .curve(
            "cost_15",
            Curve::Exponential {
                base: 1.0,
                rate: 1.15,
                count_var: "owned".into(),
            },
        )
        .era(EraDef {
            id: "village".into(),
            name: "Village".into(),
            unlock: UnlockRule::default(),
        })
        .era(EraDef {
            id: "town".into(),
            name: "Town".into(),
            unlock: UnlockRule::default().requires(Requirement::LifetimeResource {
                resource: "coins".into(),
                amount: 1_000.0,
            }),
        })
        .building(paddy_field())
        .building(buffalo())
        .building(well())
        .building(brewery())
        .building(trading_boat())
        .building(fishing_hut())
        .building(granary())
        .upgrade(iron_sickle())
        .upgrade(irrigation())
        .upgrade(seed_vault())
        .upgrade(town_charter())
}

pub fn village(mode: EvalMode) -> Arc<Catalogue> {
    Arc::new(
        village_builder()
            .build(mode)
            .expect("village content is valid"),
    )
}

/// Engine over the village content with strict evaluation.
pub fn village_engine() -> Engine {
    let config = EngineConfig {
        eval_mode: EvalMode::Strict,
        ..EngineConfig::default()
    };
    Engine::new(village(EvalMode::Strict), config)
}
