//! Upgrade purchases and their effects.
//!
//! Upgrades carry no runtime state of their own beyond [`UpgradeState`]:
//! every effect is re-derivable from the purchase counts, which is what
//! [`reapply_all`] does after a load.
//!
//! [`UpgradeState`]: crate::state::UpgradeState

use serde::Serialize;

use crate::curve::{CurveContext, CurveError, Neutral};
use crate::id::{SourceId, UpgradeId};
use crate::multiplier::{MultiplierSource, SourceType, StackType};
use crate::registry::{ResourceAmount, UpgradeDef, UpgradeEffect};
use crate::sim::{SimContext, SimView};
use crate::state::sum_amounts;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeInfo {
    pub id: UpgradeId,
    pub name: String,
    pub purchase_count: u32,
    /// `None` for unlimited repeatables.
    pub max_purchases: Option<u32>,
    pub next_cost: Vec<ResourceAmount>,
    pub affordable: bool,
}

/// Multiplier source id for an upgrade's contribution.
pub fn source_id(upgrade: &str) -> SourceId {
    SourceId::new(format!("upgrade:{upgrade}"))
}

/// Price of the next purchase: `cost × cost_curve({owned: purchase_count})`,
/// rounded up per resource.
pub fn upgrade_cost(ctx: &SimView<'_>, id: &str) -> Result<Vec<ResourceAmount>, CurveError> {
    let Some(def) = ctx.state.catalogue().upgrade(id) else {
        return Ok(Vec::new());
    };
    let count = ctx.state.state().upgrades.get(id).map_or(0, |u| u.purchase_count);
    let factor = match &def.cost_curve {
        Some(curve) => ctx.curves.evaluate(
            curve,
            &CurveContext::owned(f64::from(count)),
            Neutral::Multiplicative,
        )?,
        None => 1.0,
    };
    Ok(sum_amounts(&def.cost)
        .into_iter()
        .map(|(resource, amount)| ResourceAmount {
            resource,
            amount: (amount * factor).ceil(),
        })
        .collect())
}

fn can_purchase_more(ctx: &SimView<'_>, def: &UpgradeDef) -> bool {
    ctx.state
        .state()
        .upgrades
        .get(&def.id)
        .is_some_and(|u| u.unlocked && u.purchase_count < def.purchase_limit())
}

/// Buy one level of an upgrade. Refused (with nothing changed) when the
/// upgrade is unknown, locked, maxed out, or unaffordable.
pub fn purchase_upgrade(ctx: &mut SimContext<'_>, id: &str) -> bool {
    let catalogue = ctx.state.catalogue().clone();
    let Some(def) = catalogue.upgrade(id) else {
        tracing::debug!(upgrade = id, "purchase of unknown upgrade");
        return false;
    };
    if !can_purchase_more(&ctx.view(), def) {
        return false;
    }
    let cost = match upgrade_cost(&ctx.view(), id) {
        Ok(cost) => cost,
        Err(err) => {
            tracing::warn!(upgrade = id, error = %err, "cost evaluation failed; purchase refused");
            return false;
        }
    };
    if !ctx.state.spend_resources(&cost) {
        return false;
    }
    let Some(count) = ctx.state.purchase_upgrade(id) else {
        return false;
    };
    apply_effects(ctx, def, count);
    tracing::debug!(upgrade = id, count, "upgrade purchased");
    true
}

/// Apply `def`'s effects for `purchase_count` purchases. Idempotent:
/// multiplier sources are replaced rather than stacked, unlocks never
/// re-lock, and eras only move forward. Capacity bonuses are folded in by
/// [`crate::building::refresh_capacities`].
pub fn apply_effects(ctx: &mut SimContext<'_>, def: &UpgradeDef, purchase_count: u32) {
    if purchase_count == 0 {
        return;
    }
    for effect in &def.effects {
        match effect {
            UpgradeEffect::Multiplier { stack, value } => {
                let value = match ctx.multipliers.stack_type(stack.as_str()) {
                    Some(StackType::Multiplicative) | None => value.powf(f64::from(purchase_count)),
                    Some(_) => value * f64::from(purchase_count),
                };
                ctx.multipliers.add_multiplier(
                    MultiplierSource::new(
                        stack.clone(),
                        source_id(def.id.as_str()),
                        value,
                        SourceType::Upgrade,
                    )
                    .from_content(def.id.as_str())
                    .named(def.name.as_str()),
                );
            }
            UpgradeEffect::UnlockBuilding { building } => {
                ctx.state.unlock_building(building.as_str());
            }
            UpgradeEffect::UnlockResource { resource } => {
                ctx.state.unlock_resource(resource.as_str());
            }
            UpgradeEffect::AdvanceEra { era } => {
                let order = ctx.state.catalogue().era_order();
                let target = order.iter().position(|e| e == era);
                let current = ctx
                    .state
                    .state()
                    .era
                    .as_ref()
                    .and_then(|e| order.iter().position(|x| x == e));
                match (target, current) {
                    (Some(t), Some(c)) if t <= c => {}
                    (Some(_), _) => ctx.state.set_era(era.clone()),
                    (None, _) => {
                        tracing::warn!(upgrade = %def.id, era = %era, "advance to unknown era ignored");
                    }
                }
            }
            UpgradeEffect::CapacityBonus { .. } => {}
        }
    }
}

/// Re-derive every purchased upgrade's effects from the state.
pub fn reapply_all(ctx: &mut SimContext<'_>) {
    let catalogue = ctx.state.catalogue().clone();
    for def in catalogue.upgrades() {
        let count = ctx
            .state
            .state()
            .upgrades
            .get(&def.id)
            .map_or(0, |u| u.purchase_count);
        apply_effects(ctx, def, count);
    }
}

/// Unlocked upgrades that can still be bought.
pub fn get_available_upgrades(ctx: &SimView<'_>) -> Vec<UpgradeInfo> {
    ctx.state
        .catalogue()
        .upgrades()
        .iter()
        .filter(|def| can_purchase_more(ctx, def))
        .map(|def| {
            let next_cost = upgrade_cost(ctx, def.id.as_str()).unwrap_or_default();
            UpgradeInfo {
                id: def.id.clone(),
                name: def.name.clone(),
                purchase_count: ctx
                    .state
                    .state()
                    .upgrades
                    .get(&def.id)
                    .map_or(0, |u| u.purchase_count),
                max_purchases: if def.repeatable {
                    def.max_purchases
                } else {
                    Some(1)
                },
                affordable: ctx.state.can_afford(&next_cost),
                next_cost,
            }
        })
        .collect()
}
