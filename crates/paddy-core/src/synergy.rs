//! Cross-building bonuses.
//!
//! Synergies (`special_effects: synergy`) and scaling effects (`effects`)
//! are resolved once from the catalogue into [`SynergyDefinition`]s. When a
//! building's owned count changes, only the definitions sourced from that
//! building are recomputed and upserted into the [`MultiplierSystem`].
//! Multipliers are not persisted, so [`SynergyProcessor::recompute_all`]
//! restores them after a load.

use std::collections::BTreeMap;

use crate::id::{BuildingId, SourceId, StackId};
use crate::multiplier::{MultiplierSource, MultiplierSystem, SourceType, StackType};
use crate::registry::{Catalogue, SpecialEffect};
use crate::state::GameState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynergyKind {
    /// Boosts another building's amount stack.
    Synergy,
    /// Pushes into an arbitrary stack.
    Effect,
}

/// A resolved `source building → target stack` bonus.
#[derive(Debug, Clone, PartialEq)]
pub struct SynergyDefinition {
    pub kind: SynergyKind,
    pub source: BuildingId,
    pub target_stack: StackId,
    pub bonus_per_unit: f64,
    /// `synergy:<source>:<target>` or `effect:<source>:<stack>`.
    pub source_id: SourceId,
}

/// Value pushed for `owned` units, by the target stack's combination rule.
pub fn synergy_value(stack_type: StackType, owned: u32, bonus_per_unit: f64) -> f64 {
    let n = f64::from(owned);
    match stack_type {
        StackType::Multiplicative => 1.0 + n * bonus_per_unit,
        StackType::Additive => n * bonus_per_unit,
        StackType::Diminishing => 1.0 - (1.0 - bonus_per_unit).powf(n),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SynergyProcessor {
    definitions: Vec<SynergyDefinition>,
    by_source: BTreeMap<BuildingId, Vec<usize>>,
}

impl SynergyProcessor {
    /// Resolve every synergy and effect in the catalogue. Unresolvable
    /// targets are logged and skipped.
    pub fn analyze(catalogue: &Catalogue) -> Self {
        let mut processor = Self::default();
        for def in catalogue.buildings() {
            for effect in &def.special_effects {
                let SpecialEffect::Synergy {
                    target_building,
                    bonus_per_unit,
                } = effect
                else {
                    continue;
                };
                let Some(target) = catalogue.building(target_building.as_str()) else {
                    tracing::warn!(
                        source = %def.id,
                        target = %target_building,
                        "synergy target building does not exist; skipped"
                    );
                    continue;
                };
                let Some(stack) = target
                    .amount_stack_id
                    .as_ref()
                    .filter(|s| catalogue.stack(s.as_str()).is_some())
                else {
                    tracing::warn!(
                        source = %def.id,
                        target = %target_building,
                        "synergy target has no resolvable amount stack; skipped"
                    );
                    continue;
                };
                processor.push(SynergyDefinition {
                    kind: SynergyKind::Synergy,
                    source: def.id.clone(),
                    target_stack: stack.clone(),
                    bonus_per_unit: *bonus_per_unit,
                    source_id: SourceId::new(format!("synergy:{}:{}", def.id, target_building)),
                });
            }
            for effect in &def.effects {
                if catalogue.stack(effect.stack.as_str()).is_none() {
                    tracing::warn!(
                        source = %def.id,
                        stack = %effect.stack,
                        "building effect targets an unknown stack; skipped"
                    );
                    continue;
                }
                processor.push(SynergyDefinition {
                    kind: SynergyKind::Effect,
                    source: def.id.clone(),
                    target_stack: effect.stack.clone(),
                    bonus_per_unit: effect.bonus_per_unit,
                    source_id: SourceId::new(format!("effect:{}:{}", def.id, effect.stack)),
                });
            }
        }
        tracing::debug!(count = processor.definitions.len(), "synergies resolved");
        processor
    }

    fn push(&mut self, def: SynergyDefinition) {
        self.by_source
            .entry(def.source.clone())
            .or_default()
            .push(self.definitions.len());
        self.definitions.push(def);
    }

    pub fn definitions(&self) -> &[SynergyDefinition] {
        &self.definitions
    }

    /// Recompute the bonuses sourced from `building` now that it owns
    /// `owned` units. Zero units removes the sources outright.
    pub fn on_building_changed(&self, building: &str, owned: u32, multipliers: &mut MultiplierSystem) {
        let Some(indices) = self.by_source.get(building) else {
            return;
        };
        for &i in indices {
            let def = &self.definitions[i];
            if owned == 0 {
                multipliers.remove_multiplier(def.target_stack.as_str(), def.source_id.as_str());
                continue;
            }
            let stack_type = multipliers
                .stack_type(def.target_stack.as_str())
                .unwrap_or(StackType::Multiplicative);
            let source_type = match def.kind {
                SynergyKind::Synergy => SourceType::Synergy,
                SynergyKind::Effect => SourceType::Effect,
            };
            multipliers.add_multiplier(
                MultiplierSource::new(
                    def.target_stack.clone(),
                    def.source_id.clone(),
                    synergy_value(stack_type, owned, def.bonus_per_unit),
                    source_type,
                )
                .from_content(def.source.as_str()),
            );
        }
    }

    /// Recompute every definition from `state`.
    pub fn recompute_all(&self, state: &GameState, multipliers: &mut MultiplierSystem) {
        for source in self.by_source.keys() {
            self.on_building_changed(source.as_str(), state.owned(source.as_str()), multipliers);
        }
    }
}
