//! Declarative unlock requirements.
//!
//! [`UnlockEvaluator`] is a pure predicate over a [`GameState`]; the
//! building system decides when to run it and applies the results. Unlocks
//! are one-directional: nothing here ever re-locks content.

use serde::{Deserialize, Serialize};

use crate::id::{BuildingId, EraId, ResourceId, UpgradeId};
use crate::state::GameState;

/// A single requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    /// All-time gains of a resource reached `amount`.
    LifetimeResource { resource: ResourceId, amount: f64 },
    /// Current amount of a resource is at least `amount`.
    Resource { resource: ResourceId, amount: f64 },
    BuildingOwned { building: BuildingId, count: u32 },
    UpgradePurchased { upgrade: UpgradeId },
    /// The current era is `era` or later.
    EraReached { era: EraId },
}

/// Everything that must hold for a piece of content to unlock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnlockRule {
    /// Era gate, checked before the requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub era: Option<EraId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Requirement>,
}

impl UnlockRule {
    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn in_era(mut self, era: impl Into<EraId>) -> Self {
        self.era = Some(era.into());
        self
    }
}

/// Evaluates requirements against a state and the catalogue's era order.
#[derive(Debug, Clone, Copy)]
pub struct UnlockEvaluator<'a> {
    state: &'a GameState,
    era_order: &'a [EraId],
}

impl<'a> UnlockEvaluator<'a> {
    pub fn new(state: &'a GameState, era_order: &'a [EraId]) -> Self {
        Self { state, era_order }
    }

    fn era_index(&self, era: &EraId) -> Option<usize> {
        self.era_order.iter().position(|e| e == era)
    }

    /// Whether the current era is `era` or later. Unknown eras never count
    /// as reached.
    pub fn era_reached(&self, era: &EraId) -> bool {
        let Some(target) = self.era_index(era) else {
            return false;
        };
        self.state
            .era
            .as_ref()
            .and_then(|e| self.era_index(e))
            .is_some_and(|current| current >= target)
    }

    pub fn is_met(&self, requirement: &Requirement) -> bool {
        match requirement {
            Requirement::LifetimeResource { resource, amount } => self
                .state
                .resources
                .get(resource)
                .is_some_and(|r| r.lifetime >= *amount),
            Requirement::Resource { resource, amount } => self
                .state
                .resources
                .get(resource)
                .is_some_and(|r| r.current >= *amount),
            Requirement::BuildingOwned { building, count } => self
                .state
                .buildings
                .get(building)
                .is_some_and(|b| b.owned >= *count),
            Requirement::UpgradePurchased { upgrade } => self
                .state
                .upgrades
                .get(upgrade)
                .is_some_and(|u| u.purchased),
            Requirement::EraReached { era } => self.era_reached(era),
        }
    }

    /// Era gate first, then every requirement.
    pub fn rule_met(&self, rule: &UnlockRule) -> bool {
        if let Some(era) = &rule.era
            && !self.era_reached(era)
        {
            return false;
        }
        rule.requirements.iter().all(|r| self.is_met(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BuildingState, ResourceState, UpgradeState};

    fn eras() -> Vec<EraId> {
        vec!["village".into(), "town".into(), "city".into()]
    }

    fn state() -> GameState {
        let mut s = GameState::default();
        s.era = Some("town".into());
        s.resources.insert(
            "rice".into(),
            ResourceState {
                current: 20.0,
                lifetime: 500.0,
                ..Default::default()
            },
        );
        s.buildings.insert(
            "paddy_field".into(),
            BuildingState {
                owned: 4,
                ..Default::default()
            },
        );
        s.upgrades.insert(
            "sickle".into(),
            UpgradeState {
                purchased: true,
                purchase_count: 1,
                ..Default::default()
            },
        );
        s
    }

    #[test]
    fn requirements_read_state() {
        let s = state();
        let order = eras();
        let ev = UnlockEvaluator::new(&s, &order);
        assert!(ev.is_met(&Requirement::LifetimeResource { resource: "rice".into(), amount: 500.0 }));
        assert!(!ev.is_met(&Requirement::Resource { resource: "rice".into(), amount: 21.0 }));
        assert!(ev.is_met(&Requirement::BuildingOwned { building: "paddy_field".into(), count: 4 }));
        assert!(!ev.is_met(&Requirement::BuildingOwned { building: "buffalo".into(), count: 1 }));
        assert!(ev.is_met(&Requirement::UpgradePurchased { upgrade: "sickle".into() }));
        assert!(!ev.is_met(&Requirement::UpgradePurchased { upgrade: "plough".into() }));
    }

    #[test]
    fn era_gate_uses_progression_order() {
        let s = state();
        let order = eras();
        let ev = UnlockEvaluator::new(&s, &order);
        assert!(ev.era_reached(&"village".into()));
        assert!(ev.era_reached(&"town".into()));
        assert!(!ev.era_reached(&"city".into()));
        assert!(!ev.era_reached(&"atlantis".into()));

        let rule = UnlockRule::default()
            .in_era("city")
            .requires(Requirement::UpgradePurchased { upgrade: "sickle".into() });
        assert!(!ev.rule_met(&rule));
        assert!(ev.rule_met(&UnlockRule::default()));
    }
}
