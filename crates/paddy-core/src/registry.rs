//! Content catalogue: the static definitions of resources, buildings,
//! upgrades, multiplier stacks, eras, and curve presets.
//!
//! Content is assembled with a [`CatalogueBuilder`] and frozen into an
//! immutable [`Catalogue`]. `build` checks referential integrity; under
//! [`EvalMode::Strict`] any issue rejects the catalogue, under
//! [`EvalMode::Lenient`] issues are logged and kept for inspection.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::EvalMode;
use crate::curve::{Curve, CurveRef};
use crate::id::{stacks, BuildingId, CurveId, EraId, ResourceId, StackId, UpgradeId};
use crate::multiplier::StackDef;
use crate::unlock::{Requirement, UnlockRule};

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// A quantity of one resource (costs, batch inputs/outputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAmount {
    pub resource: ResourceId,
    pub amount: f64,
}

impl ResourceAmount {
    pub fn new(resource: impl Into<ResourceId>, amount: f64) -> Self {
        Self {
            resource: resource.into(),
            amount,
        }
    }
}

fn one() -> f64 {
    1.0
}

fn default_max_health() -> f64 {
    100.0
}

// ---------------------------------------------------------------------------
// Resources & eras
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub initial_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<f64>,
    /// Unlocked from the start.
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub unlock: UnlockRule,
}

impl ResourceDef {
    pub fn new(id: impl Into<ResourceId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            initial_amount: 0.0,
            max_capacity: None,
            unlocked: true,
            unlock: UnlockRule::default(),
        }
    }
}

/// An era. Catalogue order is progression order; the first era is where a
/// fresh game starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EraDef {
    pub id: EraId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unlock: UnlockRule,
}

// ---------------------------------------------------------------------------
// Production
// ---------------------------------------------------------------------------

/// A converter input consumed continuously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
    pub resource: ResourceId,
    /// Units per unit owned per `interval_seconds`.
    pub amount: f64,
    #[serde(default = "one")]
    pub interval_seconds: f64,
}

/// A continuous output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDef {
    pub resource: ResourceId,
    /// Units per unit owned per `interval_seconds`; evaluated with
    /// `{owned: 0}` so a preset can stand in for a flat number.
    pub base_amount: CurveRef,
    #[serde(default = "one")]
    pub interval_seconds: f64,
    /// Per-tick success probability. Absent means always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chance: Option<f64>,
}

/// Trip-based production: whole cycles every `interval_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDef {
    pub interval_ms: f64,
    /// Stack whose value divides the interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_stack_id: Option<StackId>,
    #[serde(default)]
    pub inputs: Vec<ResourceAmount>,
    pub outputs: Vec<ResourceAmount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProductionDef {
    Continuous {
        #[serde(default)]
        inputs: Vec<FlowDef>,
        outputs: Vec<OutputDef>,
    },
    Batch(BatchDef),
}

// ---------------------------------------------------------------------------
// Consumption
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDeath {
    /// Remove one unit; the rest return to full health.
    #[default]
    Remove,
    /// Stop producing until health regenerates to max.
    Disable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionEntry {
    pub resource: ResourceId,
    /// Units per unit owned per tick.
    pub amount_per_tick: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionDef {
    pub resources: Vec<ConsumptionEntry>,
    #[serde(default = "one")]
    pub health_loss_per_missing: f64,
    #[serde(default = "default_max_health")]
    pub max_health: f64,
    #[serde(default)]
    pub on_death: OnDeath,
}

// ---------------------------------------------------------------------------
// Building effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpecialEffect {
    /// Each unit owned boosts the target building's amount stack.
    Synergy {
        target_building: BuildingId,
        bonus_per_unit: f64,
    },
    /// Each unit owned raises a resource's storage cap.
    Storage {
        resource: ResourceId,
        capacity_per_unit: f64,
    },
}

/// Each unit owned pushes `bonus_per_unit` into `stack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingEffect {
    pub stack: StackId,
    pub bonus_per_unit: f64,
}

// ---------------------------------------------------------------------------
// Buildings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingDef {
    pub id: BuildingId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_cost: Vec<ResourceAmount>,
    /// Price of every unit after the first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsequent_cost: Option<Vec<ResourceAmount>>,
    #[serde(default)]
    pub cost_curve: CurveRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_owned: Option<u32>,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub unlock: UnlockRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production: Option<ProductionDef>,
    /// Stack scaling this building's outputs; synergies target it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_stack_id: Option<StackId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<ConsumptionDef>,
    #[serde(default)]
    pub special_effects: Vec<SpecialEffect>,
    #[serde(default)]
    pub effects: Vec<BuildingEffect>,
    /// Initial batch throttle in `[0, 1]`.
    #[serde(default = "one")]
    pub resource_limit: f64,
}

impl BuildingDef {
    pub fn new(id: impl Into<BuildingId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            base_cost: Vec::new(),
            subsequent_cost: None,
            cost_curve: CurveRef::default(),
            max_owned: None,
            unlocked: true,
            unlock: UnlockRule::default(),
            production: None,
            amount_stack_id: None,
            consumption: None,
            special_effects: Vec::new(),
            effects: Vec::new(),
            resource_limit: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Upgrades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpgradeEffect {
    /// Source `upgrade:<id>` in `stack`.
    Multiplier { stack: StackId, value: f64 },
    UnlockBuilding { building: BuildingId },
    UnlockResource { resource: ResourceId },
    AdvanceEra { era: EraId },
    CapacityBonus { resource: ResourceId, amount: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeDef {
    pub id: UpgradeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cost: Vec<ResourceAmount>,
    /// Scales the cost by `{owned: purchase_count}` for repeatables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_curve: Option<CurveRef>,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_purchases: Option<u32>,
    #[serde(default)]
    pub effects: Vec<UpgradeEffect>,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub unlock: UnlockRule,
}

impl UpgradeDef {
    pub fn new(id: impl Into<UpgradeId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            cost: Vec::new(),
            cost_curve: None,
            repeatable: false,
            max_purchases: None,
            effects: Vec::new(),
            unlocked: true,
            unlock: UnlockRule::default(),
        }
    }

    /// Purchases allowed in total.
    pub fn purchase_limit(&self) -> u32 {
        if self.repeatable {
            self.max_purchases.unwrap_or(u32::MAX)
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Validation issues
// ---------------------------------------------------------------------------

/// A referential-integrity or sanity problem found in content.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("{owner}: unknown stack '{stack}'")]
    UnknownStack { owner: String, stack: StackId },
    #[error("{owner}: unknown curve preset '{curve}'")]
    UnknownCurve { owner: String, curve: CurveId },
    #[error("{owner}: malformed formula: {error}")]
    MalformedFormula { owner: String, error: String },
    #[error("{owner}: unknown resource '{resource}'")]
    UnknownResource { owner: String, resource: ResourceId },
    #[error("{owner}: unknown building '{building}'")]
    UnknownBuilding { owner: String, building: BuildingId },
    #[error("{owner}: unknown upgrade '{upgrade}'")]
    UnknownUpgrade { owner: String, upgrade: UpgradeId },
    #[error("{owner}: unknown era '{era}'")]
    UnknownEra { owner: String, era: EraId },
    #[error("{owner}: synergy target '{target}' has no amount stack")]
    TargetWithoutStack { owner: String, target: BuildingId },
    #[error("{owner}: {message}")]
    InvalidValue { owner: String, message: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate {kind} id '{id}'")]
    Duplicate { kind: &'static str, id: String },
    #[error("catalogue failed validation with {} issue(s)", .0.len())]
    Invalid(Vec<ValidationIssue>),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects content definitions before freezing them into a [`Catalogue`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueBuilder {
    pub resources: Vec<ResourceDef>,
    pub buildings: Vec<BuildingDef>,
    pub upgrades: Vec<UpgradeDef>,
    pub stacks: Vec<StackDef>,
    pub eras: Vec<EraDef>,
    pub curves: HashMap<CurveId, Curve>,
}

impl CatalogueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, def: ResourceDef) -> Self {
        self.resources.push(def);
        self
    }

    pub fn building(mut self, def: BuildingDef) -> Self {
        self.buildings.push(def);
        self
    }

    pub fn upgrade(mut self, def: UpgradeDef) -> Self {
        self.upgrades.push(def);
        self
    }

    pub fn stack(mut self, def: StackDef) -> Self {
        self.stacks.push(def);
        self
    }

    pub fn era(mut self, def: EraDef) -> Self {
        self.eras.push(def);
        self
    }

    pub fn curve(mut self, id: impl Into<CurveId>, curve: Curve) -> Self {
        self.curves.insert(id.into(), curve);
        self
    }

    /// Merge another builder's definitions into this one (content packs).
    pub fn extend(&mut self, other: CatalogueBuilder) {
        self.resources.extend(other.resources);
        self.buildings.extend(other.buildings);
        self.upgrades.extend(other.upgrades);
        self.stacks.extend(other.stacks);
        self.eras.extend(other.eras);
        self.curves.extend(other.curves);
    }

    /// Freeze the definitions.
    ///
    /// Duplicate ids are always an error. Referential issues are an error
    /// under [`EvalMode::Strict`] and a logged warning otherwise.
    pub fn build(mut self, mode: EvalMode) -> Result<Catalogue, RegistryError> {
        for id in [stacks::ALL_PRODUCTION, stacks::BUILDING_COST] {
            if !self.stacks.iter().any(|s| s.id.as_str() == id) {
                self.stacks.push(StackDef::multiplicative(id));
            }
        }

        let resource_index = index_of("resource", &self.resources, |d| d.id.as_str())?;
        let building_index = index_of("building", &self.buildings, |d| d.id.as_str())?;
        let upgrade_index = index_of("upgrade", &self.upgrades, |d| d.id.as_str())?;
        let stack_index = index_of("stack", &self.stacks, |d| d.id.as_str())?;
        let era_index = index_of("era", &self.eras, |d| d.id.as_str())?;

        let mut catalogue = Catalogue {
            resources: self.resources,
            buildings: self.buildings,
            upgrades: self.upgrades,
            stacks: self.stacks,
            eras: self.eras,
            curves: self.curves,
            resource_index,
            building_index,
            upgrade_index,
            stack_index,
            era_index,
            issues: Vec::new(),
        };

        let issues = validate(&catalogue);
        if !issues.is_empty() {
            match mode {
                EvalMode::Strict => return Err(RegistryError::Invalid(issues)),
                EvalMode::Lenient => {
                    for issue in &issues {
                        tracing::warn!(%issue, "content validation issue");
                    }
                }
            }
        }
        catalogue.issues = issues;
        Ok(catalogue)
    }
}

fn index_of<T, K>(
    kind: &'static str,
    items: &[T],
    key: impl Fn(&T) -> &str,
) -> Result<HashMap<K, usize>, RegistryError>
where
    K: From<String> + std::hash::Hash + Eq,
{
    let mut seen = HashSet::new();
    let mut index = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        let id = key(item);
        if !seen.insert(id.to_string()) {
            return Err(RegistryError::Duplicate {
                kind,
                id: id.to_string(),
            });
        }
        index.insert(K::from(id.to_string()), i);
    }
    Ok(index)
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

/// Immutable content catalogue. Iteration follows declaration order.
#[derive(Debug, Clone)]
pub struct Catalogue {
    resources: Vec<ResourceDef>,
    buildings: Vec<BuildingDef>,
    upgrades: Vec<UpgradeDef>,
    stacks: Vec<StackDef>,
    eras: Vec<EraDef>,
    curves: HashMap<CurveId, Curve>,
    resource_index: HashMap<ResourceId, usize>,
    building_index: HashMap<BuildingId, usize>,
    upgrade_index: HashMap<UpgradeId, usize>,
    stack_index: HashMap<StackId, usize>,
    era_index: HashMap<EraId, usize>,
    issues: Vec<ValidationIssue>,
}

impl Catalogue {
    pub fn resource(&self, id: &str) -> Option<&ResourceDef> {
        self.resource_index.get(id).map(|&i| &self.resources[i])
    }

    pub fn building(&self, id: &str) -> Option<&BuildingDef> {
        self.building_index.get(id).map(|&i| &self.buildings[i])
    }

    pub fn upgrade(&self, id: &str) -> Option<&UpgradeDef> {
        self.upgrade_index.get(id).map(|&i| &self.upgrades[i])
    }

    pub fn stack(&self, id: &str) -> Option<&StackDef> {
        self.stack_index.get(id).map(|&i| &self.stacks[i])
    }

    pub fn era(&self, id: &str) -> Option<&EraDef> {
        self.era_index.get(id).map(|&i| &self.eras[i])
    }

    pub fn resources(&self) -> &[ResourceDef] {
        &self.resources
    }

    pub fn buildings(&self) -> &[BuildingDef] {
        &self.buildings
    }

    pub fn upgrades(&self) -> &[UpgradeDef] {
        &self.upgrades
    }

    pub fn stacks(&self) -> &[StackDef] {
        &self.stacks
    }

    pub fn eras(&self) -> &[EraDef] {
        &self.eras
    }

    pub fn curves(&self) -> &HashMap<CurveId, Curve> {
        &self.curves
    }

    /// Era ids in progression order.
    pub fn era_order(&self) -> Vec<EraId> {
        self.eras.iter().map(|e| e.id.clone()).collect()
    }

    pub fn first_era(&self) -> Option<&EraId> {
        self.eras.first().map(|e| &e.id)
    }

    /// Issues found at build time (always empty for strict catalogues).
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

struct Checker<'a> {
    catalogue: &'a Catalogue,
    issues: Vec<ValidationIssue>,
}

impl Checker<'_> {
    fn resource(&mut self, owner: &str, id: &ResourceId) {
        if self.catalogue.resource(id.as_str()).is_none() {
            self.issues.push(ValidationIssue::UnknownResource {
                owner: owner.to_string(),
                resource: id.clone(),
            });
        }
    }

    fn amounts(&mut self, owner: &str, amounts: &[ResourceAmount]) {
        for a in amounts {
            self.resource(owner, &a.resource);
        }
    }

    fn stack(&mut self, owner: &str, id: &StackId) {
        if self.catalogue.stack(id.as_str()).is_none() {
            self.issues.push(ValidationIssue::UnknownStack {
                owner: owner.to_string(),
                stack: id.clone(),
            });
        }
    }

    fn building(&mut self, owner: &str, id: &BuildingId) {
        if self.catalogue.building(id.as_str()).is_none() {
            self.issues.push(ValidationIssue::UnknownBuilding {
                owner: owner.to_string(),
                building: id.clone(),
            });
        }
    }

    fn era(&mut self, owner: &str, id: &EraId) {
        if self.catalogue.era(id.as_str()).is_none() {
            self.issues.push(ValidationIssue::UnknownEra {
                owner: owner.to_string(),
                era: id.clone(),
            });
        }
    }

    fn curve_ref(&mut self, owner: &str, curve: &CurveRef) {
        match curve {
            CurveRef::Literal(_) => {}
            CurveRef::Preset(id) => {
                if !self.catalogue.curves.contains_key(id) {
                    self.issues.push(ValidationIssue::UnknownCurve {
                        owner: owner.to_string(),
                        curve: id.clone(),
                    });
                }
            }
            CurveRef::Inline(c) => self.curve(owner, c),
        }
    }

    fn curve(&mut self, owner: &str, curve: &Curve) {
        match curve {
            Curve::Formula { expression } => {
                if let Some(err) = expression.parse_error() {
                    self.issues.push(ValidationIssue::MalformedFormula {
                        owner: owner.to_string(),
                        error: err.to_string(),
                    });
                }
            }
            Curve::Compound { curves, .. } => {
                for child in curves {
                    self.curve_ref(owner, child);
                }
            }
            _ => {}
        }
    }

    fn rule(&mut self, owner: &str, rule: &UnlockRule) {
        if let Some(era) = &rule.era {
            self.era(owner, era);
        }
        for req in &rule.requirements {
            match req {
                Requirement::LifetimeResource { resource, .. }
                | Requirement::Resource { resource, .. } => self.resource(owner, resource),
                Requirement::BuildingOwned { building, .. } => self.building(owner, building),
                Requirement::UpgradePurchased { upgrade } => {
                    if self.catalogue.upgrade(upgrade.as_str()).is_none() {
                        self.issues.push(ValidationIssue::UnknownUpgrade {
                            owner: owner.to_string(),
                            upgrade: upgrade.clone(),
                        });
                    }
                }
                Requirement::EraReached { era } => self.era(owner, era),
            }
        }
    }

    fn invalid(&mut self, owner: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue::InvalidValue {
            owner: owner.to_string(),
            message: message.into(),
        });
    }
}

/// Check every cross-reference in the catalogue.
pub fn validate(catalogue: &Catalogue) -> Vec<ValidationIssue> {
    let mut c = Checker {
        catalogue,
        issues: Vec::new(),
    };

    let mut preset_ids: Vec<_> = catalogue.curves.keys().collect();
    preset_ids.sort();
    for id in preset_ids {
        let owner = format!("curve {id}");
        c.curve(&owner, &catalogue.curves[id]);
    }

    for def in &catalogue.resources {
        let owner = format!("resource {}", def.id);
        c.rule(&owner, &def.unlock);
        if def.max_capacity.is_some_and(|cap| cap < 0.0) {
            c.invalid(&owner, "negative max_capacity");
        }
    }

    for def in &catalogue.eras {
        c.rule(&format!("era {}", def.id), &def.unlock);
    }

    for def in &catalogue.buildings {
        let owner = format!("building {}", def.id);
        c.amounts(&owner, &def.base_cost);
        if let Some(sub) = &def.subsequent_cost {
            c.amounts(&owner, sub);
        }
        c.curve_ref(&owner, &def.cost_curve);
        c.rule(&owner, &def.unlock);
        if let Some(stack) = &def.amount_stack_id {
            c.stack(&owner, stack);
        }
        if !(0.0..=1.0).contains(&def.resource_limit) {
            c.invalid(&owner, "resource_limit outside [0, 1]");
        }
        match &def.production {
            Some(ProductionDef::Continuous { inputs, outputs }) => {
                for input in inputs {
                    c.resource(&owner, &input.resource);
                    if input.interval_seconds <= 0.0 {
                        c.invalid(&owner, "input interval_seconds must be positive");
                    }
                }
                for output in outputs {
                    c.resource(&owner, &output.resource);
                    c.curve_ref(&owner, &output.base_amount);
                    if output.interval_seconds <= 0.0 {
                        c.invalid(&owner, "output interval_seconds must be positive");
                    }
                }
            }
            Some(ProductionDef::Batch(batch)) => {
                c.amounts(&owner, &batch.inputs);
                c.amounts(&owner, &batch.outputs);
                if let Some(stack) = &batch.speed_stack_id {
                    c.stack(&owner, stack);
                }
                if batch.interval_ms <= 0.0 {
                    c.invalid(&owner, "batch interval_ms must be positive");
                }
            }
            None => {}
        }
        if let Some(consumption) = &def.consumption {
            for entry in &consumption.resources {
                c.resource(&owner, &entry.resource);
            }
            if consumption.max_health <= 0.0 {
                c.invalid(&owner, "max_health must be positive");
            }
        }
        for effect in &def.special_effects {
            match effect {
                SpecialEffect::Synergy {
                    target_building, ..
                } => match catalogue.building(target_building.as_str()) {
                    None => c.building(&owner, target_building),
                    Some(target) if target.amount_stack_id.is_none() => {
                        c.issues.push(ValidationIssue::TargetWithoutStack {
                            owner: owner.clone(),
                            target: target_building.clone(),
                        })
                    }
                    Some(_) => {}
                },
                SpecialEffect::Storage { resource, .. } => c.resource(&owner, resource),
            }
        }
        for effect in &def.effects {
            c.stack(&owner, &effect.stack);
        }
    }

    for def in &catalogue.upgrades {
        let owner = format!("upgrade {}", def.id);
        c.amounts(&owner, &def.cost);
        if let Some(curve) = &def.cost_curve {
            c.curve_ref(&owner, curve);
        }
        c.rule(&owner, &def.unlock);
        for effect in &def.effects {
            match effect {
                UpgradeEffect::Multiplier { stack, .. } => c.stack(&owner, stack),
                UpgradeEffect::UnlockBuilding { building } => c.building(&owner, building),
                UpgradeEffect::UnlockResource { resource }
                | UpgradeEffect::CapacityBonus { resource, .. } => c.resource(&owner, resource),
                UpgradeEffect::AdvanceEra { era } => c.era(&owner, era),
            }
        }
    }

    c.issues
}

// ===========================================================================
// Tests
// ===========================================================================
