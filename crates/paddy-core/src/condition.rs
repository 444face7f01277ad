//! Activation conditions for multiplier sources.
//!
//! A [`Condition`] is a closed tagged union: each kind carries only the
//! fields it needs, and composition is explicit through `All` / `Any` /
//! `Not`. Conditions are evaluated against a [`ConditionContext`] that the
//! engine refreshes whenever resources, buildings, upgrades, era, prestige,
//! or the hour of day change.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::id::{BuildingId, EraId, ResourceId, UpgradeId};

/// Comparison operator for conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Ne,
}

impl ComparisonOp {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            ComparisonOp::Gt => left > right,
            ComparisonOp::Lt => left < right,
            ComparisonOp::Eq => left == right,
            ComparisonOp::Gte => left >= right,
            ComparisonOp::Lte => left <= right,
            ComparisonOp::Ne => left != right,
        }
    }
}

fn gte() -> ComparisonOp {
    ComparisonOp::Gte
}

/// A predicate over game state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a resource's current amount.
    Resource {
        resource: ResourceId,
        #[serde(default = "gte")]
        op: ComparisonOp,
        amount: f64,
    },
    /// Compare a building's owned count.
    Building {
        building: BuildingId,
        #[serde(default = "gte")]
        op: ComparisonOp,
        count: u32,
    },
    /// An upgrade has been purchased.
    Upgrade { upgrade: UpgradeId },
    /// Compare the current era's position in the era order.
    Era {
        #[serde(default = "gte")]
        op: ComparisonOp,
        era: EraId,
    },
    Prestige {
        #[serde(default = "gte")]
        op: ComparisonOp,
        level: u32,
    },
    /// Hour of day in `[from_hour, to_hour)`; wraps past midnight when
    /// `from_hour > to_hour`.
    TimeOfDay { from_hour: u8, to_hour: u8 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

/// Snapshot of the state conditions are evaluated against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionContext {
    pub resources: BTreeMap<ResourceId, f64>,
    pub buildings: BTreeMap<BuildingId, u32>,
    pub upgrades: BTreeSet<UpgradeId>,
    pub era: Option<EraId>,
    /// All eras in progression order.
    pub era_order: Vec<EraId>,
    pub prestige_level: u32,
    pub hour_of_day: u8,
}

impl ConditionContext {
    fn era_index(&self, era: &EraId) -> Option<usize> {
        self.era_order.iter().position(|e| e == era)
    }
}

impl Condition {
    /// Evaluate the condition. Unknown ids compare as zero / absent.
    pub fn evaluate(&self, ctx: &ConditionContext) -> bool {
        match self {
            Condition::Resource {
                resource,
                op,
                amount,
            } => {
                let current = ctx.resources.get(resource).copied().unwrap_or(0.0);
                op.compare(current, *amount)
            }
            Condition::Building {
                building,
                op,
                count,
            } => {
                let owned = ctx.buildings.get(building).copied().unwrap_or(0);
                op.compare(f64::from(owned), f64::from(*count))
            }
            Condition::Upgrade { upgrade } => ctx.upgrades.contains(upgrade),
            Condition::Era { op, era } => {
                let Some(target) = ctx.era_index(era) else {
                    return false;
                };
                let current = ctx
                    .era
                    .as_ref()
                    .and_then(|e| ctx.era_index(e))
                    .unwrap_or(0);
                op.compare(current as f64, target as f64)
            }
            Condition::Prestige { op, level } => {
                op.compare(f64::from(ctx.prestige_level), f64::from(*level))
            }
            Condition::TimeOfDay { from_hour, to_hour } => {
                let h = ctx.hour_of_day;
                if from_hour <= to_hour {
                    h >= *from_hour && h < *to_hour
                } else {
                    h >= *from_hour || h < *to_hour
                }
            }
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(ctx)),
            Condition::Not { condition } => !condition.evaluate(ctx),
        }
    }
}

/// Hour of day (UTC) for a millisecond timestamp.
pub fn hour_of_day(now_ms: u64) -> u8 {
    ((now_ms / 3_600_000) % 24) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConditionContext {
        let mut c = ConditionContext {
            era_order: vec![EraId::from("village"), EraId::from("town"), EraId::from("city")],
            era: Some(EraId::from("town")),
            prestige_level: 2,
            hour_of_day: 22,
            ..Default::default()
        };
        c.resources.insert(ResourceId::from("rice"), 120.0);
        c.buildings.insert(BuildingId::from("paddy_field"), 3);
        c.upgrades.insert(UpgradeId::from("iron_plough"));
        c
    }

    #[test]
    fn leaf_conditions() {
        let c = ctx();
        assert!(Condition::Resource { resource: "rice".into(), op: ComparisonOp::Gte, amount: 100.0 }.evaluate(&c));
        assert!(!Condition::Resource { resource: "water".into(), op: ComparisonOp::Gt, amount: 0.0 }.evaluate(&c));
        assert!(Condition::Building { building: "paddy_field".into(), op: ComparisonOp::Eq, count: 3 }.evaluate(&c));
        assert!(Condition::Upgrade { upgrade: "iron_plough".into() }.evaluate(&c));
        assert!(!Condition::Upgrade { upgrade: "sickle".into() }.evaluate(&c));
        assert!(Condition::Prestige { op: ComparisonOp::Gte, level: 2 }.evaluate(&c));
    }

    #[test]
    fn era_compares_by_progression_order() {
        let c = ctx();
        assert!(Condition::Era { op: ComparisonOp::Gte, era: "village".into() }.evaluate(&c));
        assert!(Condition::Era { op: ComparisonOp::Gte, era: "town".into() }.evaluate(&c));
        assert!(!Condition::Era { op: ComparisonOp::Gte, era: "city".into() }.evaluate(&c));
        assert!(!Condition::Era { op: ComparisonOp::Gte, era: "unknown".into() }.evaluate(&c));
    }

    #[test]
    fn time_of_day_wraps_midnight() {
        let mut c = ctx();
        let night = Condition::TimeOfDay { from_hour: 20, to_hour: 6 };
        assert!(night.evaluate(&c));
        c.hour_of_day = 3;
        assert!(night.evaluate(&c));
        c.hour_of_day = 12;
        assert!(!night.evaluate(&c));
        let day = Condition::TimeOfDay { from_hour: 6, to_hour: 18 };
        assert!(day.evaluate(&c));
    }

    #[test]
    fn composition() {
        let c = ctx();
        let yes = Condition::Upgrade { upgrade: "iron_plough".into() };
        let no = Condition::Upgrade { upgrade: "sickle".into() };
        assert!(!Condition::All { conditions: vec![yes.clone(), no.clone()] }.evaluate(&c));
        assert!(Condition::Any { conditions: vec![yes.clone(), no.clone()] }.evaluate(&c));
        assert!(Condition::Not { condition: Box::new(no) }.evaluate(&c));
        assert!(Condition::All { conditions: vec![] }.evaluate(&c));
    }

    #[test]
    fn hour_of_day_from_timestamp() {
        assert_eq!(hour_of_day(0), 0);
        assert_eq!(hour_of_day(3_600_000 * 25 + 5), 1);
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let json = r#"{"type":"all","conditions":[
            {"type":"resource","resource":"rice","amount":10},
            {"type":"not","condition":{"type":"upgrade","upgrade":"sickle"}}
        ]}"#;
        let cond: Condition = serde_json::from_str(json).unwrap();
        assert!(cond.evaluate(&ctx()));
    }
}
