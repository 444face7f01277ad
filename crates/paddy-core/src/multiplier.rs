//! Multiplier stacks.
//!
//! A stack folds many named sources into one effective factor. Values are
//! resolved eagerly on every mutation and cached, so [`MultiplierSystem::get_value`]
//! is a map lookup; stacks whose resolved value actually changed are
//! recorded in a dirty set that the engine drains with
//! [`MultiplierSystem::take_changed`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::condition::{Condition, ConditionContext};
use crate::id::{SourceId, StackId};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackType {
    /// `base + Σ v`
    Additive,
    /// `base × Π v`
    Multiplicative,
    /// `1 − (1 − base) × Π (1 − v)`: each source takes a share of the
    /// remaining headroom.
    Diminishing,
}

impl StackType {
    /// Base value used when a definition does not declare one.
    pub fn default_base(self) -> f64 {
        match self {
            StackType::Multiplicative => 1.0,
            StackType::Additive | StackType::Diminishing => 0.0,
        }
    }
}

/// Content definition of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDef {
    pub id: StackId,
    pub stack_type: StackType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl StackDef {
    pub fn new(id: impl Into<StackId>, stack_type: StackType) -> Self {
        Self {
            id: id.into(),
            stack_type,
            base_value: None,
            min_value: None,
            max_value: None,
        }
    }

    pub fn multiplicative(id: impl Into<StackId>) -> Self {
        Self::new(id, StackType::Multiplicative)
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn base(&self) -> f64 {
        self.base_value
            .unwrap_or_else(|| self.stack_type.default_base())
    }

    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(min) = self.min_value {
            v = v.max(min);
        }
        if let Some(max) = self.max_value {
            v = v.min(max);
        }
        v
    }
}

/// Where a multiplier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Building,
    Upgrade,
    Synergy,
    Effect,
    Event,
    Prestige,
    Other,
}

/// One contribution to a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierSource {
    pub id: SourceId,
    pub stack: StackId,
    pub value: f64,
    pub source_type: SourceType,
    /// Content id of the originating building/upgrade/..., if any.
    #[serde(default)]
    pub source_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Absolute expiry in ms. Presence makes the source temporary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl MultiplierSource {
    pub fn new(
        stack: impl Into<StackId>,
        id: impl Into<SourceId>,
        value: f64,
        source_type: SourceType,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            stack: stack.into(),
            value,
            source_type,
            source_id: String::new(),
            expires_at: None,
            condition: None,
        }
    }

    pub fn from_content(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn expiring_at(mut self, at_ms: u64) -> Self {
        self.expires_at = Some(at_ms);
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn is_temporary(&self) -> bool {
        self.expires_at.is_some()
    }

    fn is_active(&self, ctx: &ConditionContext) -> bool {
        self.condition.as_ref().is_none_or(|c| c.evaluate(ctx))
    }
}

// ---------------------------------------------------------------------------
// Breakdown (display)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceBreakdown {
    pub id: SourceId,
    pub name: String,
    pub source_type: SourceType,
    pub value: f64,
    /// `false` when the source's condition currently fails.
    pub active: bool,
    pub expires_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackBreakdown {
    pub stack: StackId,
    pub stack_type: StackType,
    pub base_value: f64,
    pub value: f64,
    pub sources: Vec<SourceBreakdown>,
}

// ---------------------------------------------------------------------------
// MultiplierSystem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Stack {
    def: StackDef,
    sources: BTreeMap<SourceId, MultiplierSource>,
    value: f64,
}

impl Stack {
    fn new(def: StackDef) -> Self {
        let value = def.clamp(def.base());
        Self {
            def,
            sources: BTreeMap::new(),
            value,
        }
    }

    fn resolve(&self, ctx: &ConditionContext) -> f64 {
        let base = self.def.base();
        let active = self.sources.values().filter(|s| s.is_active(ctx));
        let raw = match self.def.stack_type {
            StackType::Additive => base + active.map(|s| s.value).sum::<f64>(),
            StackType::Multiplicative => active.fold(base, |acc, s| acc * s.value),
            StackType::Diminishing => {
                1.0 - active.fold(1.0 - base, |acc, s| acc * (1.0 - s.value))
            }
        };
        self.def.clamp(raw)
    }

    fn has_conditions(&self) -> bool {
        self.sources.values().any(|s| s.condition.is_some())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiplierSystem {
    stacks: BTreeMap<StackId, Stack>,
    context: ConditionContext,
    changed: BTreeSet<StackId>,
}

impl MultiplierSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or redefine) a stack. Existing sources are kept.
    pub fn register_stack(&mut self, def: StackDef) {
        let id = def.id.clone();
        let sources = self
            .stacks
            .remove(&id)
            .map(|s| s.sources)
            .unwrap_or_default();
        let mut stack = Stack::new(def);
        stack.sources = sources;
        stack.value = stack.resolve(&self.context);
        self.stacks.insert(id.clone(), stack);
        self.changed.insert(id);
    }

    pub fn has_stack(&self, stack: &str) -> bool {
        self.stacks.contains_key(stack)
    }

    pub fn stack_def(&self, stack: &str) -> Option<&StackDef> {
        self.stacks.get(stack).map(|s| &s.def)
    }

    pub fn stack_type(&self, stack: &str) -> Option<StackType> {
        self.stack_def(stack).map(|d| d.stack_type)
    }

    /// Insert or replace the source keyed by `(source.stack, source.id)`.
    /// Returns `false` (and drops the source) when the stack is unknown.
    pub fn add_multiplier(&mut self, source: MultiplierSource) -> bool {
        let stack_id = source.stack.clone();
        let Some(stack) = self.stacks.get_mut(&stack_id) else {
            tracing::warn!(
                stack = %source.stack,
                source = %source.id,
                "multiplier source targets an unknown stack; ignored"
            );
            return false;
        };
        stack.sources.insert(source.id.clone(), source);
        self.refresh(stack_id.as_str());
        true
    }

    /// Remove a source. Returns `false` if it was not present.
    pub fn remove_multiplier(&mut self, stack: &str, source: &str) -> bool {
        let Some(s) = self.stacks.get_mut(stack) else {
            return false;
        };
        if s.sources.remove(source).is_none() {
            return false;
        }
        self.refresh(stack);
        true
    }

    /// Resolved stack value. Unknown stacks are neutral (1.0).
    pub fn get_value(&self, stack: &str) -> f64 {
        match self.stacks.get(stack) {
            Some(s) => s.value,
            None => {
                tracing::debug!(stack, "value requested for unknown stack");
                1.0
            }
        }
    }

    pub fn get_source(&self, stack: &str, source: &str) -> Option<&MultiplierSource> {
        self.stacks.get(stack)?.sources.get(source)
    }

    pub fn get_stack_breakdown(&self, stack: &str) -> Option<StackBreakdown> {
        let s = self.stacks.get(stack)?;
        Some(StackBreakdown {
            stack: s.def.id.clone(),
            stack_type: s.def.stack_type,
            base_value: s.def.base(),
            value: s.value,
            sources: s
                .sources
                .values()
                .map(|src| SourceBreakdown {
                    id: src.id.clone(),
                    name: src.name.clone(),
                    source_type: src.source_type,
                    value: src.value,
                    active: src.is_active(&self.context),
                    expires_at: src.expires_at,
                })
                .collect(),
        })
    }

    /// Drop every temporary source whose expiry is at or before `now_ms`.
    pub fn process_expired_multipliers(&mut self, now_ms: u64) -> Vec<(StackId, SourceId)> {
        let mut expired = Vec::new();
        for (stack_id, stack) in &mut self.stacks {
            stack.sources.retain(|id, src| {
                let keep = src.expires_at.is_none_or(|at| at > now_ms);
                if !keep {
                    expired.push((stack_id.clone(), id.clone()));
                }
                keep
            });
        }
        let touched: BTreeSet<StackId> = expired.iter().map(|(s, _)| s.clone()).collect();
        for stack in touched {
            self.refresh(stack.as_str());
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), now_ms, "expired multipliers removed");
        }
        expired
    }

    /// Replace the condition context and re-resolve stacks with
    /// conditional sources.
    pub fn set_condition_context(&mut self, ctx: ConditionContext) {
        if ctx == self.context {
            return;
        }
        self.context = ctx;
        let conditional: Vec<StackId> = self
            .stacks
            .iter()
            .filter(|(_, s)| s.has_conditions())
            .map(|(id, _)| id.clone())
            .collect();
        for stack in conditional {
            self.refresh(stack.as_str());
        }
    }

    pub fn condition_context(&self) -> &ConditionContext {
        &self.context
    }

    /// Remove every source from every stack (stack definitions are kept).
    pub fn clear_sources(&mut self) {
        let ids: Vec<StackId> = self.stacks.keys().cloned().collect();
        for id in ids {
            if let Some(s) = self.stacks.get_mut(&id) {
                s.sources.clear();
            }
            self.refresh(id.as_str());
        }
    }

    /// Drain the set of stacks whose resolved value changed.
    pub fn take_changed(&mut self) -> BTreeSet<StackId> {
        std::mem::take(&mut self.changed)
    }

    pub fn stack_ids(&self) -> impl Iterator<Item = &StackId> {
        self.stacks.keys()
    }

    fn refresh(&mut self, stack: &str) {
        let Some(s) = self.stacks.get_mut(stack) else {
            return;
        };
        let value = s.resolve(&self.context);
        if value.to_bits() != s.value.to_bits() {
            s.value = value;
            self.changed.insert(s.def.id.clone());
        }
    }
}
