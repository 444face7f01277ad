//! Desync tools: state comparison and determinism checking.
//!
//! Two engines fed the same state and the same inputs must stay
//! bit-identical. [`validate_determinism`] checks that tick by tick;
//! [`diff_states`] explains where two states disagree.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::game_loop::TickError;
use crate::registry::Catalogue;
use crate::state::GameState;

// ---------------------------------------------------------------------------
// State diff types
// ---------------------------------------------------------------------------

/// One disagreement between two states. Keys read `resource:<id>`,
/// `building:<id>`, `upgrade:<id>`, or a top-level field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDiff {
    OnlyInA(String),
    OnlyInB(String),
    Mismatch { key: String, fields: Vec<&'static str> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiff {
    pub is_identical: bool,
    pub entries: Vec<EntryDiff>,
}

fn diff_maps<V>(
    kind: &str,
    a: &BTreeMap<impl Ord + std::fmt::Display, V>,
    b: &BTreeMap<impl Ord + std::fmt::Display, V>,
    compare: impl Fn(&V, &V) -> Vec<&'static str>,
    out: &mut Vec<EntryDiff>,
) {
    let a: BTreeMap<String, &V> = a.iter().map(|(k, v)| (format!("{kind}:{k}"), v)).collect();
    let b: BTreeMap<String, &V> = b.iter().map(|(k, v)| (format!("{kind}:{k}"), v)).collect();
    for (key, va) in &a {
        match b.get(key) {
            None => out.push(EntryDiff::OnlyInA(key.clone())),
            Some(vb) => {
                let fields = compare(va, vb);
                if !fields.is_empty() {
                    out.push(EntryDiff::Mismatch {
                        key: key.clone(),
                        fields,
                    });
                }
            }
        }
    }
    for key in b.keys() {
        if !a.contains_key(key) {
            out.push(EntryDiff::OnlyInB(key.clone()));
        }
    }
}

/// Field-by-field comparison of two states. Floats compare by bits, so
/// `-0.0` and `0.0` differ; cached production rates are ignored.
pub fn diff_states(a: &GameState, b: &GameState) -> StateDiff {
    let same = |x: f64, y: f64| x.to_bits() == y.to_bits();
    let mut entries = Vec::new();

    diff_maps("resource", &a.resources, &b.resources, |x, y| {
        let mut f = Vec::new();
        if !same(x.current, y.current) {
            f.push("current");
        }
        if !same(x.lifetime, y.lifetime) {
            f.push("lifetime");
        }
        if x.max_capacity.map(f64::to_bits) != y.max_capacity.map(f64::to_bits) {
            f.push("max_capacity");
        }
        if x.unlocked != y.unlocked {
            f.push("unlocked");
        }
        f
    }, &mut entries);

    diff_maps("building", &a.buildings, &b.buildings, |x, y| {
        let mut f = Vec::new();
        if x.owned != y.owned {
            f.push("owned");
        }
        if x.total_purchased != y.total_purchased {
            f.push("total_purchased");
        }
        if x.unlocked != y.unlocked {
            f.push("unlocked");
        }
        if !same(x.health, y.health) {
            f.push("health");
        }
        if !same(x.resource_limit, y.resource_limit) {
            f.push("resource_limit");
        }
        if x.disabled != y.disabled {
            f.push("disabled");
        }
        if !same(x.batch_progress_ms, y.batch_progress_ms) {
            f.push("batch_progress_ms");
        }
        f
    }, &mut entries);

    diff_maps("upgrade", &a.upgrades, &b.upgrades, |x, y| {
        let mut f = Vec::new();
        if x.purchased != y.purchased {
            f.push("purchased");
        }
        if x.purchase_count != y.purchase_count {
            f.push("purchase_count");
        }
        if x.unlocked != y.unlocked {
            f.push("unlocked");
        }
        f
    }, &mut entries);

    let mut top = Vec::new();
    if a.era != b.era {
        top.push("era");
    }
    if a.prestige_level != b.prestige_level {
        top.push("prestige_level");
    }
    if a.rng != b.rng {
        top.push("rng");
    }
    if !top.is_empty() {
        entries.push(EntryDiff::Mismatch {
            key: "game".into(),
            fields: top,
        });
    }

    StateDiff {
        is_identical: entries.is_empty(),
        entries,
    }
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// First tick (1-based) whose hashes differed.
    pub divergence_tick: Option<u64>,
    /// `(tick, hash_a, hash_b)` per tick.
    pub hash_log: Vec<(u64, u64, u64)>,
}

/// Run two engines from the same state for `ticks` ticks of `dt` seconds
/// and compare their state hashes after every tick.
pub fn validate_determinism(
    catalogue: Arc<Catalogue>,
    config: &EngineConfig,
    initial: &GameState,
    ticks: u64,
    dt: f64,
) -> Result<DeterminismResult, TickError> {
    let mut engine_a = Engine::new(catalogue.clone(), config.clone());
    let mut engine_b = Engine::new(catalogue, config.clone());
    engine_a.load_state(initial.clone());
    engine_b.load_state(initial.clone());

    let start = initial.last_played_at;
    let step_ms = (dt * 1000.0) as u64;
    let mut hash_log = Vec::new();
    let mut divergence_tick = None;

    for tick in 1..=ticks {
        let now = start + tick * step_ms;
        engine_a.process_tick(dt, now)?;
        engine_b.process_tick(dt, now)?;

        let hash_a = engine_a.state_hash();
        let hash_b = engine_b.state_hash();
        hash_log.push((tick, hash_a, hash_b));
        if hash_a != hash_b && divergence_tick.is_none() {
            divergence_tick = Some(tick);
        }
    }

    Ok(DeterminismResult {
        is_deterministic: divergence_tick.is_none(),
        divergence_tick,
        hash_log,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
