//! Paddy Core -- the deterministic economy simulation behind an idle game.
//!
//! Buildings, upgrades, and elapsed time become resource quantities under a
//! data-driven balance model. Everything here is pure simulation: rendering,
//! persistence back-ends, and networking live in the host or in the sibling
//! crates (`paddy-data`, `paddy-save`, `paddy-server`).
//!
//! # Tick Pipeline
//!
//! Each call to [`engine::Engine::process_tick`] runs:
//!
//! 1. **Production** -- continuous outputs (buffered per building/resource)
//!    and whole batch cycles.
//! 2. **Consumption** -- per-tick upkeep; shortfalls drain health, and at
//!    zero health a unit is removed or the building disabled.
//! 3. **Expiry** -- temporary multiplier sources are dropped.
//! 4. **Context refresh** -- conditional multipliers are re-evaluated.
//! 5. **Unlocks** -- eras advance and content unlocks.
//! 6. **Notify** -- state-changed subscribers get an `Arc<GameState>`.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- owns every component and runs the pipeline.
//! - [`curve::CurveEvaluator`] -- cost and scaling curves, including
//!   formula curves parsed by [`expr`].
//! - [`multiplier::MultiplierSystem`] -- additive, multiplicative, and
//!   diminishing stacks with optional bounds, expiry, and conditions.
//! - [`state::StateManager`] -- the canonical [`state::GameState`]; every
//!   mutation goes through it.
//! - [`registry::Catalogue`] -- validated, immutable content definitions.
//! - [`game_loop::GameLoop`] -- host-driven tick scheduling.

pub mod building;
pub mod condition;
pub mod config;
pub mod consumption;
pub mod curve;
pub mod engine;
pub mod event;
pub mod expr;
pub mod game_loop;
pub mod hash;
pub mod id;
pub mod multiplier;
pub mod offline;
pub mod production;
pub mod registry;
pub mod rng;
pub mod sim;
pub mod state;
pub mod synergy;
pub mod unlock;
pub mod upgrade;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
