//! Engine configuration.
//!
//! Every field has a serde default so partial config files load cleanly;
//! `paddy-data` reads these from RON, JSON, or TOML.

use serde::{Deserialize, Serialize};

/// How configuration anomalies (unknown curve, malformed formula) are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    /// Fail loudly. Used in development and content tests.
    Strict,
    /// Log and substitute a neutral value. Used in production.
    #[default]
    Lenient,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub eval_mode: EvalMode,
    /// Seed for the chance-roll RNG of a fresh game.
    pub rng_seed: u64,
    /// Buffered continuous production below this amount is held back from
    /// the resource ledger.
    pub accumulator_threshold: f64,
    pub game_loop: LoopConfig,
    pub offline: OfflineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eval_mode: EvalMode::Lenient,
            rng_seed: 0x9E37_79B9,
            accumulator_threshold: 0.01,
            game_loop: LoopConfig::default(),
            offline: OfflineConfig::default(),
        }
    }
}

/// Tick scheduling for [`crate::game_loop::GameLoop`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Tick interval while the host is visible.
    pub base_tick_ms: u64,
    /// Tick interval while the host is hidden.
    pub idle_tick_ms: u64,
    /// Simulated-time multiplier. Only honoured when `dev_mode` is set.
    pub time_multiplier: f64,
    pub dev_mode: bool,
    /// Consecutive tick failures before the loop pauses itself.
    pub max_consecutive_errors: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            base_tick_ms: 100,
            idle_tick_ms: 1000,
            time_multiplier: 1.0,
            dev_mode: false,
            max_consecutive_errors: 5,
        }
    }
}

/// Offline catch-up bounds, shared by the client and the server recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Upper bound on credited time away.
    pub max_offline_seconds: f64,
    /// Fraction of live production credited while away.
    pub offline_efficiency: f64,
    /// Absences shorter than this are not credited.
    pub min_offline_ms: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_offline_seconds: 8.0 * 3600.0,
            offline_efficiency: 0.5,
            min_offline_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"eval_mode":"strict","offline":{"offline_efficiency":1.0}}"#)
                .unwrap();
        assert_eq!(cfg.eval_mode, EvalMode::Strict);
        assert_eq!(cfg.offline.offline_efficiency, 1.0);
        assert_eq!(cfg.offline.max_offline_seconds, 28_800.0);
        assert_eq!(cfg.game_loop.max_consecutive_errors, 5);
        assert_eq!(cfg.accumulator_threshold, 0.01);
    }
}
