//! Server-side offline recomputation.
//!
//! The server never trusts a client's clock or its arithmetic. It replays
//! the absence through the same engine the client runs, from the client's
//! own pre-absence state, and compares the result against what the client
//! claims to have earned.

use std::collections::BTreeMap;
use std::sync::Arc;

use paddy_core::config::EngineConfig;
use paddy_core::engine::Engine;
use paddy_core::id::ResourceId;
use paddy_core::registry::Catalogue;
use paddy_core::state::GameState;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Relative slack allowed between a claim and the recomputation.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineProgress {
    /// Net change per resource; resources that did not move are omitted.
    pub resources_gained: BTreeMap<ResourceId, f64>,
    /// Time away after the cap.
    pub offline_time_ms: u64,
    pub efficiency_applied: f64,
}

impl OfflineProgress {
    /// Check `claimed` gains against this recomputation.
    pub fn corroborate(&self, claimed: &BTreeMap<ResourceId, f64>, tolerance: f64) -> ClaimCheck {
        corroborate(claimed, &self.resources_gained, tolerance)
    }
}

/// Outcome of checking a claim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimCheck {
    /// The claim with every resource capped at what the server allows.
    pub allowed: BTreeMap<ResourceId, f64>,
    /// How far each over-claimed resource exceeded its allowance.
    pub excess: BTreeMap<ResourceId, f64>,
}

impl ClaimCheck {
    pub fn is_honest(&self) -> bool {
        self.excess.is_empty()
    }
}

/// Cap each claimed gain at `recomputed + tolerance × |recomputed|`.
/// Resources the server saw no change in allow nothing.
pub fn corroborate(
    claimed: &BTreeMap<ResourceId, f64>,
    recomputed: &BTreeMap<ResourceId, f64>,
    tolerance: f64,
) -> ClaimCheck {
    let tolerance = if tolerance.is_finite() { tolerance.max(0.0) } else { 0.0 };
    let mut check = ClaimCheck::default();
    for (id, &claim) in claimed {
        let expected = recomputed.get(id).copied().unwrap_or(0.0);
        let bound = expected + tolerance * expected.abs() + 1e-9;
        // A NaN claim is flagged but cannot say how much to take back.
        let (allowed, excess) = if claim.is_nan() {
            (expected, Some(0.0))
        } else if claim > bound {
            (bound, Some(claim - bound))
        } else {
            (claim, None)
        };
        if let Some(excess) = excess {
            check.excess.insert(id.clone(), excess);
        }
        check.allowed.insert(id.clone(), allowed);
    }
    check
}

/// Replays absences through a throwaway [`Engine`].
#[derive(Debug, Clone)]
pub struct OfflineProgressService {
    catalogue: Arc<Catalogue>,
    config: EngineConfig,
}

impl OfflineProgressService {
    pub fn new(catalogue: Arc<Catalogue>, config: EngineConfig) -> Self {
        Self { catalogue, config }
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        &self.catalogue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// What `state` earns between `last_played_at` and `now_ms`.
    ///
    /// `Ok(None)` when less than the minimum offline time elapsed, the
    /// clock went backwards, or `last_played_at` is unset.
    pub fn calculate_offline_progress(
        &self,
        state: &GameState,
        last_played_at: u64,
        now_ms: u64,
    ) -> Result<Option<OfflineProgress>, ServiceError> {
        let mut state = state.clone();
        state.last_played_at = last_played_at;

        let mut engine = Engine::new(self.catalogue.clone(), self.config.clone());
        engine.load_state(state);
        let Some(report) = engine.apply_offline(now_ms)? else {
            return Ok(None);
        };
        tracing::debug!(
            offline_ms = report.window.offline_time_ms,
            efficiency = report.window.efficiency,
            resources = report.resources_gained.len(),
            "offline progress recomputed"
        );
        Ok(Some(OfflineProgress {
            resources_gained: report.resources_gained,
            offline_time_ms: report.window.offline_time_ms,
            efficiency_applied: report.window.efficiency,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paddy_core::config::{EvalMode, OfflineConfig};
    use paddy_core::test_utils::{approx, village, village_engine};

    fn service(offline: OfflineConfig) -> OfflineProgressService {
        let config = EngineConfig {
            eval_mode: EvalMode::Strict,
            offline,
            ..EngineConfig::default()
        };
        OfflineProgressService::new(village(EvalMode::Strict), config)
    }

    /// One paddy field and nothing else.
    fn farm() -> GameState {
        let mut engine = village_engine();
        engine.add_resource("rice", 50.0);
        assert!(engine.purchase_building("paddy_field", 1));
        engine.state().clone()
    }

    fn rice(amount: f64) -> BTreeMap<ResourceId, f64> {
        BTreeMap::from([(ResourceId::from("rice"), amount)])
    }

    // -----------------------------------------------------------------------
    // calculate_offline_progress
    // -----------------------------------------------------------------------

    #[test]
    fn hundred_seconds_at_half_efficiency() {
        let svc = service(OfflineConfig::default());
        let progress = svc
            .calculate_offline_progress(&farm(), 1_000, 101_000)
            .unwrap()
            .unwrap();
        assert_eq!(progress.offline_time_ms, 100_000);
        assert_eq!(progress.efficiency_applied, 0.5);
        // 0.5 rice/s for 50 effective seconds.
        assert!(approx(progress.resources_gained[&ResourceId::from("rice")], 25.0));
    }

    #[test]
    fn short_absences_and_backwards_clocks_yield_nothing() {
        let svc = service(OfflineConfig::default());
        assert_eq!(svc.calculate_offline_progress(&farm(), 10_000, 10_999).unwrap(), None);
        assert_eq!(svc.calculate_offline_progress(&farm(), 10_000, 5_000).unwrap(), None);
        assert_eq!(svc.calculate_offline_progress(&farm(), 0, 50_000).unwrap(), None);
    }

    #[test]
    fn absence_is_capped() {
        let svc = service(OfflineConfig {
            max_offline_seconds: 60.0,
            offline_efficiency: 1.0,
            min_offline_ms: 1_000,
        });
        let progress = svc
            .calculate_offline_progress(&farm(), 1_000, 3_601_000)
            .unwrap()
            .unwrap();
        assert_eq!(progress.offline_time_ms, 60_000);
        assert!(approx(progress.resources_gained[&ResourceId::from("rice")], 30.0));
    }

    #[test]
    fn input_state_is_not_modified() {
        let svc = service(OfflineConfig::default());
        let state = farm();
        let before = state.clone();
        svc.calculate_offline_progress(&state, 1_000, 101_000).unwrap();
        assert_eq!(state, before);
    }

    // -----------------------------------------------------------------------
    // corroborate
    // -----------------------------------------------------------------------

    #[test]
    fn honest_claims_pass() {
        let check = corroborate(&rice(25.0), &rice(25.0), DEFAULT_TOLERANCE);
        assert!(check.is_honest());
        assert_eq!(check.allowed, rice(25.0));

        let within = corroborate(&rice(25.2), &rice(25.0), DEFAULT_TOLERANCE);
        assert!(within.is_honest());
    }

    #[test]
    fn inflated_claims_are_clamped() {
        let check = corroborate(&rice(100.0), &rice(25.0), DEFAULT_TOLERANCE);
        assert!(!check.is_honest());
        assert!(approx(check.allowed[&ResourceId::from("rice")], 25.25));
        assert!(approx(check.excess[&ResourceId::from("rice")], 74.75));
    }

    #[test]
    fn unknown_gains_allow_nothing() {
        let claimed = BTreeMap::from([(ResourceId::from("coins"), 10.0)]);
        let check = corroborate(&claimed, &rice(25.0), 0.0);
        assert!(approx(check.excess[&ResourceId::from("coins")], 10.0));
        assert!(approx(check.allowed[&ResourceId::from("coins")], 0.0));
    }

    #[test]
    fn under_claims_are_kept() {
        let check = corroborate(&rice(5.0), &rice(25.0), 0.0);
        assert!(check.is_honest());
        assert_eq!(check.allowed, rice(5.0));
    }

    #[test]
    fn progress_corroborates_against_itself() {
        let svc = service(OfflineConfig::default());
        let progress = svc
            .calculate_offline_progress(&farm(), 1_000, 101_000)
            .unwrap()
            .unwrap();
        assert!(progress.corroborate(&progress.resources_gained, 0.0).is_honest());
    }
}
