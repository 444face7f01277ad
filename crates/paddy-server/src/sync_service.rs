//! Per-user save storage and sync handling.
//!
//! A sync request carries the timestamp of the stored save the client
//! last saw. If the stored save has moved on since then and holds
//! different content, the request is a conflict and nothing is written.
//! Accepted requests have their offline claim checked against the
//! server's own recomputation, using the server clock; over-claims are
//! taken back out of the stored save.

use std::collections::BTreeMap;

use paddy_core::id::ResourceId;
use paddy_save::migration::MigrationRegistry;
use paddy_save::sync::OfflineClaim;
use paddy_save::{RemoteStore, SaveSnapshot, SyncError, SyncRequest, SyncResponse};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::offline::{DEFAULT_TOLERANCE, OfflineProgressService};

/// Authenticated user key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct SyncService {
    offline: OfflineProgressService,
    migrations: MigrationRegistry,
    claim_tolerance: f64,
    saves: BTreeMap<UserId, SaveSnapshot>,
}

impl SyncService {
    pub fn new(offline: OfflineProgressService) -> Self {
        Self {
            offline,
            migrations: MigrationRegistry::new(),
            claim_tolerance: DEFAULT_TOLERANCE,
            saves: BTreeMap::new(),
        }
    }

    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_claim_tolerance(mut self, tolerance: f64) -> Self {
        self.claim_tolerance = tolerance;
        self
    }

    pub fn offline(&self) -> &OfflineProgressService {
        &self.offline
    }

    pub fn load_game(&self, user: &UserId) -> Option<&SaveSnapshot> {
        self.saves.get(user)
    }

    /// Unconditional overwrite, used when the player resolves a conflict
    /// in favour of the local save.
    pub fn save_game(&mut self, user: &UserId, snapshot: SaveSnapshot) -> Result<(), ServiceError> {
        snapshot.verify()?;
        tracing::debug!(%user, timestamp = snapshot.timestamp, "save overwritten");
        self.saves.insert(user.clone(), snapshot);
        Ok(())
    }

    pub fn sync_game(
        &mut self,
        user: &UserId,
        request: &SyncRequest,
        now_ms: u64,
    ) -> Result<SyncResponse, ServiceError> {
        request.snapshot.verify()?;

        if let Some(stored) = self.saves.get(user)
            && request.base_timestamp != Some(stored.timestamp)
            && !stored.same_content(&request.snapshot)
        {
            tracing::info!(
                %user,
                base = ?request.base_timestamp,
                stored = stored.timestamp,
                "sync conflict"
            );
            return Ok(SyncResponse {
                conflict: true,
                snapshot: Some(stored.clone()),
                adjusted: false,
            });
        }

        let (snapshot, adjusted) = match &request.offline_claim {
            Some(claim) => self.settle_claim(user, &request.snapshot, claim, now_ms)?,
            None => (request.snapshot.clone(), false),
        };
        self.saves.insert(user.clone(), snapshot.clone());
        Ok(SyncResponse {
            conflict: false,
            snapshot: Some(snapshot),
            adjusted,
        })
    }

    /// Recompute the claimed absence and take any excess back out of the
    /// submitted save.
    fn settle_claim(
        &self,
        user: &UserId,
        snapshot: &SaveSnapshot,
        claim: &OfflineClaim,
        now_ms: u64,
    ) -> Result<(SaveSnapshot, bool), ServiceError> {
        let mut state = snapshot.decode(&self.migrations)?;

        let mut before = state.clone();
        for (id, gained) in &claim.resources_gained {
            if let Some(r) = before.resources.get_mut(id) {
                r.current = (r.current - gained).max(0.0);
            }
        }
        let recomputed: BTreeMap<ResourceId, f64> = self
            .offline
            .calculate_offline_progress(&before, claim.since_ms, now_ms)?
            .map(|p| p.resources_gained)
            .unwrap_or_default();

        let check = crate::offline::corroborate(&claim.resources_gained, &recomputed, self.claim_tolerance);
        if check.is_honest() {
            return Ok((snapshot.clone(), false));
        }

        for (id, excess) in &check.excess {
            if let Some(r) = state.resources.get_mut(id) {
                r.current = (r.current - excess).max(0.0);
                r.lifetime = (r.lifetime - excess).max(0.0);
            }
        }
        tracing::warn!(%user, excess = ?check.excess, "offline claim exceeded recomputation; clamped");
        Ok((SaveSnapshot::capture(&state, snapshot.timestamp)?, true))
    }
}

/// [`RemoteStore`] backed directly by a [`SyncService`], for single-process
/// hosts and tests. `now_ms` is the server clock.
#[derive(Debug)]
pub struct InProcessRemote<'a> {
    pub service: &'a mut SyncService,
    pub user: UserId,
    pub now_ms: u64,
}

impl RemoteStore for InProcessRemote<'_> {
    fn load_game(&mut self) -> Result<Option<SaveSnapshot>, SyncError> {
        Ok(self.service.load_game(&self.user).cloned())
    }

    fn save_game(&mut self, snapshot: &SaveSnapshot) -> Result<(), SyncError> {
        self.service
            .save_game(&self.user, snapshot.clone())
            .map_err(|e| SyncError::Server {
                status: 400,
                message: e.to_string(),
            })
    }

    fn sync_game(&mut self, request: &SyncRequest) -> Result<SyncResponse, SyncError> {
        self.service
            .sync_game(&self.user, request, self.now_ms)
            .map_err(|e| SyncError::Server {
                status: 400,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paddy_core::config::{EngineConfig, EvalMode};
    use paddy_core::engine::Engine;
    use paddy_core::test_utils::{village, village_engine};

    fn service() -> SyncService {
        let config = EngineConfig {
            eval_mode: EvalMode::Strict,
            ..EngineConfig::default()
        };
        SyncService::new(OfflineProgressService::new(village(EvalMode::Strict), config))
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    /// One paddy field, last ticked at `t`.
    fn farm_engine(t: u64) -> Engine {
        let mut engine = village_engine();
        engine.add_resource("rice", 50.0);
        assert!(engine.purchase_building("paddy_field", 1));
        engine.process_tick(0.1, t).unwrap();
        engine
    }

    fn request(engine: &Engine, ts: u64, base: Option<u64>) -> SyncRequest {
        SyncRequest {
            snapshot: SaveSnapshot::capture(engine.state(), ts).unwrap(),
            base_timestamp: base,
            offline_claim: None,
        }
    }

    #[test]
    fn first_sync_is_stored() {
        let mut svc = service();
        let engine = farm_engine(1_000);
        let resp = svc.sync_game(&alice(), &request(&engine, 1_000, None), 1_000).unwrap();
        assert!(!resp.conflict);
        assert!(!resp.adjusted);
        assert_eq!(svc.load_game(&alice()).unwrap().timestamp, 1_000);
    }

    #[test]
    fn stale_base_with_different_content_conflicts() {
        let mut svc = service();
        let mut engine = farm_engine(1_000);
        svc.sync_game(&alice(), &request(&engine, 1_000, None), 1_000).unwrap();

        // Another device writes on top of the first save.
        engine.add_resource("rice", 5.0);
        svc.sync_game(&alice(), &request(&engine, 2_000, Some(1_000)), 2_000).unwrap();

        // The first device still thinks the base is 1000.
        engine.add_resource("rice", 7.0);
        let resp = svc
            .sync_game(&alice(), &request(&engine, 3_000, Some(1_000)), 3_000)
            .unwrap();
        assert!(resp.conflict);
        assert_eq!(resp.snapshot.unwrap().timestamp, 2_000);
        assert_eq!(svc.load_game(&alice()).unwrap().timestamp, 2_000, "nothing written");
    }

    #[test]
    fn stale_base_with_same_content_is_accepted() {
        let mut svc = service();
        let engine = farm_engine(1_000);
        svc.sync_game(&alice(), &request(&engine, 1_000, None), 1_000).unwrap();
        let resp = svc.sync_game(&alice(), &request(&engine, 5_000, None), 5_000).unwrap();
        assert!(!resp.conflict);
    }

    #[test]
    fn tampered_snapshots_are_rejected() {
        let mut svc = service();
        let mut req = request(&farm_engine(1_000), 1_000, None);
        req.snapshot.data.push(' ');
        assert!(matches!(
            svc.sync_game(&alice(), &req, 1_000),
            Err(ServiceError::Snapshot(_))
        ));
        assert!(svc.load_game(&alice()).is_none());
    }

    #[test]
    fn honest_offline_claim_is_kept() {
        let mut svc = service();
        let mut engine = farm_engine(1_000);
        let report = engine.apply_offline(101_000).unwrap().unwrap();
        let mut req = request(&engine, 101_000, None);
        req.offline_claim = Some(OfflineClaim {
            since_ms: 1_000,
            resources_gained: report.resources_gained,
        });

        let resp = svc.sync_game(&alice(), &req, 101_000).unwrap();
        assert!(!resp.adjusted);
        assert_eq!(resp.snapshot.unwrap(), req.snapshot);
    }

    #[test]
    fn inflated_offline_claim_is_clamped() {
        let mut svc = service();
        let mut engine = farm_engine(1_000);
        // Honest gain is 25 rice; the client pads it by 1000.
        engine.apply_offline(101_000).unwrap().unwrap();
        engine.add_resource("rice", 1_000.0);
        let honest_rice = engine.state().amount("rice") - 1_000.0;
        let mut req = request(&engine, 101_000, None);
        req.offline_claim = Some(OfflineClaim {
            since_ms: 1_000,
            resources_gained: BTreeMap::from([(ResourceId::from("rice"), 1_025.0)]),
        });

        // The server clock says the client was away the whole time.
        let resp = svc.sync_game(&alice(), &req, 101_000).unwrap();
        assert!(resp.adjusted);
        let stored = resp.snapshot.unwrap().decode(&MigrationRegistry::new()).unwrap();
        let rice = stored.amount("rice");
        // Honest gain plus the 1 % tolerance survives.
        assert!((rice - (honest_rice + 0.25)).abs() < 1e-6, "rice {rice} vs honest {honest_rice}");
    }

    #[test]
    fn claim_against_a_short_server_window_is_clamped_to_nothing() {
        let mut svc = service();
        let mut engine = farm_engine(1_000);
        engine.apply_offline(101_000).unwrap().unwrap();
        let mut req = request(&engine, 101_000, None);
        req.offline_claim = Some(OfflineClaim {
            since_ms: 1_000,
            resources_gained: BTreeMap::from([(ResourceId::from("rice"), 25.0)]),
        });

        // Server time shows only half a second passed: nothing is allowed.
        let resp = svc.sync_game(&alice(), &req, 1_500).unwrap();
        assert!(resp.adjusted);
        let stored = resp.snapshot.unwrap().decode(&MigrationRegistry::new()).unwrap();
        assert!((stored.amount("rice") - (engine.state().amount("rice") - 25.0)).abs() < 1e-6);
    }

    #[test]
    fn in_process_remote_round_trip() {
        let mut svc = service();
        let engine = farm_engine(1_000);
        let snapshot = SaveSnapshot::capture(engine.state(), 1_000).unwrap();
        {
            let mut remote = InProcessRemote {
                service: &mut svc,
                user: alice(),
                now_ms: 1_000,
            };
            remote.save_game(&snapshot).unwrap();
            assert_eq!(remote.load_game().unwrap(), Some(snapshot.clone()));

            let mut bad = snapshot.clone();
            bad.checksum = "0".repeat(16);
            assert!(matches!(
                remote.save_game(&bad),
                Err(SyncError::Server { status: 400, .. })
            ));
        }
        assert_eq!(svc.load_game(&alice()), Some(&snapshot));
    }
}
