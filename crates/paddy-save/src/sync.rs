//! Cloud save reconciliation.
//!
//! The remote store is reached through [`RemoteStore`]; the host owns the
//! authenticated client and hands it in for each call. Reconciliation is
//! decided by [`reconcile`] from the two snapshots' timestamps and
//! contents. Anything ambiguous becomes a [`Conflict`] that waits for an
//! explicit [`Resolution`]: no automatic overwrite happens in either
//! direction while one is pending.

use std::collections::BTreeMap;

use paddy_core::id::ResourceId;
use paddy_core::state::GameState;
use serde::{Deserialize, Serialize};

use crate::snapshot::SaveSnapshot;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Network or server failure. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected the request ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("server returned an unusable save: {0}")]
    InvalidResponse(String),
}

/// Offline gains the client credited itself since the last sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineClaim {
    /// `last_played_at` when the absence began.
    pub since_ms: u64,
    pub resources_gained: BTreeMap<ResourceId, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub snapshot: SaveSnapshot,
    /// Timestamp of the remote save this client last saw. A mismatch with
    /// the stored save is how the server recognises a concurrent writer.
    pub base_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_claim: Option<OfflineClaim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub conflict: bool,
    /// The stored save after the request: the accepted one (possibly
    /// adjusted), or the conflicting one.
    pub snapshot: Option<SaveSnapshot>,
    /// The server changed the submitted save (clamped offline gains).
    #[serde(default)]
    pub adjusted: bool,
}

/// Remote save store keyed by the authenticated user.
pub trait RemoteStore {
    fn load_game(&mut self) -> Result<Option<SaveSnapshot>, SyncError>;
    /// Unconditional overwrite.
    fn save_game(&mut self, snapshot: &SaveSnapshot) -> Result<(), SyncError>;
    /// Conditional write; the server may report a conflict instead.
    fn sync_game(&mut self, request: &SyncRequest) -> Result<SyncResponse, SyncError>;
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub local: Option<SaveSnapshot>,
    pub remote: SaveSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SyncState {
    /// No remote session yet.
    #[default]
    Unauthenticated,
    Synced {
        at_ms: u64,
    },
    Conflict(Conflict),
}

impl SyncState {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncState::Conflict(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local game and overwrite the remote save.
    Local,
    /// Adopt the remote save.
    Cloud,
    /// Keep the higher-progress save with the other's best resource values.
    Merge,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    UploadLocal,
    AdoptRemote,
    UpToDate,
    Conflict,
}

/// Decide what to do with a local and a remote save.
///
/// | local | remote | outcome |
/// |---|---|---|
/// | any | none | upload |
/// | none | some | adopt |
/// | older, same content | newer | adopt |
/// | older, divergent | newer | conflict |
/// | newer | older | upload (the server may still report a conflict) |
/// | same time, same content | | up to date |
/// | same time, divergent | | conflict |
pub fn reconcile(local: Option<&SaveSnapshot>, remote: Option<&SaveSnapshot>) -> Reconciliation {
    let (local, remote) = match (local, remote) {
        (_, None) => return Reconciliation::UploadLocal,
        (None, Some(_)) => return Reconciliation::AdoptRemote,
        (Some(l), Some(r)) => (l, r),
    };
    let same = local.same_content(remote);
    match remote.timestamp.cmp(&local.timestamp) {
        std::cmp::Ordering::Greater if same => Reconciliation::AdoptRemote,
        std::cmp::Ordering::Less => Reconciliation::UploadLocal,
        std::cmp::Ordering::Equal if same => Reconciliation::UpToDate,
        _ => Reconciliation::Conflict,
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

pub const OWNED_WEIGHT: f64 = 1_000.0;
pub const UPGRADE_WEIGHT: f64 = 5_000.0;

/// Σ lifetime resources + 1000 × Σ owned buildings + 5000 × purchased
/// upgrades.
pub fn progress_score(state: &GameState) -> f64 {
    let lifetime: f64 = state.resources.values().map(|r| r.lifetime).sum();
    let owned: f64 = state.buildings.values().map(|b| f64::from(b.owned)).sum();
    let purchased = state.upgrades.values().filter(|u| u.purchased).count() as f64;
    lifetime + OWNED_WEIGHT * owned + UPGRADE_WEIGHT * purchased
}

/// Heuristic merge: the higher-score save wins (ties keep `local`), then
/// each resource takes the larger `current` and `lifetime` of the two.
pub fn merge_states(local: &GameState, remote: &GameState) -> GameState {
    let (mut merged, other) = if progress_score(remote) > progress_score(local) {
        (remote.clone(), local)
    } else {
        (local.clone(), remote)
    };
    for (id, theirs) in &other.resources {
        if let Some(ours) = merged.resources.get_mut(id) {
            ours.current = ours.current.max(theirs.current);
            ours.lifetime = ours.lifetime.max(theirs.lifetime);
        }
    }
    merged.last_played_at = merged.last_played_at.max(other.last_played_at);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use paddy_core::config::EvalMode;
    use paddy_core::test_utils::village;
    use proptest::prelude::*;

    fn fresh() -> GameState {
        GameState::fresh(&village(EvalMode::Strict), 1)
    }

    fn snap(state: &GameState, ts: u64) -> SaveSnapshot {
        SaveSnapshot::capture(state, ts).unwrap()
    }

    fn with_rice(rice: f64) -> GameState {
        let mut s = fresh();
        let r = s.resources.get_mut("rice").unwrap();
        r.current = rice;
        r.lifetime = rice;
        s
    }

    // -----------------------------------------------------------------------
    // reconcile
    // -----------------------------------------------------------------------

    #[test]
    fn missing_sides() {
        let a = snap(&fresh(), 1);
        assert_eq!(reconcile(Some(&a), None), Reconciliation::UploadLocal);
        assert_eq!(reconcile(None, None), Reconciliation::UploadLocal);
        assert_eq!(reconcile(None, Some(&a)), Reconciliation::AdoptRemote);
    }

    #[test]
    fn local_newer_uploads() {
        let local = snap(&with_rice(10.0), 200);
        let remote = snap(&with_rice(5.0), 100);
        assert_eq!(reconcile(Some(&local), Some(&remote)), Reconciliation::UploadLocal);
    }

    #[test]
    fn remote_newer_same_content_adopts() {
        let local = snap(&with_rice(10.0), 100);
        let remote = snap(&with_rice(10.0), 200);
        assert_eq!(reconcile(Some(&local), Some(&remote)), Reconciliation::AdoptRemote);
    }

    #[test]
    fn remote_newer_divergent_conflicts() {
        let local = snap(&with_rice(10.0), 100);
        let remote = snap(&with_rice(99.0), 200);
        assert_eq!(reconcile(Some(&local), Some(&remote)), Reconciliation::Conflict);
    }

    #[test]
    fn equal_timestamps() {
        let a = snap(&with_rice(10.0), 100);
        let b = snap(&with_rice(10.0), 100);
        let c = snap(&with_rice(11.0), 100);
        assert_eq!(reconcile(Some(&a), Some(&b)), Reconciliation::UpToDate);
        assert_eq!(reconcile(Some(&a), Some(&c)), Reconciliation::Conflict);
    }

    // -----------------------------------------------------------------------
    // merge
    // -----------------------------------------------------------------------

    #[test]
    fn progress_score_weights() {
        let mut s = with_rice(250.0);
        s.buildings.get_mut("paddy_field").unwrap().owned = 2;
        s.upgrades.get_mut("iron_sickle").unwrap().purchased = true;
        assert_eq!(progress_score(&s), 250.0 + 2_000.0 + 5_000.0);
    }

    #[test]
    fn merge_keeps_higher_score_and_max_resources() {
        let mut local = with_rice(400.0);
        local.resources.get_mut("coins").unwrap().current = 3.0;

        let mut remote = with_rice(50.0);
        remote.buildings.get_mut("paddy_field").unwrap().owned = 1;
        remote.resources.get_mut("coins").unwrap().current = 1.0;
        remote.last_played_at = 77;

        let merged = merge_states(&local, &remote);
        assert_eq!(merged.owned("paddy_field"), 1, "remote had more progress");
        assert_eq!(merged.amount("rice"), 400.0);
        assert_eq!(merged.resources["rice"].lifetime, 400.0);
        assert_eq!(merged.amount("coins"), 3.0);
        assert_eq!(merged.last_played_at, 77);
    }

    #[test]
    fn merge_ties_keep_local() {
        let mut local = with_rice(100.0);
        local.prestige_level = 1;
        let remote = with_rice(100.0);
        let merged = merge_states(&local, &remote);
        assert_eq!(merged.prestige_level, 1);
    }

    proptest! {
        #[test]
        fn merge_takes_the_larger_of_every_resource(
            local_rice in 0.0..1e6f64,
            remote_rice in 0.0..1e6f64,
            local_coins in 0.0..1e4f64,
            remote_coins in 0.0..1e4f64,
            local_fields in 0u32..5,
            remote_fields in 0u32..5,
        ) {
            let mut local = with_rice(local_rice);
            local.resources.get_mut("coins").unwrap().current = local_coins;
            local.buildings.get_mut("paddy_field").unwrap().owned = local_fields;
            let mut remote = with_rice(remote_rice);
            remote.resources.get_mut("coins").unwrap().current = remote_coins;
            remote.buildings.get_mut("paddy_field").unwrap().owned = remote_fields;

            let merged = merge_states(&local, &remote);
            for (id, r) in &merged.resources {
                prop_assert_eq!(r.current, local.resources[id].current.max(remote.resources[id].current));
                prop_assert_eq!(r.lifetime, local.resources[id].lifetime.max(remote.resources[id].lifetime));
            }
            let winner = if progress_score(&remote) > progress_score(&local) { &remote } else { &local };
            prop_assert_eq!(merged.owned("paddy_field"), winner.owned("paddy_field"));
        }
    }
}
