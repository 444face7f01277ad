//! Session facade tying the engine to local saves and cloud sync.
//!
//! [`Game`] is what a host drives: it implements [`TickTarget`] so a
//! [`paddy_core::game_loop::GameLoop`] can tick it, autosaves on a
//! wall-clock interval, and performs a real save when the loop pauses
//! itself after repeated failures.

use std::collections::BTreeMap;

use paddy_core::engine::{Engine, OfflineReport};
use paddy_core::game_loop::{TickError, TickTarget};
use paddy_core::id::ResourceId;

use crate::event::SaveEvent;
use crate::save_system::SaveSystem;
use crate::snapshot::{SaveSnapshot, SnapshotError};
use crate::store::KeyValueStore;
use crate::sync::{
    Conflict, OfflineClaim, Reconciliation, RemoteStore, Resolution, SyncError, SyncRequest,
    SyncState, merge_states, reconcile,
};

#[derive(Debug)]
pub struct Game<S> {
    engine: Engine,
    saves: SaveSystem<S>,
    sync: SyncState,
    /// Timestamp of the remote save last seen.
    remote_base: Option<u64>,
    pending_claim: Option<OfflineClaim>,
    last_saved_at: Option<u64>,
    events: Vec<SaveEvent>,
}

impl<S: KeyValueStore> Game<S> {
    pub fn new(engine: Engine, saves: SaveSystem<S>) -> Self {
        Self {
            engine,
            saves,
            sync: SyncState::default(),
            remote_base: None,
            pending_claim: None,
            last_saved_at: None,
            events: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn saves(&self) -> &SaveSystem<S> {
        &self.saves
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn pending_claim(&self) -> Option<&OfflineClaim> {
        self.pending_claim.as_ref()
    }

    pub fn take_events(&mut self) -> Vec<SaveEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Local persistence
    // -----------------------------------------------------------------------

    pub fn save(&mut self, now_ms: u64) -> bool {
        match self.saves.save(&mut self.engine, now_ms) {
            Ok(snapshot) => {
                self.last_saved_at = Some(now_ms);
                self.events.push(SaveEvent::Saved {
                    timestamp: snapshot.timestamp,
                });
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "save failed");
                self.events.push(SaveEvent::SaveFailed {
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Load the newest valid local save; `false` means a fresh game.
    pub fn load(&mut self) -> bool {
        match self.saves.load_from(&mut self.engine) {
            Some(source) => {
                self.events.push(SaveEvent::Loaded { source });
                true
            }
            None => {
                self.events.push(SaveEvent::StartedFresh);
                false
            }
        }
    }

    /// Credit time away. The gains are remembered and sent with the next
    /// sync for the server to corroborate.
    pub fn apply_offline(&mut self, now_ms: u64) -> Result<Option<OfflineReport>, TickError> {
        let since_ms = self.engine.state().last_played_at;
        let report = self.engine.apply_offline(now_ms)?;
        if let Some(report) = &report {
            self.record_claim(since_ms, &report.resources_gained);
        }
        Ok(report)
    }

    fn record_claim(&mut self, since_ms: u64, gains: &BTreeMap<ResourceId, f64>) {
        let claim = self.pending_claim.get_or_insert_with(|| OfflineClaim {
            since_ms,
            resources_gained: BTreeMap::new(),
        });
        for (id, gained) in gains {
            *claim.resources_gained.entry(id.clone()).or_default() += gained;
        }
    }

    pub fn reset(&mut self) {
        self.saves.reset(&mut self.engine);
        self.pending_claim = None;
    }

    pub fn export_save(&mut self, now_ms: u64) -> Result<String, SnapshotError> {
        self.saves.export_save(&mut self.engine, now_ms)
    }

    pub fn import_save(&mut self, text: &str, now_ms: u64) -> bool {
        let imported = self.saves.import_save(&mut self.engine, text, now_ms);
        if imported {
            self.pending_claim = None;
            self.events.push(SaveEvent::Imported);
        }
        imported
    }

    // -----------------------------------------------------------------------
    // Cloud sync
    // -----------------------------------------------------------------------

    /// Reconcile with the remote save after sign-in.
    pub fn on_authenticated(&mut self, remote: &mut dyn RemoteStore, now_ms: u64) -> &SyncState {
        let remote_snapshot = match remote.load_game() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.sync_failed(e);
                return &self.sync;
            }
        };
        self.remote_base = remote_snapshot.as_ref().map(|s| s.timestamp);
        let local = self.live_snapshot();

        let decision = reconcile(local.as_ref(), remote_snapshot.as_ref());
        tracing::debug!(?decision, "reconciling with remote save");
        match (decision, remote_snapshot) {
            (Reconciliation::AdoptRemote, Some(snapshot)) => {
                self.adopt(&snapshot, now_ms);
            }
            (Reconciliation::Conflict, Some(snapshot)) => self.enter_conflict(local, snapshot),
            (Reconciliation::UpToDate, _) => self.mark_synced(now_ms, false),
            _ => {
                self.push(remote, now_ms);
            }
        }
        &self.sync
    }

    /// Push the current game. Refused while a conflict is pending.
    pub fn sync(&mut self, remote: &mut dyn RemoteStore, now_ms: u64) -> bool {
        if self.sync.is_conflict() {
            tracing::debug!("sync skipped while a conflict is pending");
            return false;
        }
        self.push(remote, now_ms)
    }

    /// Settle a pending conflict. `false` if there is none or the chosen
    /// resolution could not be carried out; the conflict then stays.
    pub fn resolve_conflict(
        &mut self,
        remote: &mut dyn RemoteStore,
        resolution: Resolution,
        now_ms: u64,
    ) -> bool {
        let SyncState::Conflict(conflict) = &self.sync else {
            return false;
        };
        let conflict = conflict.clone();
        let resolved = match resolution {
            Resolution::Local => self.force_upload(remote, now_ms),
            Resolution::Cloud => self.adopt(&conflict.remote, now_ms),
            Resolution::Merge => match conflict.remote.decode(self.saves.migrations()) {
                Ok(remote_state) => {
                    self.engine.flush_all();
                    let merged = merge_states(self.engine.state(), &remote_state);
                    self.engine.load_state(merged);
                    self.force_upload(remote, now_ms)
                }
                Err(e) => {
                    self.sync_failed(SyncError::InvalidResponse(e.to_string()));
                    false
                }
            },
        };
        if resolved {
            tracing::info!(?resolution, "save conflict resolved");
            self.events.push(SaveEvent::ConflictResolved { resolution });
        }
        resolved
    }

    fn push(&mut self, remote: &mut dyn RemoteStore, now_ms: u64) -> bool {
        let snapshot = match self.saves.capture(&mut self.engine, now_ms) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.sync_failed(SyncError::InvalidResponse(e.to_string()));
                return false;
            }
        };
        let request = SyncRequest {
            snapshot: snapshot.clone(),
            base_timestamp: self.remote_base,
            offline_claim: self.pending_claim.clone(),
        };
        let response = match remote.sync_game(&request) {
            Ok(response) => response,
            Err(e) => {
                self.sync_failed(e);
                return false;
            }
        };

        if response.conflict {
            match response.snapshot {
                Some(theirs) => self.enter_conflict(Some(snapshot), theirs),
                None => self.sync_failed(SyncError::InvalidResponse(
                    "conflict reported without a save".into(),
                )),
            }
            return false;
        }

        self.pending_claim = None;
        let stored = response.snapshot.unwrap_or(snapshot);
        self.remote_base = Some(stored.timestamp);
        if response.adjusted {
            match stored.decode(self.saves.migrations()) {
                Ok(state) => {
                    tracing::info!("server adjusted the uploaded save");
                    self.engine.load_state(state);
                }
                Err(e) => tracing::warn!(error = %e, "adjusted save from server is unusable"),
            }
        }
        if let Err(e) = self.saves.write(&stored) {
            tracing::warn!(error = %e, "synced save could not be stored locally");
        }
        self.mark_synced(now_ms, response.adjusted);
        true
    }

    /// The running game stamped with the last local save's timestamp, so
    /// progress made since that save counts as divergent content. `None`
    /// when nothing was ever saved.
    fn live_snapshot(&mut self) -> Option<SaveSnapshot> {
        let saved = self.saves.latest_snapshot()?;
        match self.saves.capture(&mut self.engine, saved.timestamp) {
            Ok(live) => Some(live),
            Err(e) => {
                tracing::warn!(error = %e, "live state could not be captured; using the last save");
                Some(saved)
            }
        }
    }

    /// Save locally and overwrite the remote save.
    fn force_upload(&mut self, remote: &mut dyn RemoteStore, now_ms: u64) -> bool {
        let snapshot = match self.saves.save(&mut self.engine, now_ms) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.sync_failed(SyncError::InvalidResponse(e.to_string()));
                return false;
            }
        };
        self.last_saved_at = Some(now_ms);
        if let Err(e) = remote.save_game(&snapshot) {
            self.sync_failed(e);
            return false;
        }
        self.remote_base = Some(snapshot.timestamp);
        self.pending_claim = None;
        self.mark_synced(now_ms, false);
        true
    }

    /// Replace the local game with `snapshot`.
    fn adopt(&mut self, snapshot: &SaveSnapshot, now_ms: u64) -> bool {
        let state = match snapshot.decode(self.saves.migrations()) {
            Ok(state) => state,
            Err(e) => {
                self.sync_failed(SyncError::InvalidResponse(e.to_string()));
                return false;
            }
        };
        self.engine.load_state(state);
        self.pending_claim = None;
        self.remote_base = Some(snapshot.timestamp);
        if let Err(e) = self.saves.write(snapshot) {
            tracing::warn!(error = %e, "adopted save could not be stored locally");
        }
        self.mark_synced(now_ms, false);
        true
    }

    fn mark_synced(&mut self, now_ms: u64, adjusted: bool) {
        self.sync = SyncState::Synced { at_ms: now_ms };
        self.events.push(SaveEvent::SyncCompleted {
            at_ms: now_ms,
            adjusted,
        });
    }

    fn enter_conflict(&mut self, local: Option<SaveSnapshot>, remote: SaveSnapshot) {
        tracing::info!(
            local = ?local.as_ref().map(|s| s.timestamp),
            remote = remote.timestamp,
            "save conflict detected"
        );
        self.events.push(SaveEvent::ConflictDetected {
            local_timestamp: local.as_ref().map(|s| s.timestamp),
            remote_timestamp: remote.timestamp,
        });
        self.sync = SyncState::Conflict(Conflict { local, remote });
    }

    fn sync_failed(&mut self, error: SyncError) {
        tracing::warn!(error = %error, "cloud sync failed");
        self.events.push(SaveEvent::SyncFailed {
            reason: error.to_string(),
        });
    }
}

impl<S: KeyValueStore> TickTarget for Game<S> {
    fn tick(&mut self, dt_seconds: f64, now_ms: u64) -> Result<(), TickError> {
        self.engine.process_tick(dt_seconds, now_ms)?;
        let interval = self.saves.config().autosave_interval_ms;
        match self.last_saved_at {
            None => self.last_saved_at = Some(now_ms),
            Some(last) if interval > 0 && now_ms.saturating_sub(last) >= interval => {
                self.save(now_ms);
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn emergency_save(&mut self) {
        let now_ms = self.engine.state().last_played_at;
        if self.save(now_ms) {
            tracing::info!(timestamp = now_ms, "emergency save written");
        } else {
            tracing::error!("emergency save failed");
        }
    }

    fn loop_paused(&mut self, consecutive_errors: u32) {
        self.engine.loop_paused(consecutive_errors);
    }
}
