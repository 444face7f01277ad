//! Local save with a rotating backup ring.
//!
//! Every save moves the previous main save into backup slot 0 and shifts
//! the older backups down, dropping the oldest. Loading walks the main
//! save and then each backup, newest first, and takes the first one that
//! verifies, migrates, and decodes. When none does the engine starts a
//! fresh game.

use paddy_core::engine::Engine;
use paddy_core::state::GameState;

use crate::config::SaveConfig;
use crate::migration::MigrationRegistry;
use crate::snapshot::{SaveSnapshot, SnapshotError};
use crate::store::{KeyValueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a successful load came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Main,
    Backup(usize),
}

#[derive(Debug)]
pub struct SaveSystem<S> {
    store: S,
    config: SaveConfig,
    migrations: MigrationRegistry,
}

impl<S: KeyValueStore> SaveSystem<S> {
    pub fn new(store: S, config: SaveConfig) -> Self {
        Self {
            store,
            config,
            migrations: MigrationRegistry::new(),
        }
    }

    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    pub fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    // -----------------------------------------------------------------------
    // Save
    // -----------------------------------------------------------------------

    /// Flush buffered production and snapshot the engine state.
    pub fn capture(&self, engine: &mut Engine, now_ms: u64) -> Result<SaveSnapshot, SnapshotError> {
        engine.flush_all();
        SaveSnapshot::capture(engine.state(), now_ms)
    }

    /// Persist the engine state under the main key, rotating backups.
    pub fn save(&mut self, engine: &mut Engine, now_ms: u64) -> Result<SaveSnapshot, SaveError> {
        let snapshot = self.capture(engine, now_ms)?;
        self.write(&snapshot)?;
        Ok(snapshot)
    }

    /// Persist an existing snapshot under the main key, rotating backups.
    pub fn write(&mut self, snapshot: &SaveSnapshot) -> Result<(), SaveError> {
        let json = snapshot.to_json()?;
        self.rotate_backups();
        self.store.set(&self.config.save_key, json)?;
        tracing::debug!(timestamp = snapshot.timestamp, "game saved");
        Ok(())
    }

    fn rotate_backups(&mut self) {
        let n = self.config.backup_count;
        if n == 0 {
            return;
        }
        for i in (1..n).rev() {
            if let Some(older) = self.store.get(&self.config.backup_key(i - 1))
                && let Err(e) = self.store.set(&self.config.backup_key(i), older)
            {
                tracing::warn!(slot = i, error = %e, "backup rotation failed");
            }
        }
        if let Some(main) = self.store.get(&self.config.save_key)
            && let Err(e) = self.store.set(&self.config.backup_key(0), main)
        {
            tracing::warn!(slot = 0, error = %e, "backup rotation failed");
        }
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Read and decode one key. `Ok(None)` if the key is empty.
    fn read(&self, key: &str) -> Result<Option<(SaveSnapshot, GameState)>, SnapshotError> {
        let Some(text) = self.store.get(key) else {
            return Ok(None);
        };
        let snapshot = SaveSnapshot::from_json(&text)?;
        let state = snapshot.decode(&self.migrations)?;
        Ok(Some((snapshot, state)))
    }

    /// Newest snapshot that decodes, with its source.
    pub fn latest(&self) -> Option<(LoadSource, SaveSnapshot, GameState)> {
        for (i, key) in self.config.load_order().iter().enumerate() {
            match self.read(key) {
                Ok(Some((snapshot, state))) => {
                    let source = match i {
                        0 => LoadSource::Main,
                        n => LoadSource::Backup(n - 1),
                    };
                    return Some((source, snapshot, state));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "save rejected"),
            }
        }
        None
    }

    /// Newest valid persisted snapshot.
    pub fn latest_snapshot(&self) -> Option<SaveSnapshot> {
        self.latest().map(|(_, snapshot, _)| snapshot)
    }

    /// Load the newest valid save into `engine`. Returns `false` and
    /// resets the engine when nothing loads.
    pub fn load(&mut self, engine: &mut Engine) -> bool {
        self.load_from(engine).is_some()
    }

    /// Like [`Self::load`], reporting which slot was used.
    pub fn load_from(&mut self, engine: &mut Engine) -> Option<LoadSource> {
        match self.latest() {
            Some((source, _, state)) => {
                if source != LoadSource::Main {
                    tracing::warn!(?source, "main save unusable; loaded a backup");
                }
                engine.load_state(state);
                Some(source)
            }
            None => {
                tracing::info!("no valid save found; starting fresh");
                engine.reset();
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reset / export / import
    // -----------------------------------------------------------------------

    /// Delete the save and every backup, and reset the engine.
    pub fn reset(&mut self, engine: &mut Engine) {
        for key in self.config.load_order() {
            self.store.remove(&key);
        }
        engine.reset();
    }

    /// Snapshot JSON of the current state.
    pub fn export_save(&self, engine: &mut Engine, now_ms: u64) -> Result<String, SnapshotError> {
        self.capture(engine, now_ms)?.to_json()
    }

    /// Load an exported snapshot into `engine` and persist it. Anything
    /// that fails verification leaves the engine untouched.
    pub fn import_save(&mut self, engine: &mut Engine, text: &str, now_ms: u64) -> bool {
        let state = match SaveSnapshot::from_json(text).and_then(|s| s.decode(&self.migrations)) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "import rejected");
                return false;
            }
        };
        engine.load_state(state);
        if let Err(e) = self.save(engine, now_ms) {
            tracing::warn!(error = %e, "imported save could not be persisted");
        }
        true
    }
}
