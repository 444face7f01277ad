//! Checksummed save snapshots.
//!
//! A snapshot wraps the JSON-serialized [`GameState`] together with the
//! format version, the save timestamp, and an FNV-1a checksum over the
//! serialized payload. A snapshot whose recomputed checksum does not match
//! is never trusted.

use paddy_core::hash::checksum_hex;
use paddy_core::state::GameState;
use serde::{Deserialize, Serialize};

use crate::migration::{MigrationError, MigrationRegistry};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current save format version. Increment when the persisted shape of
/// [`GameState`] changes and register a migration for the old version.
pub const SAVE_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },
    #[error("save from future version {0} (this build supports up to {SAVE_FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("corrupt save data: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSnapshot {
    pub version: u32,
    /// Wall-clock ms when the snapshot was taken.
    pub timestamp: u64,
    /// JSON-serialized [`GameState`].
    pub data: String,
    pub checksum: String,
}

impl SaveSnapshot {
    /// Serialize `state` at the current format version.
    pub fn capture(state: &GameState, timestamp: u64) -> Result<Self, SnapshotError> {
        let data = serde_json::to_string(state)?;
        Ok(Self::from_data(SAVE_FORMAT_VERSION, timestamp, data))
    }

    /// Wrap an already-serialized payload, computing its checksum.
    pub fn from_data(version: u32, timestamp: u64, data: String) -> Self {
        let checksum = checksum_hex(&data);
        Self {
            version,
            timestamp,
            data,
            checksum,
        }
    }

    pub fn verify(&self) -> Result<(), SnapshotError> {
        let computed = checksum_hex(&self.data);
        if computed != self.checksum {
            return Err(SnapshotError::ChecksumMismatch {
                stored: self.checksum.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Same payload. Timestamps are ignored.
    pub fn same_content(&self, other: &SaveSnapshot) -> bool {
        self.checksum == other.checksum && self.data == other.data
    }

    /// Verify, migrate to the current version, and decode the state.
    pub fn decode(&self, migrations: &MigrationRegistry) -> Result<GameState, SnapshotError> {
        self.verify()?;
        if self.version > SAVE_FORMAT_VERSION {
            return Err(SnapshotError::FutureVersion(self.version));
        }
        let value: serde_json::Value = serde_json::from_str(&self.data)?;
        let value = migrations.migrate(value, self.version, SAVE_FORMAT_VERSION)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and verify a snapshot envelope.
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        let snapshot: SaveSnapshot = serde_json::from_str(text)?;
        snapshot.verify()?;
        Ok(snapshot)
    }
}
