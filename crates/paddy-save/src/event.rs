use crate::save_system::LoadSource;
use crate::sync::Resolution;

/// Persistence and sync notifications for the host UI. Drained with
/// [`crate::game::Game::take_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveEvent {
    Saved { timestamp: u64 },
    SaveFailed { reason: String },
    Loaded { source: LoadSource },
    /// Nothing valid was stored; a fresh game started.
    StartedFresh,
    Imported,
    SyncCompleted { at_ms: u64, adjusted: bool },
    SyncFailed { reason: String },
    ConflictDetected { local_timestamp: Option<u64>, remote_timestamp: u64 },
    ConflictResolved { resolution: Resolution },
}
