use paddy_core::game_loop::TickError;
use paddy_data::DataLoadError;
use paddy_save::SnapshotError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid save: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("offline recomputation failed: {0}")]
    Tick(#[from] TickError),
    #[error(transparent)]
    Data(#[from] DataLoadError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
