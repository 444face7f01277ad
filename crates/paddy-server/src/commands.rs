//! Offline tooling behind the `paddy-server` binary.
//!
//! Each command reads its inputs from disk and returns the JSON document
//! the binary prints. Any failure is an error; the binary turns it into a
//! non-zero exit.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use paddy_core::config::{EngineConfig, EvalMode};
use paddy_data::{DataLoadError, load_catalogue, load_engine_config};
use paddy_save::SaveSnapshot;
use paddy_save::migration::MigrationRegistry;

use crate::error::ServiceError;
use crate::offline::OfflineProgressService;

/// Parse and checksum-verify a save envelope file.
pub fn read_snapshot(path: &Path) -> Result<SaveSnapshot, ServiceError> {
    let text = std::fs::read_to_string(path).map_err(DataLoadError::from)?;
    Ok(SaveSnapshot::from_json(&text)?)
}

/// Load a content directory leniently and list what it holds.
pub fn validate(content: &Path) -> Result<Value, ServiceError> {
    let catalogue = load_catalogue(content, EvalMode::Lenient)?;
    let issues: Vec<String> = catalogue.issues().iter().map(ToString::to_string).collect();
    for issue in &issues {
        tracing::warn!("{issue}");
    }
    Ok(json!({
        "resources": catalogue.resources().len(),
        "buildings": catalogue.buildings().len(),
        "upgrades": catalogue.upgrades().len(),
        "issues": issues,
    }))
}

/// Verify a save envelope and decode its state.
pub fn verify(save: &Path) -> Result<Value, ServiceError> {
    let snapshot = read_snapshot(save)?;
    let state = snapshot.decode(&MigrationRegistry::new())?;
    Ok(json!({
        "version": snapshot.version,
        "timestamp": snapshot.timestamp,
        "checksum": snapshot.checksum,
        "last_played_at": state.last_played_at,
        "state_hash": format!("{:016x}", state.state_hash()),
    }))
}

/// Recompute what a save earns between `since` (default: its last played
/// time) and `now`. `null` when the absence is too short to count.
pub fn offline(
    content: &Path,
    config: Option<&Path>,
    save: &Path,
    now: u64,
    since: Option<u64>,
) -> Result<Value, ServiceError> {
    let config = match config {
        Some(path) => load_engine_config(path)?,
        None => EngineConfig::default(),
    };
    let catalogue = Arc::new(load_catalogue(content, config.eval_mode)?);
    let state = read_snapshot(save)?.decode(&MigrationRegistry::new())?;
    let since = since.unwrap_or(state.last_played_at);

    let service = OfflineProgressService::new(catalogue, config);
    match service.calculate_offline_progress(&state, since, now)? {
        Some(progress) => Ok(serde_json::to_value(&progress)?),
        None => Ok(Value::Null),
    }
}
