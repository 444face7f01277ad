//! Content pipeline: reads a data directory into a [`CatalogueBuilder`]
//! and freezes it into a [`Catalogue`].
//!
//! A directory may hold a single `content` bundle, per-kind files
//! (`resources`, `buildings`, `upgrades`, `stacks`, `eras`, `curves`), or
//! both. Per-kind lists are appended after the bundle, so duplicate ids
//! across files surface as a registry error at build time.

use std::collections::HashMap;
use std::path::Path;

use paddy_core::config::{EngineConfig, EvalMode};
use paddy_core::curve::Curve;
use paddy_core::id::CurveId;
use paddy_core::registry::{Catalogue, CatalogueBuilder};

use crate::loader::{DataLoadError, deserialize_file, deserialize_list, find_data_file};

/// Read every content file in `dir`.
///
/// Fails with `MissingRequired("resources")` when the directory defines
/// neither a bundle nor a resource list.
pub fn load_content(dir: &Path) -> Result<CatalogueBuilder, DataLoadError> {
    let bundle = find_data_file(dir, "content")?;
    let mut builder = match &bundle {
        Some(path) => deserialize_file(path)?,
        None => CatalogueBuilder::new(),
    };

    let resources = find_data_file(dir, "resources")?;
    if bundle.is_none() && resources.is_none() {
        return Err(DataLoadError::MissingRequired {
            file: "resources".into(),
            dir: dir.to_path_buf(),
        });
    }

    if let Some(path) = resources {
        builder.resources.extend(deserialize_list(&path, "resources")?);
    }
    if let Some(path) = find_data_file(dir, "buildings")? {
        builder.buildings.extend(deserialize_list(&path, "buildings")?);
    }
    if let Some(path) = find_data_file(dir, "upgrades")? {
        builder.upgrades.extend(deserialize_list(&path, "upgrades")?);
    }
    if let Some(path) = find_data_file(dir, "stacks")? {
        builder.stacks.extend(deserialize_list(&path, "stacks")?);
    }
    if let Some(path) = find_data_file(dir, "eras")? {
        builder.eras.extend(deserialize_list(&path, "eras")?);
    }
    if let Some(path) = find_data_file(dir, "curves")? {
        let curves: HashMap<CurveId, Curve> = deserialize_file(&path)?;
        builder.curves.extend(curves);
    }

    tracing::debug!(
        dir = %dir.display(),
        resources = builder.resources.len(),
        buildings = builder.buildings.len(),
        upgrades = builder.upgrades.len(),
        "content loaded"
    );
    Ok(builder)
}

/// Load and validate the content in `dir`.
pub fn load_catalogue(dir: &Path, mode: EvalMode) -> Result<Catalogue, DataLoadError> {
    Ok(load_content(dir)?.build(mode)?)
}

/// Load an engine config file. Missing fields take their defaults.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig, DataLoadError> {
    deserialize_file(path)
}
