//! Save-format version migrations.
//!
//! Saves carry the format version they were written with. Migrations
//! rewrite the JSON payload one version at a time, so a save from several
//! releases ago loads by chaining every step in between.

use std::collections::BTreeMap;

use serde_json::Value;

/// Errors that can occur during migration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MigrationError {
    #[error("no migration path from version {from} to version {to}")]
    NoMigrationPath { from: u32, to: u32 },
    #[error("migration from version {from} to version {to} failed: {reason}")]
    MigrationFailed { from: u32, to: u32, reason: String },
}

/// Transforms a payload from one version to the next.
pub type MigrationFn = fn(Value) -> Result<Value, MigrationError>;

/// Migration steps keyed by source version. Each step migrates
/// `version N` to `version N + 1`.
pub struct MigrationRegistry {
    migrations: BTreeMap<u32, MigrationFn>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Register a migration from `from_version` to `from_version + 1`.
    pub fn register(&mut self, from_version: u32, migrate: MigrationFn) {
        self.migrations.insert(from_version, migrate);
    }

    /// Whether every step from `from` to `to` is registered.
    pub fn can_migrate(&self, from: u32, to: u32) -> bool {
        if from >= to {
            return from == to;
        }
        (from..to).all(|v| self.migrations.contains_key(&v))
    }

    /// Migrate `data` from version `from` to version `to`.
    ///
    /// Returns the payload unchanged if `from == to`. Migrating backwards
    /// is never possible.
    pub fn migrate(&self, data: Value, from: u32, to: u32) -> Result<Value, MigrationError> {
        if from == to {
            return Ok(data);
        }
        if from > to {
            return Err(MigrationError::NoMigrationPath { from, to });
        }

        let mut current = data;
        for version in from..to {
            let migrate_fn = self
                .migrations
                .get(&version)
                .ok_or(MigrationError::NoMigrationPath { from, to })?;
            current = migrate_fn(current)?;
            tracing::debug!(from = version, to = version + 1, "save migrated");
        }
        Ok(current)
    }

    /// Number of registered migration steps.
    pub fn step_count(&self) -> usize {
        self.migrations.len()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("versions", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
