use serde::{Deserialize, Serialize};

/// Local persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Key of the main save.
    pub save_key: String,
    /// Backups live under `{backup_prefix}.{i}`, newest at `i = 0`.
    pub backup_prefix: String,
    pub backup_count: usize,
    /// Minimum wall-clock gap between automatic saves. `0` disables them.
    pub autosave_interval_ms: u64,
}

impl SaveConfig {
    pub fn backup_key(&self, index: usize) -> String {
        format!("{}.{index}", self.backup_prefix)
    }

    /// Main key followed by every backup key, newest first.
    pub fn load_order(&self) -> Vec<String> {
        std::iter::once(self.save_key.clone())
            .chain((0..self.backup_count).map(|i| self.backup_key(i)))
            .collect()
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            save_key: "save".into(),
            backup_prefix: "save.backup".into(),
            backup_count: 3,
            autosave_interval_ms: 30_000,
        }
    }
}
