//! Offline catch-up window.
//!
//! Shared by the client (`Engine::apply_offline`) and the server-side
//! recompute so both credit exactly the same amount of time.

use serde::{Deserialize, Serialize};

use crate::config::OfflineConfig;

/// How much time an absence is worth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfflineWindow {
    /// Wall-clock time away, after the cap.
    pub offline_time_ms: u64,
    /// Efficiency applied to the capped time, in `[0, 1]`.
    pub efficiency: f64,
}

impl OfflineWindow {
    /// Simulated seconds to credit: capped time × efficiency.
    pub fn effective_seconds(&self) -> f64 {
        self.offline_time_ms as f64 / 1000.0 * self.efficiency
    }
}

/// Compute the window between `last_played_at` and `now_ms`.
///
/// Returns `None` for a game that has never ticked (`last_played_at == 0`)
/// and for absences shorter than `min_offline_ms`. A clock that went
/// backwards counts as no time away.
pub fn offline_window(last_played_at: u64, now_ms: u64, config: &OfflineConfig) -> Option<OfflineWindow> {
    if last_played_at == 0 {
        return None;
    }
    let elapsed = now_ms.saturating_sub(last_played_at);
    if elapsed < config.min_offline_ms.max(1) {
        return None;
    }
    let cap_ms = (config.max_offline_seconds.max(0.0) * 1000.0) as u64;
    let efficiency = if config.offline_efficiency.is_nan() {
        0.0
    } else {
        config.offline_efficiency.clamp(0.0, 1.0)
    };
    Some(OfflineWindow {
        offline_time_ms: elapsed.min(cap_ms),
        efficiency,
    })
}
