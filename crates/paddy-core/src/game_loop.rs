//! Host-driven tick scheduling.
//!
//! The loop owns no timer of its own. The host asks [`GameLoop::next_delay_ms`]
//! how long to wait, then calls [`GameLoop::on_timer`] with the current wall
//! clock. Real elapsed time becomes a simulation delta and is handed to a
//! [`TickTarget`].

use crate::config::LoopConfig;
use crate::curve::CurveError;

/// A failed tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickError {
    #[error("curve evaluation failed: {0}")]
    Curve(#[from] CurveError),
    #[error("tick delta is not a finite non-negative number: {0}")]
    InvalidDelta(f64),
    #[error("{0}")]
    Host(String),
}

/// Something the loop can drive.
pub trait TickTarget {
    /// Advance the simulation by `dt_seconds` of game time.
    fn tick(&mut self, dt_seconds: f64, now_ms: u64) -> Result<(), TickError>;

    /// Persist whatever can be persisted. Called once when the loop pauses
    /// itself after repeated failures.
    fn emergency_save(&mut self);

    /// Told after the loop paused itself.
    fn loop_paused(&mut self, _consecutive_errors: u32) {}
}

/// What one timer callback did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Loop stopped or paused; nothing ran.
    Idle,
    Ticked { dt_seconds: f64 },
    Failed { consecutive_errors: u32 },
    /// The failure limit was reached and the loop paused itself.
    SelfPaused { consecutive_errors: u32 },
}

#[derive(Debug, Clone)]
pub struct GameLoop {
    config: LoopConfig,
    running: bool,
    paused: bool,
    visible: bool,
    last_tick_at: Option<u64>,
    consecutive_errors: u32,
}

impl GameLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            running: false,
            paused: false,
            visible: true,
            last_tick_at: None,
            consecutive_errors: 0,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn start(&mut self, now_ms: u64) {
        self.running = true;
        self.paused = false;
        self.consecutive_errors = 0;
        self.last_tick_at = Some(now_ms);
        tracing::debug!(now_ms, "game loop started");
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.last_tick_at = None;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume after a pause. Time spent paused is not ticked; offline
    /// catch-up covers it when the host wants it credited.
    pub fn resume(&mut self, now_ms: u64) {
        if !self.running {
            return;
        }
        self.paused = false;
        self.consecutive_errors = 0;
        self.last_tick_at = Some(now_ms);
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Running and not paused.
    pub fn is_running(&self) -> bool {
        self.running && !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Game-time seconds per real second. The multiplier is only honoured in
    /// dev mode.
    pub fn time_multiplier(&self) -> f64 {
        if self.config.dev_mode && self.config.time_multiplier.is_finite() {
            self.config.time_multiplier.max(0.0)
        } else {
            1.0
        }
    }

    /// How long the host should wait before the next [`Self::on_timer`], or
    /// `None` when nothing should be scheduled.
    pub fn next_delay_ms(&self) -> Option<u64> {
        if !self.is_running() {
            return None;
        }
        Some(if self.visible {
            self.config.base_tick_ms
        } else {
            self.config.idle_tick_ms
        })
    }

    /// Run one tick for the time elapsed since the previous one.
    pub fn on_timer(&mut self, now_ms: u64, target: &mut dyn TickTarget) -> TickOutcome {
        if !self.is_running() {
            return TickOutcome::Idle;
        }
        let last = self.last_tick_at.unwrap_or(now_ms);
        self.last_tick_at = Some(now_ms);
        let dt_seconds = now_ms.saturating_sub(last) as f64 / 1000.0 * self.time_multiplier();

        match target.tick(dt_seconds, now_ms) {
            Ok(()) => {
                self.consecutive_errors = 0;
                TickOutcome::Ticked { dt_seconds }
            }
            Err(err) => {
                self.consecutive_errors += 1;
                let consecutive_errors = self.consecutive_errors;
                tracing::warn!(error = %err, consecutive_errors, "tick failed");
                if consecutive_errors >= self.config.max_consecutive_errors.max(1) {
                    tracing::error!(consecutive_errors, "too many consecutive tick failures; pausing");
                    self.paused = true;
                    target.emergency_save();
                    target.loop_paused(consecutive_errors);
                    TickOutcome::SelfPaused { consecutive_errors }
                } else {
                    TickOutcome::Failed { consecutive_errors }
                }
            }
        }
    }
}

impl Default for GameLoop {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        ticks: Vec<f64>,
        fail: bool,
        saves: u32,
        paused_with: Option<u32>,
    }

    impl TickTarget for Recorder {
        fn tick(&mut self, dt_seconds: f64, _now_ms: u64) -> Result<(), TickError> {
            if self.fail {
                return Err(TickError::Host("boom".into()));
            }
            self.ticks.push(dt_seconds);
            Ok(())
        }

        fn emergency_save(&mut self) {
            self.saves += 1;
        }

        fn loop_paused(&mut self, consecutive_errors: u32) {
            self.paused_with = Some(consecutive_errors);
        }
    }

    #[test]
    fn delay_follows_visibility() {
        let mut lp = GameLoop::default();
        assert_eq!(lp.next_delay_ms(), None);
        lp.start(0);
        assert_eq!(lp.next_delay_ms(), Some(100));
        lp.set_visible(false);
        assert_eq!(lp.next_delay_ms(), Some(1000));
        lp.pause();
        assert_eq!(lp.next_delay_ms(), None);
    }

    #[test]
    fn delta_is_real_elapsed_time() {
        let mut lp = GameLoop::default();
        let mut target = Recorder::default();
        lp.start(1_000);
        assert_eq!(lp.on_timer(1_100, &mut target), TickOutcome::Ticked { dt_seconds: 0.1 });
        lp.on_timer(1_350, &mut target);
        assert_eq!(target.ticks, vec![0.1, 0.25]);
    }

    #[test]
    fn multiplier_only_applies_in_dev_mode() {
        let config = LoopConfig {
            time_multiplier: 10.0,
            ..LoopConfig::default()
        };
        let mut target = Recorder::default();
        let mut lp = GameLoop::new(config.clone());
        lp.start(0);
        lp.on_timer(1_000, &mut target);

        let mut dev = GameLoop::new(LoopConfig { dev_mode: true, ..config });
        dev.start(0);
        dev.on_timer(1_000, &mut target);
        assert_eq!(target.ticks, vec![1.0, 10.0]);
    }

    #[test]
    fn stopped_loop_does_nothing() {
        let mut lp = GameLoop::default();
        let mut target = Recorder::default();
        assert_eq!(lp.on_timer(500, &mut target), TickOutcome::Idle);
        assert!(target.ticks.is_empty());
    }

    #[test]
    fn five_failures_pause_and_save() {
        let mut lp = GameLoop::default();
        let mut target = Recorder {
            fail: true,
            ..Recorder::default()
        };
        lp.start(0);
        for i in 1..=4 {
            assert_eq!(
                lp.on_timer(i * 100, &mut target),
                TickOutcome::Failed { consecutive_errors: i as u32 }
            );
        }
        assert_eq!(target.saves, 0);
        assert_eq!(
            lp.on_timer(500, &mut target),
            TickOutcome::SelfPaused { consecutive_errors: 5 }
        );
        assert_eq!(target.saves, 1);
        assert_eq!(target.paused_with, Some(5));
        assert!(lp.is_paused());
        assert_eq!(lp.on_timer(600, &mut target), TickOutcome::Idle);
    }

    #[test]
    fn success_resets_the_error_count() {
        let mut lp = GameLoop::default();
        let mut target = Recorder {
            fail: true,
            ..Recorder::default()
        };
        lp.start(0);
        lp.on_timer(100, &mut target);
        lp.on_timer(200, &mut target);
        assert_eq!(lp.consecutive_errors(), 2);
        target.fail = false;
        lp.on_timer(300, &mut target);
        assert_eq!(lp.consecutive_errors(), 0);
    }

    #[test]
    fn resume_does_not_tick_paused_time() {
        let mut lp = GameLoop::default();
        let mut target = Recorder::default();
        lp.start(0);
        lp.pause();
        lp.resume(60_000);
        lp.on_timer(60_100, &mut target);
        assert_eq!(target.ticks, vec![0.1]);
    }
}
