//! Loudness-driven time offset shared by every animated parameter.
//!
//! Sustained loud passages push the offset forward; quiet passages let it
//! relax proportionally back to zero. Two thresholds give the accumulator
//! hysteresis: starting from rest needs the higher one, keeping it moving only
//! needs the lower one.

use tracing::debug;

use crate::{
    config::TimeOffsetConfig,
    sample::finite_or_zero,
    tempo::{time_constant, EnvelopeSmoother},
};

/// An offset above this is considered "moving" and uses the decay threshold.
pub const OFFSET_HYSTERESIS: f32 = 0.01;

/// Offsets below this snap to zero so decay terminates.
pub const OFFSET_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct TimeOffsetManager {
    config: TimeOffsetConfig,
    offset: f32,
    smoothed: EnvelopeSmoother,
    accumulating: bool,
}

impl Default for TimeOffsetManager {
    fn default() -> Self {
        Self::new(TimeOffsetConfig::default())
    }
}

impl TimeOffsetManager {
    pub fn new(config: TimeOffsetConfig) -> Self {
        Self {
            config,
            offset: 0.0,
            smoothed: EnvelopeSmoother::default(),
            accumulating: false,
        }
    }

    pub fn config(&self) -> &TimeOffsetConfig {
        &self.config
    }

    /// Turns loudness-driven accumulation on or off. While off the offset
    /// only decays.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Advances the accumulator by one frame and returns the smoothed offset.
    pub fn update(&mut self, level: f32, dt: f32, bpm: f32) -> f32 {
        if dt.is_nan() || dt <= 0.0 {
            debug!(dt, "skipping time offset update for non-positive delta");
            return self.smoothed.value();
        }

        let level = finite_or_zero(level).max(0.0);
        let threshold = if self.offset > OFFSET_HYSTERESIS {
            self.config.decay_threshold
        } else {
            self.config.accumulate_threshold
        };

        self.accumulating = self.config.enabled && level > threshold;
        if self.accumulating {
            let easing = self.config.curve.solve(level);
            let accumulation = level * self.config.accumulation_rate * dt * easing;
            self.offset = (self.offset + accumulation).min(self.config.max_offset);
        } else {
            self.offset = (self.offset - self.offset * self.config.decay_rate * dt).max(0.0);
            if self.offset < OFFSET_EPSILON {
                self.offset = 0.0;
            }
        }

        let attack = time_constant(self.config.attack, bpm, self.config.fallback_seconds);
        let release = time_constant(self.config.release, bpm, self.config.fallback_seconds);
        let smoothed = self.smoothed.step(self.offset, dt, attack, release);
        if smoothed < OFFSET_EPSILON && self.offset == 0.0 {
            self.smoothed.reset();
        }
        self.smoothed.value()
    }

    /// The raw, unsmoothed offset.
    pub fn time_offset(&self) -> f32 {
        self.offset
    }

    pub fn smoothed_offset(&self) -> f32 {
        self.smoothed.value()
    }

    /// Whether the last update added to the offset.
    pub fn is_accumulating(&self) -> bool {
        self.accumulating
    }

    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.smoothed.reset();
        self.accumulating = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn run(manager: &mut TimeOffsetManager, level: f32, frames: usize) {
        for _ in 0..frames {
            manager.update(level, DT, 120.0);
        }
    }

    #[test]
    fn loud_audio_accumulates_and_quiet_audio_decays() {
        let mut manager = TimeOffsetManager::default();
        run(&mut manager, 0.8, 120);
        let peak = manager.time_offset();
        assert!(peak > 0.1, "offset should grow: {peak}");
        assert!(manager.is_accumulating());

        run(&mut manager, 0.0, 60);
        assert!(manager.time_offset() < peak);
        assert!(!manager.is_accumulating());
    }

    #[test]
    fn hysteresis_needs_the_higher_threshold_from_rest() {
        let mut manager = TimeOffsetManager::default();
        run(&mut manager, 0.25, 60);
        assert_eq!(manager.time_offset(), 0.0);

        run(&mut manager, 0.8, 30);
        let moving = manager.time_offset();
        assert!(moving > OFFSET_HYSTERESIS);

        run(&mut manager, 0.25, 30);
        assert!(manager.time_offset() > moving);
    }

    #[test]
    fn offset_is_clamped_to_maximum() {
        let config = TimeOffsetConfig {
            accumulation_rate: 1000.0,
            max_offset: 2.0,
            ..TimeOffsetConfig::default()
        };
        let mut manager = TimeOffsetManager::new(config);
        run(&mut manager, 1.0, 60);
        assert_eq!(manager.time_offset(), 2.0);
    }

    #[test]
    fn disabled_offset_only_decays_and_reaches_zero() {
        let mut manager = TimeOffsetManager::default();
        run(&mut manager, 1.0, 240);
        manager.set_enabled(false);

        let mut previous = manager.time_offset();
        assert!(previous > 0.0);
        let levels = [1.0, 0.0, 0.9, 0.5, 1.0, 0.31];
        for frame in 0..1200 {
            manager.update(levels[frame % levels.len()], DT, 120.0);
            let offset = manager.time_offset();
            assert!(offset <= previous);
            assert!(offset >= 0.0);
            previous = offset;
        }
        assert_eq!(manager.time_offset(), 0.0);
        assert!(manager.smoothed_offset() < 1e-3);
    }

    #[test]
    fn smoothed_offset_lags_behind_raw_offset() {
        let mut manager = TimeOffsetManager::default();
        manager.update(1.0, DT, 120.0);
        assert!(manager.smoothed_offset() < manager.time_offset());
    }

    #[test]
    fn non_positive_delta_skips_the_frame() {
        let mut manager = TimeOffsetManager::default();
        run(&mut manager, 1.0, 10);
        let before = manager.time_offset();
        manager.update(1.0, 0.0, 120.0);
        manager.update(1.0, -0.5, 120.0);
        assert_eq!(manager.time_offset(), before);
    }

    #[test]
    fn reset_zeroes_both_offsets() {
        let mut manager = TimeOffsetManager::default();
        run(&mut manager, 1.0, 60);
        manager.reset();
        assert_eq!(manager.time_offset(), 0.0);
        assert_eq!(manager.smoothed_offset(), 0.0);
    }
}
