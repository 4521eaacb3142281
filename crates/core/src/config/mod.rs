use serde::{Deserialize, Serialize};

use crate::{
    curve::CubicBezier, reactivity::ReactivitySource, sample::BandTriple, tempo::NoteFraction,
    BeatBindError, Result,
};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub beat: BeatConfig,
    #[serde(default)]
    pub time_offset: TimeOffsetConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub pulse: PulseConfig,
}

impl EngineConfig {
    /// Defaults tuned for live playback at 60 Hz.
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Checks that the tunables are consistent with each other.
    pub fn validate(&self) -> Result<()> {
        self.beat.validate()?;
        self.time_offset.validate()?;
        self.performance.validate()?;
        self.pulse.validate()
    }
}

/// Tunables for the per-band beat detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Absolute floor a band must exceed before it can produce a beat.
    pub min_thresholds: BandTriple,
    /// Minimum rise over the previous frame for an onset.
    pub change_threshold: f32,
    /// Share of the decaying peak used as the dynamic threshold.
    pub peak_ratio: f32,
    pub min_interval_ms: f64,
    pub intensity_gain: f32,
    /// Beats older than this are considered stale and read as zero.
    pub stale_after_seconds: f32,
    pub legacy: LegacyBeatConfig,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            min_thresholds: BandTriple {
                bass: 0.08,
                mid: 0.06,
                treble: 0.05,
            },
            change_threshold: 0.07,
            peak_ratio: 0.85,
            min_interval_ms: 160.0,
            intensity_gain: 1.5,
            stale_after_seconds: 2.0,
            legacy: LegacyBeatConfig::default(),
        }
    }
}

impl BeatConfig {
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            self.min_thresholds.bass,
            self.min_thresholds.mid,
            self.min_thresholds.treble,
        ];
        if thresholds.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(BeatBindError::config(
                "beat thresholds must be finite and non-negative",
            ));
        }
        if self.min_interval_ms.is_nan() || self.min_interval_ms < 0.0 {
            return Err(BeatBindError::config("beat interval must be non-negative"));
        }
        if self.stale_after_seconds.is_nan() || self.stale_after_seconds <= 0.0 {
            return Err(BeatBindError::config("stale beat window must be positive"));
        }
        self.legacy.validate()
    }
}

/// Tunables for the bass-only global detector that feeds tempo estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyBeatConfig {
    /// Multiple of the running bass average a hit must exceed.
    pub threshold_ratio: f32,
    pub floor: f32,
    /// Weight of the previous value in the running bass average.
    pub bass_smoothing: f32,
    /// Weight of the previous estimate when folding in a new tempo reading.
    pub bpm_history_weight: f32,
    pub min_interval_seconds: f32,
    pub max_interval_seconds: f32,
}

impl Default for LegacyBeatConfig {
    fn default() -> Self {
        Self {
            threshold_ratio: 1.4,
            floor: 0.15,
            bass_smoothing: 0.9,
            bpm_history_weight: 0.7,
            min_interval_seconds: 0.1,
            max_interval_seconds: 2.0,
        }
    }
}

impl LegacyBeatConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.bass_smoothing)
            || !(0.0..=1.0).contains(&self.bpm_history_weight)
        {
            return Err(BeatBindError::config(
                "legacy smoothing weights must lie in [0, 1]",
            ));
        }
        if !(self.min_interval_seconds > 0.0 && self.min_interval_seconds < self.max_interval_seconds)
        {
            return Err(BeatBindError::config(
                "legacy tempo interval range is empty",
            ));
        }
        Ok(())
    }
}

/// Tunables for the loudness-driven time offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeOffsetConfig {
    /// When false the offset only ever decays.
    pub enabled: bool,
    pub source: ReactivitySource,
    /// Level needed to start accumulating from rest.
    pub accumulate_threshold: f32,
    /// Level needed to keep accumulating once the offset is moving.
    pub decay_threshold: f32,
    pub accumulation_rate: f32,
    /// Proportional decay per second.
    pub decay_rate: f32,
    pub max_offset: f32,
    pub curve: CubicBezier,
    pub attack: NoteFraction,
    pub release: NoteFraction,
    pub fallback_seconds: f32,
}

impl Default for TimeOffsetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: ReactivitySource::Volume,
            accumulate_threshold: 0.3,
            decay_threshold: 0.2,
            accumulation_rate: 0.5,
            decay_rate: 1.5,
            max_offset: 8.0,
            curve: CubicBezier::EASE_IN,
            attack: NoteFraction::SIXTEENTH,
            release: NoteFraction::HALF,
            fallback_seconds: 0.25,
        }
    }
}

impl TimeOffsetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.decay_threshold > self.accumulate_threshold {
            return Err(BeatBindError::config(
                "time offset decay threshold must not exceed the accumulate threshold",
            ));
        }
        if !(self.max_offset > 0.0 && self.decay_rate >= 0.0 && self.accumulation_rate >= 0.0) {
            return Err(BeatBindError::config(
                "time offset rates must be non-negative and the maximum positive",
            ));
        }
        Ok(())
    }
}

/// Tunables for the adaptive quality controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Number of frame durations averaged.
    pub window: usize,
    pub min_fps: f32,
    pub max_fps: f32,
    /// Frames between quality checks once the window is full.
    pub adjust_interval: u32,
    /// Frames between recovery checks while the window is still filling.
    pub early_check_interval: u32,
    pub degrade_ratio: f32,
    pub good_ratio: f32,
    pub bad_ratio: f32,
    pub frames_to_upgrade: u32,
    pub frames_to_downgrade: u32,
    pub max_dimension: u32,
    pub max_pixel_ratio: f32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window: 60,
            min_fps: 30.0,
            max_fps: 60.0,
            adjust_interval: 10,
            early_check_interval: 5,
            degrade_ratio: 0.8,
            good_ratio: 1.15,
            bad_ratio: 0.85,
            frames_to_upgrade: 30,
            frames_to_downgrade: 15,
            max_dimension: 2048,
            max_pixel_ratio: 2.0,
        }
    }
}

impl PerformanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(BeatBindError::config("frame window must not be empty"));
        }
        if !(self.min_fps > 0.0 && self.min_fps <= self.max_fps) {
            return Err(BeatBindError::config(
                "fps tiers must be positive with min_fps <= max_fps",
            ));
        }
        if self.bad_ratio > self.good_ratio {
            return Err(BeatBindError::config(
                "bad frame ratio must not exceed the good frame ratio",
            ));
        }
        Ok(())
    }
}

/// Tunables for hard-edged transient pulses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub threshold: f32,
    pub change_threshold: f32,
    pub window_ms: f64,
    pub max_triggers: usize,
    pub cooldown_ms: f64,
    pub duration_ms: f64,
    pub rest_value: f32,
    pub active_value: f32,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            change_threshold: 0.1,
            window_ms: 500.0,
            max_triggers: 4,
            cooldown_ms: 500.0,
            duration_ms: 120.0,
            rest_value: 1.0,
            active_value: 2.0,
        }
    }
}

impl PulseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_triggers == 0 {
            return Err(BeatBindError::config("pulse rate limit must allow one trigger"));
        }
        if !(self.duration_ms >= 0.0 && self.window_ms >= 0.0 && self.cooldown_ms >= 0.0) {
            return Err(BeatBindError::config("pulse timings must be non-negative"));
        }
        Ok(())
    }
}
