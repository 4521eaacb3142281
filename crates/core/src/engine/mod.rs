//! Per-frame orchestration of detector, smoothing, offset, pulses and
//! quality control.

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    beat::{BeatDetector, BeatEvent},
    config::EngineConfig,
    mapping::{MappingMatrix, ParameterBinding, ParameterUpdate, PulseBinding},
    offset::TimeOffsetManager,
    performance::{PerformanceMonitor, ResizeHints},
    reactivity::{AudioFrame, AudioReactivityManager},
    sample::BandSample,
    timeline::FrameClock,
    Result,
};

/// Everything the engine produced for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameOutput {
    pub frame: u64,
    pub elapsed_ms: f64,
    pub updates: Vec<ParameterUpdate>,
    pub events: Vec<BeatEvent>,
    pub bpm: Option<f32>,
    /// Smoothed loudness-driven time offset.
    pub time_offset: f32,
}

impl FrameOutput {
    pub fn value(&self, target: &str) -> Option<f32> {
        self.updates
            .iter()
            .find(|update| update.target == target)
            .map(|update| update.value)
    }
}

/// Owns every stateful component and drives them in order once per frame.
///
/// Engines are plain values; several can run side by side, one per visual
/// layer or track.
#[derive(Debug)]
pub struct ReactiveEngine {
    config: EngineConfig,
    detector: BeatDetector,
    reactivity: AudioReactivityManager,
    time_offset: TimeOffsetManager,
    performance: PerformanceMonitor,
    mapping: MappingMatrix,
}

impl Default for ReactiveEngine {
    fn default() -> Self {
        Self::from_config(EngineConfig::live_defaults())
    }
}

impl ReactiveEngine {
    /// Validates `config` and builds an engine from it.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: EngineConfig) -> Self {
        Self {
            detector: BeatDetector::new(config.beat.clone()),
            reactivity: AudioReactivityManager::new(),
            time_offset: TimeOffsetManager::new(config.time_offset.clone()),
            performance: PerformanceMonitor::new(config.performance.clone()),
            mapping: MappingMatrix::with_pulse_defaults(config.pulse.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adds or replaces a parameter binding. A replaced binding loses its
    /// smoothing and speed state.
    pub fn bind(&mut self, binding: ParameterBinding) {
        let target = binding.target.clone();
        if self.mapping.bind(binding).is_some() {
            self.reactivity.reset(&target);
        }
    }

    pub fn unbind(&mut self, target: &str) -> Option<ParameterBinding> {
        let removed = self.mapping.unbind(target)?;
        self.reactivity.reset(target);
        Some(removed)
    }

    /// Adds or replaces a pulse. Pulses without their own config use
    /// [`EngineConfig::pulse`].
    pub fn add_pulse(&mut self, binding: PulseBinding) {
        self.mapping.add_pulse(binding);
    }

    pub fn remove_pulse(&mut self, target: &str) -> Option<PulseBinding> {
        self.mapping.remove_pulse(target)
    }

    /// Runs one frame. A missing sample is treated as silence.
    pub fn tick(&mut self, sample: Option<&BandSample>, clock: &FrameClock) -> FrameOutput {
        let sample = sample.map(|sample| {
            if sample.has_non_finite() {
                debug!(frame = clock.frame, "replacing non-finite analysis values");
            }
            sample.sanitized()
        });

        if let Some(bpm) = sample.as_ref().and_then(|sample| sample.bpm_override) {
            self.detector.set_metadata_bpm(bpm);
        }

        let now_ms = clock.elapsed_ms;
        let dt = clock.delta_seconds;
        match &sample {
            Some(sample) => self.detector.update(sample, now_ms),
            None => self.detector.update(&BandSample::silent(), now_ms),
        };

        let frame = AudioFrame::new(sample.as_ref(), self.detector.frame());
        let level = frame.source_value(self.config.time_offset.source);
        let bpm = frame.bpm();
        let time_offset = self.time_offset.update(level, dt, bpm);
        let updates = self
            .mapping
            .evaluate(&mut self.reactivity, &frame, dt, now_ms)
            .to_vec();

        FrameOutput {
            frame: clock.frame,
            elapsed_ms: now_ms,
            updates,
            events: frame.beats.events.clone(),
            bpm: self.detector.bpm(),
            time_offset,
        }
    }

    /// Records the duration of the frame that just completed.
    pub fn record_frame(&mut self, duration_ms: f32) {
        self.performance.record_frame(duration_ms);
    }

    pub fn quality(&self) -> f32 {
        self.performance.quality()
    }

    pub fn resize_hints(&self) -> ResizeHints {
        self.performance.resize_hints()
    }

    pub fn set_metadata_bpm(&mut self, bpm: f32) {
        self.detector.set_metadata_bpm(bpm);
    }

    pub fn set_time_offset_enabled(&mut self, enabled: bool) {
        self.time_offset.set_enabled(enabled);
    }

    pub fn bpm(&self) -> Option<f32> {
        self.detector.bpm()
    }

    pub fn time_offset(&self) -> f32 {
        self.time_offset.smoothed_offset()
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn reactivity(&self) -> &AudioReactivityManager {
        &self.reactivity
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    pub fn mapping(&self) -> &MappingMatrix {
        &self.mapping
    }

    /// Clears all audio-derived state, e.g. on a track change. Bindings and
    /// performance history survive.
    pub fn reset(&mut self) {
        info!(bindings = self.mapping.bindings().len(), "resetting reactive state");
        self.detector.reset();
        self.reactivity.reset_all();
        self.time_offset.reset();
        self.mapping.reset_pulses();
    }

    /// Like [`ReactiveEngine::reset`], and also forgets performance history.
    pub fn reset_all(&mut self) {
        self.reset();
        self.performance.reset();
    }
}
