//! Per-band beat detection and tempo estimation.
//!
//! Two detectors run side by side on every frame:
//!
//! * the per-band detector compares each of bass/mid/treble against a dynamic
//!   threshold derived from the band's decaying peak and emits [`BeatEvent`]s;
//! * the global bass-only detector compares bass against its own running
//!   average and folds beat-to-beat intervals into the tempo estimate.
//!
//! Timestamps are absolute monotonic milliseconds. Beat times reported in the
//! [`BeatFrame`] are in seconds.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    config::BeatConfig,
    sample::{Band, BandSample, BandTriple},
};

/// A discrete beat on one band. Lives for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub band: Band,
    pub timestamp_ms: f64,
    pub intensity: f32,
    /// Stereo balance of the band at the moment of detection.
    pub stereo: f32,
}

/// Tempo estimate, either detected or supplied by track metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum BpmEstimate {
    #[default]
    Unknown,
    Detected(f32),
    /// Authoritative; detection never replaces it.
    Metadata(f32),
}

impl BpmEstimate {
    pub fn bpm(self) -> Option<f32> {
        match self {
            BpmEstimate::Unknown => None,
            BpmEstimate::Detected(bpm) | BpmEstimate::Metadata(bpm) => Some(bpm),
        }
    }

    pub fn is_metadata(self) -> bool {
        matches!(self, BpmEstimate::Metadata(_))
    }
}

/// Continuous per-band beat signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandBeat {
    /// Seconds since the last beat, 0 when there is none or it went stale.
    pub beat_time: f32,
    pub intensity: f32,
    /// Stereo balance frozen at the last beat.
    pub stereo: f32,
}

/// Continuous signal of the global bass detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalBeat {
    pub beat_time: f32,
    pub intensity: f32,
    pub bpm: Option<f32>,
}

/// Everything the detector produced for the current frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatFrame {
    pub bands: BandTriple<BandBeat>,
    pub global: GlobalBeat,
    /// Beats confirmed during this frame only.
    pub events: Vec<BeatEvent>,
}

impl BeatFrame {
    pub fn band(&self, band: Band) -> &BandBeat {
        &self.bands[band]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    timestamp_ms: f64,
    opened_ms: f64,
    value: f32,
    stereo: f32,
}

/// Running state of one band.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BeatState {
    pub time_since_last_beat: f32,
    pub last_intensity: f32,
    pub last_beat_ms: Option<f64>,
    pub previous_energy: f32,
    pub stereo: f32,
    candidate: Option<Candidate>,
}

impl BeatState {
    fn elapsed_since_beat(&self, now_ms: f64) -> Option<f64> {
        self.last_beat_ms.map(|last| now_ms - last)
    }

    /// Refreshes the continuous signal, zeroing it once the beat went stale.
    fn refresh(&mut self, now_ms: f64, stale_after_seconds: f32) -> BandBeat {
        let Some(elapsed) = self.elapsed_since_beat(now_ms) else {
            return BandBeat::default();
        };

        let beat_time = (elapsed.max(0.0) / 1000.0) as f32;
        if beat_time > stale_after_seconds {
            self.time_since_last_beat = 0.0;
            self.last_intensity = 0.0;
        } else {
            self.time_since_last_beat = beat_time;
        }

        BandBeat {
            beat_time: self.time_since_last_beat,
            intensity: self.last_intensity,
            stereo: self.stereo,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct GlobalState {
    smoothed_bass: f32,
    last_beat_ms: Option<f64>,
    intensity: f32,
    beat_time: f32,
}

/// Multi-band beat detector with a parallel bass-only tempo estimator.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: BeatConfig,
    bands: BandTriple<BeatState>,
    global: GlobalState,
    bpm: BpmEstimate,
    last_update_ms: Option<f64>,
    frame: BeatFrame,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(BeatConfig::default())
    }
}

impl BeatDetector {
    pub fn new(config: BeatConfig) -> Self {
        Self {
            config,
            bands: BandTriple::default(),
            global: GlobalState::default(),
            bpm: BpmEstimate::Unknown,
            last_update_ms: None,
            frame: BeatFrame::default(),
        }
    }

    pub fn config(&self) -> &BeatConfig {
        &self.config
    }

    /// Processes one frame and returns the frame's beat output.
    ///
    /// `now_ms` is an absolute monotonic timestamp in milliseconds.
    pub fn update(&mut self, sample: &BandSample, now_ms: f64) -> &BeatFrame {
        if let Some(last) = self.last_update_ms {
            if now_ms < last {
                debug!(now_ms, last, "beat detector clock went backwards");
            }
        }
        self.last_update_ms = Some(now_ms);

        self.frame.events.clear();
        for band in Band::ALL {
            self.update_band(band, sample, now_ms);
        }
        self.update_global(sample.bass, now_ms);

        self.frame.global = GlobalBeat {
            beat_time: self.global.beat_time,
            intensity: self.global.intensity,
            bpm: self.bpm.bpm(),
        };
        &self.frame
    }

    /// Output of the most recent [`BeatDetector::update`].
    pub fn frame(&self) -> &BeatFrame {
        &self.frame
    }

    pub fn band_state(&self, band: Band) -> &BeatState {
        &self.bands[band]
    }

    /// The global detector's continuous signal.
    pub fn global(&self) -> GlobalBeat {
        self.frame.global
    }

    pub fn bpm_estimate(&self) -> BpmEstimate {
        self.bpm
    }

    pub fn bpm(&self) -> Option<f32> {
        self.bpm.bpm()
    }

    /// Installs a tempo from track metadata. The estimate is then fixed:
    /// neither detection nor a different metadata tempo changes it until
    /// [`BeatDetector::reset`].
    pub fn set_metadata_bpm(&mut self, bpm: f32) {
        if !bpm.is_finite() || bpm <= 0.0 {
            warn!(bpm, "ignoring invalid metadata tempo");
            return;
        }
        match self.bpm {
            BpmEstimate::Metadata(current) if current == bpm => return,
            BpmEstimate::Metadata(current) => {
                debug!(current, ignored = bpm, "metadata tempo already set");
                return;
            }
            _ => debug!(bpm, "using metadata tempo"),
        }
        self.bpm = BpmEstimate::Metadata(bpm);
        self.frame.global.bpm = Some(bpm);
    }

    /// Forgets all beats and the tempo estimate, including metadata.
    pub fn reset(&mut self) {
        self.bands = BandTriple::default();
        self.global = GlobalState::default();
        self.bpm = BpmEstimate::Unknown;
        self.last_update_ms = None;
        self.frame = BeatFrame::default();
    }

    fn update_band(&mut self, band: Band, sample: &BandSample, now_ms: f64) {
        let value = sample.energy(band);
        let peak = sample.peaks[band];
        let stereo = sample.stereo[band];
        let min_threshold = self.config.min_thresholds[band];
        let threshold = (peak * self.config.peak_ratio).max(min_threshold);
        let min_interval = self.config.min_interval_ms;
        let gain = self.config.intensity_gain;

        let state = &mut self.bands[band];
        let rise = value - state.previous_energy;
        state.previous_energy = value;

        // A candidate follows the rise up to its peak and is confirmed on the
        // first frame that does not climb further.
        if let Some(candidate) = state.candidate.as_mut() {
            if value > candidate.value && now_ms - candidate.opened_ms < min_interval {
                candidate.timestamp_ms = now_ms;
                candidate.value = value;
                candidate.stereo = stereo;
            } else {
                let confirmed = *candidate;
                state.candidate = None;
                let event = BeatEvent {
                    band,
                    timestamp_ms: confirmed.timestamp_ms,
                    intensity: (confirmed.value * gain).min(1.0),
                    stereo: confirmed.stereo,
                };
                state.last_beat_ms = Some(event.timestamp_ms);
                state.last_intensity = event.intensity;
                state.stereo = event.stereo;
                trace!(%band, intensity = event.intensity, "beat detected");
                self.frame.events.push(event);
            }
        }

        if state.candidate.is_none() {
            let interval_ok = state
                .elapsed_since_beat(now_ms)
                .map(|elapsed| elapsed >= min_interval)
                .unwrap_or(true);
            let onset = value > threshold
                && value > min_threshold
                && interval_ok
                && rise > self.config.change_threshold;
            if onset {
                state.candidate = Some(Candidate {
                    timestamp_ms: now_ms,
                    opened_ms: now_ms,
                    value,
                    stereo,
                });
            }
        }

        self.frame.bands[band] = state.refresh(now_ms, self.config.stale_after_seconds);
    }

    fn update_global(&mut self, bass: f32, now_ms: f64) {
        let legacy = &self.config.legacy;
        let global = &mut self.global;

        let threshold = (global.smoothed_bass * legacy.threshold_ratio).max(legacy.floor);
        let interval_ok = global
            .last_beat_ms
            .map(|last| now_ms - last >= self.config.min_interval_ms)
            .unwrap_or(true);

        if bass > threshold && interval_ok {
            if let Some(last) = global.last_beat_ms {
                let interval = ((now_ms - last) / 1000.0) as f32;
                if (legacy.min_interval_seconds..=legacy.max_interval_seconds).contains(&interval)
                {
                    let instantaneous = 60.0 / interval;
                    self.bpm = match self.bpm {
                        BpmEstimate::Metadata(_) => self.bpm,
                        BpmEstimate::Unknown => BpmEstimate::Detected(instantaneous),
                        BpmEstimate::Detected(previous) => BpmEstimate::Detected(
                            previous * legacy.bpm_history_weight
                                + instantaneous * (1.0 - legacy.bpm_history_weight),
                        ),
                    };
                }
            }
            global.last_beat_ms = Some(now_ms);
            global.intensity = (bass * self.config.intensity_gain).min(1.0);
        }

        global.smoothed_bass =
            global.smoothed_bass * legacy.bass_smoothing + bass * (1.0 - legacy.bass_smoothing);

        global.beat_time = match global.last_beat_ms {
            Some(last) => ((now_ms - last).max(0.0) / 1000.0) as f32,
            None => 0.0,
        };
        if global.beat_time > self.config.stale_after_seconds {
            global.beat_time = 0.0;
            global.intensity = 0.0;
        }
    }
}
