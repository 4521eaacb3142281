//! Audio-reactive parameter values.
//!
//! [`AudioReactivityManager`] turns a [`ReactivityConfig`] plus the current
//! frame into a value for one named parameter: read the source metric, apply
//! a tempo-relative envelope, the legacy invert/strength knobs, a response
//! curve, and finally the mode-specific mapping.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    beat::BeatFrame,
    curve::{CubicBezier, CurveCache},
    sample::{finite_or_zero, Band, BandSample, DEFAULT_CUSTOM_BINS},
    tempo::{smooth, time_constant, NoteFraction, DEFAULT_FALLBACK_SECONDS},
    BeatBindError,
};

/// Beat times are reported relative to this span when used as a source.
pub const BEAT_TIME_SPAN_SECONDS: f32 = 2.0;

/// Tempo is reported relative to this value when used as a source.
pub const TEMPO_SPAN_BPM: f32 = 200.0;

/// Rate at which a speed accumulator approaches a higher target, per second.
pub const SPEED_APPROACH_RATE: f32 = 3.0;

/// Rate at which a speed accumulator falls back to its base without audio.
pub const SPEED_DECAY_RATE: f32 = 0.5;

/// Source levels at or below this count as silence for speed accumulation.
pub const SILENCE_FLOOR: f32 = 1e-3;

/// Every metric a parameter can react to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReactivitySource {
    #[default]
    Volume,
    Bass,
    Mid,
    Treble,
    BassPeak,
    MidPeak,
    TreblePeak,
    BassStereo,
    MidStereo,
    TrebleStereo,
    BassBeat,
    MidBeat,
    TrebleBeat,
    Beat,
    BassBeatTime,
    MidBeatTime,
    TrebleBeatTime,
    BeatTime,
    Tempo,
    /// Mean of bass and mid.
    Low,
    /// Mean of mid and treble.
    High,
    /// Mean of all custom bins.
    Spectrum,
    /// Mean absolute stereo balance across the bands.
    StereoWidth,
    /// One of the custom frequency bins.
    Custom(u8),
}

impl ReactivitySource {
    /// All sources except the custom bins.
    pub const NAMED: [ReactivitySource; 23] = [
        ReactivitySource::Volume,
        ReactivitySource::Bass,
        ReactivitySource::Mid,
        ReactivitySource::Treble,
        ReactivitySource::BassPeak,
        ReactivitySource::MidPeak,
        ReactivitySource::TreblePeak,
        ReactivitySource::BassStereo,
        ReactivitySource::MidStereo,
        ReactivitySource::TrebleStereo,
        ReactivitySource::BassBeat,
        ReactivitySource::MidBeat,
        ReactivitySource::TrebleBeat,
        ReactivitySource::Beat,
        ReactivitySource::BassBeatTime,
        ReactivitySource::MidBeatTime,
        ReactivitySource::TrebleBeatTime,
        ReactivitySource::BeatTime,
        ReactivitySource::Tempo,
        ReactivitySource::Low,
        ReactivitySource::High,
        ReactivitySource::Spectrum,
        ReactivitySource::StereoWidth,
    ];

    /// Every source, custom bins included.
    pub fn all() -> impl Iterator<Item = ReactivitySource> {
        Self::NAMED
            .into_iter()
            .chain((0..DEFAULT_CUSTOM_BINS as u8).map(ReactivitySource::Custom))
    }

    fn name(self) -> &'static str {
        match self {
            ReactivitySource::Volume => "volume",
            ReactivitySource::Bass => "bass",
            ReactivitySource::Mid => "mid",
            ReactivitySource::Treble => "treble",
            ReactivitySource::BassPeak => "bassPeak",
            ReactivitySource::MidPeak => "midPeak",
            ReactivitySource::TreblePeak => "treblePeak",
            ReactivitySource::BassStereo => "bassStereo",
            ReactivitySource::MidStereo => "midStereo",
            ReactivitySource::TrebleStereo => "trebleStereo",
            ReactivitySource::BassBeat => "bassBeat",
            ReactivitySource::MidBeat => "midBeat",
            ReactivitySource::TrebleBeat => "trebleBeat",
            ReactivitySource::Beat => "beat",
            ReactivitySource::BassBeatTime => "bassBeatTime",
            ReactivitySource::MidBeatTime => "midBeatTime",
            ReactivitySource::TrebleBeatTime => "trebleBeatTime",
            ReactivitySource::BeatTime => "beatTime",
            ReactivitySource::Tempo => "tempo",
            ReactivitySource::Low => "low",
            ReactivitySource::High => "high",
            ReactivitySource::Spectrum => "spectrum",
            ReactivitySource::StereoWidth => "stereoWidth",
            ReactivitySource::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for ReactivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactivitySource::Custom(index) => write!(f, "custom{index}"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for ReactivitySource {
    type Err = BeatBindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(index) = s.strip_prefix("custom") {
            return index
                .parse::<u8>()
                .ok()
                .filter(|i| usize::from(*i) < DEFAULT_CUSTOM_BINS)
                .map(ReactivitySource::Custom)
                .ok_or_else(|| BeatBindError::UnknownSource(s.to_string()));
        }

        Self::NAMED
            .into_iter()
            .find(|source| source.name() == s)
            .ok_or_else(|| BeatBindError::UnknownSource(s.to_string()))
    }
}

impl TryFrom<String> for ReactivitySource {
    type Error = BeatBindError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReactivitySource> for String {
    fn from(value: ReactivitySource) -> Self {
        value.to_string()
    }
}

/// How the shaped level is turned into the parameter value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactivityMode {
    /// Remap into `min..max` when both are set, then clamp to `[0, 1]`.
    #[default]
    Additive,
    /// Clamp to `[0, 1]`; the caller interpolates its own range.
    Interpolation,
    /// Drive a never-decreasing speed accumulator.
    Speed,
}

/// Per-parameter reaction settings. Supplied by the host, never mutated here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactivityConfig {
    pub source: ReactivitySource,
    #[serde(default)]
    pub attack: Option<NoteFraction>,
    #[serde(default)]
    pub release: Option<NoteFraction>,
    #[serde(default)]
    pub curve: Option<CubicBezier>,
    #[serde(default)]
    pub mode: ReactivityMode,
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub strength: Option<f32>,
    #[serde(default)]
    pub min: Option<f32>,
    #[serde(default)]
    pub max: Option<f32>,
}

impl ReactivityConfig {
    pub fn new(source: ReactivitySource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn with_envelope(mut self, attack: NoteFraction, release: NoteFraction) -> Self {
        self.attack = Some(attack);
        self.release = Some(release);
        self
    }

    pub fn with_curve(mut self, curve: CubicBezier) -> Self {
        self.curve = Some(curve);
        self
    }

    pub fn with_mode(mut self, mode: ReactivityMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Attack and release notes; a missing one mirrors the other.
    pub fn envelope(&self) -> Option<(NoteFraction, NoteFraction)> {
        match (self.attack, self.release) {
            (Some(attack), Some(release)) => Some((attack, release)),
            (Some(note), None) | (None, Some(note)) => Some((note, note)),
            (None, None) => None,
        }
    }
}

/// Read-only view of everything a source can be taken from this frame.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    /// `None` when the analyser delivered nothing; treated as silence.
    pub sample: Option<&'a BandSample>,
    pub beats: &'a BeatFrame,
}

impl<'a> AudioFrame<'a> {
    pub fn new(sample: Option<&'a BandSample>, beats: &'a BeatFrame) -> Self {
        Self { sample, beats }
    }

    /// Current tempo, or 0 when unknown.
    pub fn bpm(&self) -> f32 {
        self.sample
            .and_then(|sample| sample.bpm_override)
            .or(self.beats.global.bpm)
            .unwrap_or(0.0)
    }

    /// Raw value of a metric. Sample-backed metrics read 0 without a sample.
    pub fn source_value(&self, source: ReactivitySource) -> f32 {
        let beats = self.beats;
        let beat_time = |t: f32| t / BEAT_TIME_SPAN_SECONDS;

        match source {
            ReactivitySource::BassBeat => return beats.band(Band::Bass).intensity,
            ReactivitySource::MidBeat => return beats.band(Band::Mid).intensity,
            ReactivitySource::TrebleBeat => return beats.band(Band::Treble).intensity,
            ReactivitySource::Beat => return beats.global.intensity,
            ReactivitySource::BassBeatTime => return beat_time(beats.band(Band::Bass).beat_time),
            ReactivitySource::MidBeatTime => return beat_time(beats.band(Band::Mid).beat_time),
            ReactivitySource::TrebleBeatTime => {
                return beat_time(beats.band(Band::Treble).beat_time)
            }
            ReactivitySource::BeatTime => return beat_time(beats.global.beat_time),
            ReactivitySource::Tempo => return self.bpm() / TEMPO_SPAN_BPM,
            _ => {}
        }

        let Some(sample) = self.sample else {
            return 0.0;
        };
        let balance = |stereo: f32| (stereo + 1.0) * 0.5;

        match source {
            ReactivitySource::Volume => sample.volume,
            ReactivitySource::Bass => sample.bass,
            ReactivitySource::Mid => sample.mid,
            ReactivitySource::Treble => sample.treble,
            ReactivitySource::BassPeak => sample.peaks.bass,
            ReactivitySource::MidPeak => sample.peaks.mid,
            ReactivitySource::TreblePeak => sample.peaks.treble,
            ReactivitySource::BassStereo => balance(sample.stereo.bass),
            ReactivitySource::MidStereo => balance(sample.stereo.mid),
            ReactivitySource::TrebleStereo => balance(sample.stereo.treble),
            ReactivitySource::Low => (sample.bass + sample.mid) * 0.5,
            ReactivitySource::High => (sample.mid + sample.treble) * 0.5,
            ReactivitySource::Spectrum => {
                if sample.bins.is_empty() {
                    0.0
                } else {
                    sample.bins.iter().sum::<f32>() / sample.bins.len() as f32
                }
            }
            ReactivitySource::StereoWidth => {
                (sample.stereo.bass.abs() + sample.stereo.mid.abs() + sample.stereo.treble.abs())
                    / 3.0
            }
            ReactivitySource::Custom(index) => sample.bin(usize::from(index)),
            ReactivitySource::BassBeat
            | ReactivitySource::MidBeat
            | ReactivitySource::TrebleBeat
            | ReactivitySource::Beat
            | ReactivitySource::BassBeatTime
            | ReactivitySource::MidBeatTime
            | ReactivitySource::TrebleBeatTime
            | ReactivitySource::BeatTime
            | ReactivitySource::Tempo => 0.0,
        }
    }
}

/// Owns the smoothing and speed state of every reactive parameter.
///
/// State is created lazily the first time a key is evaluated and lives until
/// [`AudioReactivityManager::reset`] or [`AudioReactivityManager::reset_all`].
#[derive(Debug)]
pub struct AudioReactivityManager {
    smoothing: HashMap<String, HashMap<ReactivitySource, f32>>,
    speed: HashMap<String, f32>,
    curves: CurveCache,
    fallback_seconds: f32,
}

impl Default for AudioReactivityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioReactivityManager {
    pub fn new() -> Self {
        Self::with_fallback(DEFAULT_FALLBACK_SECONDS)
    }

    /// Uses `fallback_seconds` as the envelope time constant while the tempo
    /// is unknown.
    pub fn with_fallback(fallback_seconds: f32) -> Self {
        Self {
            smoothing: HashMap::new(),
            speed: HashMap::new(),
            curves: CurveCache::new(),
            fallback_seconds,
        }
    }

    /// The parameter value in `[0, 1]`.
    pub fn smoothed_value(
        &mut self,
        key: &str,
        frame: &AudioFrame<'_>,
        config: &ReactivityConfig,
        dt: f32,
    ) -> f32 {
        let shaped = self.shaped_level(key, frame, config, dt);
        match config.mode {
            ReactivityMode::Interpolation | ReactivityMode::Speed => clamp_unit(shaped),
            ReactivityMode::Additive => match (config.min, config.max) {
                (Some(min), Some(max)) => clamp_unit(min + shaped * (max - min)),
                _ => clamp_unit(shaped),
            },
        }
    }

    /// [`AudioReactivityManager::smoothed_value`] mapped onto `min..max`.
    pub fn interpolated_value(
        &mut self,
        key: &str,
        frame: &AudioFrame<'_>,
        config: &ReactivityConfig,
        dt: f32,
        min: f32,
        max: f32,
    ) -> f32 {
        let level = self.smoothed_value(key, frame, config, dt);
        min + level * (max - min)
    }

    /// A speed that ratchets upward with the signal and only relaxes toward
    /// `start` when there is no audio. Never below `start`.
    pub fn accumulated_speed(
        &mut self,
        key: &str,
        frame: &AudioFrame<'_>,
        config: &ReactivityConfig,
        dt: f32,
        start: f32,
        target: f32,
    ) -> f32 {
        let level = clamp_unit(self.shaped_level(key, frame, config, dt));
        let has_signal = frame.sample.is_some()
            && finite_or_zero(frame.source_value(config.source)) > SILENCE_FLOOR;

        let accumulator = self.speed.entry(key.to_owned()).or_insert(start);
        if !accumulator.is_finite() {
            *accumulator = start;
        }
        if dt.is_nan() || dt <= 0.0 {
            return accumulator.max(start);
        }

        if has_signal {
            let target_speed = start + level * (target - start);
            if target_speed > *accumulator {
                *accumulator += (target_speed - *accumulator) * (SPEED_APPROACH_RATE * dt).min(1.0);
            }
        } else {
            *accumulator -= (*accumulator - start) * (SPEED_DECAY_RATE * dt).min(1.0);
        }

        *accumulator = accumulator.max(start);
        *accumulator
    }

    /// Drops all state of `key` and of every key nested under it
    /// (`"{key}:..."`).
    pub fn reset(&mut self, key: &str) {
        let nested = format!("{key}:");
        let keep = |k: &String| k != key && !k.starts_with(&nested);
        self.smoothing.retain(|k, _| keep(k));
        self.speed.retain(|k, _| keep(k));
    }

    /// Drops the state of every parameter and the curve cache.
    pub fn reset_all(&mut self) {
        self.smoothing.clear();
        self.speed.clear();
        self.curves.clear();
    }

    /// Current envelope value for a parameter/source pair, if one exists.
    pub fn smoothing_state(&self, key: &str, source: ReactivitySource) -> Option<f32> {
        self.smoothing.get(key)?.get(&source).copied()
    }

    pub fn speed_state(&self, key: &str) -> Option<f32> {
        self.speed.get(key).copied()
    }

    pub fn curve_cache(&self) -> &CurveCache {
        &self.curves
    }

    /// Source value after envelope, invert/strength and curve, before the mode.
    fn shaped_level(
        &mut self,
        key: &str,
        frame: &AudioFrame<'_>,
        config: &ReactivityConfig,
        dt: f32,
    ) -> f32 {
        let raw = finite_or_zero(frame.source_value(config.source));

        let mut value = match config.envelope() {
            Some((attack, release)) => {
                if dt.is_nan() || dt <= 0.0 {
                    debug!(key, dt, "non-positive frame delta, holding envelope");
                }
                let bpm = frame.bpm();
                let attack_tau = time_constant(attack, bpm, self.fallback_seconds);
                let release_tau = time_constant(release, bpm, self.fallback_seconds);
                let state = self
                    .smoothing
                    .entry(key.to_owned())
                    .or_default()
                    .entry(config.source)
                    .or_insert(0.0);
                *state = smooth(*state, raw, dt, attack_tau, release_tau);
                *state
            }
            None => raw,
        };

        if config.invert {
            value = 1.0 - value;
        }
        if let Some(strength) = config.strength {
            value *= finite_or_zero(strength);
        }
        if let Some(curve) = &config.curve {
            value = self.curves.solve(curve, value);
        }
        value
    }
}

/// Clamps to `[0, 1]`, mapping NaN to 0.
pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::BandTriple;

    const DT: f32 = 1.0 / 60.0;

    fn frame<'a>(sample: &'a BandSample, beats: &'a BeatFrame) -> AudioFrame<'a> {
        AudioFrame::new(Some(sample), beats)
    }

    #[test]
    fn source_names_parse_back() {
        for source in ReactivitySource::all() {
            assert_eq!(source.to_string().parse::<ReactivitySource>().unwrap(), source);
        }
        assert_eq!(ReactivitySource::all().count(), 39);
        assert!(matches!(
            "wobble".parse::<ReactivitySource>(),
            Err(BeatBindError::UnknownSource(_))
        ));
        assert!("custom16".parse::<ReactivitySource>().is_err());
    }

    #[test]
    fn sources_read_sample_and_beat_metrics() {
        let mut sample = BandSample::from_bands(0.6, 0.2, 0.4);
        sample.stereo = BandTriple {
            bass: -1.0,
            mid: 0.0,
            treble: 1.0,
        };
        sample.bins[3] = 0.9;
        let mut beats = BeatFrame::default();
        beats.bands.mid.intensity = 0.7;
        beats.global.bpm = Some(100.0);
        let frame = frame(&sample, &beats);

        assert_eq!(frame.source_value(ReactivitySource::Bass), 0.6);
        assert_eq!(frame.source_value(ReactivitySource::BassStereo), 0.0);
        assert_eq!(frame.source_value(ReactivitySource::TrebleStereo), 1.0);
        assert!((frame.source_value(ReactivitySource::Low) - 0.4).abs() < 1e-6);
        assert_eq!(frame.source_value(ReactivitySource::Custom(3)), 0.9);
        assert_eq!(frame.source_value(ReactivitySource::MidBeat), 0.7);
        assert_eq!(frame.source_value(ReactivitySource::Tempo), 0.5);
        assert!((frame.source_value(ReactivitySource::StereoWidth) - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn missing_sample_reads_as_silence() {
        let beats = BeatFrame::default();
        let frame = AudioFrame::new(None, &beats);
        assert_eq!(frame.source_value(ReactivitySource::Volume), 0.0);
        assert_eq!(frame.bpm(), 0.0);
    }

    #[test]
    fn raw_value_passes_through_without_envelope() {
        let sample = BandSample::from_bands(0.3, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let config = ReactivityConfig::new(ReactivitySource::Bass);

        let value = manager.smoothed_value("glow", &frame(&sample, &beats), &config, DT);
        assert_eq!(value, 0.3);
        assert_eq!(manager.smoothing_state("glow", ReactivitySource::Bass), None);
    }

    #[test]
    fn additive_mode_remaps_and_clamps() {
        let sample = BandSample::from_bands(0.5, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();

        let config = ReactivityConfig::new(ReactivitySource::Bass).with_range(0.2, 0.6);
        let value = manager.smoothed_value("a", &frame(&sample, &beats), &config, DT);
        assert!((value - 0.4).abs() < 1e-6);

        let wide = ReactivityConfig::new(ReactivitySource::Bass).with_range(0.0, 4.0);
        assert_eq!(manager.smoothed_value("b", &frame(&sample, &beats), &wide, DT), 1.0);
    }

    #[test]
    fn invert_and_strength_apply_before_clamp() {
        let sample = BandSample::from_bands(0.25, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();

        let config = ReactivityConfig::new(ReactivitySource::Bass)
            .inverted()
            .with_strength(0.5)
            .with_mode(ReactivityMode::Interpolation);
        let value = manager.smoothed_value("dim", &frame(&sample, &beats), &config, DT);
        assert!((value - 0.375).abs() < 1e-6);

        let boosted = ReactivityConfig::new(ReactivitySource::Bass).with_strength(8.0);
        assert_eq!(manager.smoothed_value("hot", &frame(&sample, &beats), &boosted, DT), 1.0);
    }

    #[test]
    fn curve_shapes_the_level() {
        let sample = BandSample::from_bands(0.5, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let config = ReactivityConfig::new(ReactivitySource::Bass).with_curve(CubicBezier::EASE_IN);

        let value = manager.smoothed_value("curve", &frame(&sample, &beats), &config, DT);
        assert!((value - CubicBezier::EASE_IN.solve(0.5)).abs() < 1e-3);
        assert!(value < 0.5);
    }

    #[test]
    fn envelope_follows_tempo() {
        let sample = BandSample::from_bands(1.0, 0.0, 0.0);
        let mut beats = BeatFrame::default();
        beats.global.bpm = Some(120.0);
        let mut manager = AudioReactivityManager::new();
        let config = ReactivityConfig::new(ReactivitySource::Bass)
            .with_envelope(NoteFraction::SIXTEENTH, NoteFraction::QUARTER);

        let value = manager.smoothed_value("env", &frame(&sample, &beats), &config, DT);
        let expected = 1.0 - (-DT / 0.125).exp();
        assert!((value - expected).abs() < 1e-5);
        assert_eq!(
            manager.smoothing_state("env", ReactivitySource::Bass),
            Some(value)
        );
    }

    #[test]
    fn envelope_holds_on_non_positive_delta() {
        let sample = BandSample::from_bands(1.0, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let config = ReactivityConfig::new(ReactivitySource::Bass)
            .with_envelope(NoteFraction::SIXTEENTH, NoteFraction::SIXTEENTH);

        let first = manager.smoothed_value("hold", &frame(&sample, &beats), &config, DT);
        for dt in [-1.0, 0.0, f32::NAN] {
            let held = manager.smoothed_value("hold", &frame(&sample, &beats), &config, dt);
            assert_eq!(first, held, "dt {dt}");
        }
    }

    #[test]
    fn interpolated_value_spans_the_range() {
        let sample = BandSample::from_bands(0.5, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let config =
            ReactivityConfig::new(ReactivitySource::Bass).with_mode(ReactivityMode::Interpolation);
        let value =
            manager.interpolated_value("zoom", &frame(&sample, &beats), &config, DT, 10.0, 20.0);
        assert!((value - 15.0).abs() < 1e-5);
    }

    #[test]
    fn speed_only_ratchets_upward_while_audio_plays() {
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let config = ReactivityConfig::new(ReactivitySource::Bass).with_mode(ReactivityMode::Speed);

        let loud = BandSample::from_bands(1.0, 0.0, 0.0);
        let mut speed = 0.0;
        for _ in 0..120 {
            speed = manager.accumulated_speed("spin", &frame(&loud, &beats), &config, DT, 1.0, 3.0);
        }
        assert!(speed > 2.9, "speed should approach target: {speed}");

        let soft = BandSample::from_bands(0.1, 0.0, 0.0);
        let after_soft =
            manager.accumulated_speed("spin", &frame(&soft, &beats), &config, DT, 1.0, 3.0);
        assert!(after_soft >= speed);
    }

    #[test]
    fn speed_decays_to_base_without_audio() {
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let config = ReactivityConfig::new(ReactivitySource::Bass).with_mode(ReactivityMode::Speed);
        let loud = BandSample::from_bands(1.0, 0.0, 0.0);
        for _ in 0..60 {
            manager.accumulated_speed("spin", &frame(&loud, &beats), &config, DT, 1.0, 3.0);
        }

        let silent = AudioFrame::new(None, &beats);
        let mut previous = manager.speed_state("spin").unwrap();
        for _ in 0..2000 {
            let speed = manager.accumulated_speed("spin", &silent, &config, DT, 1.0, 3.0);
            assert!(speed <= previous);
            assert!(speed >= 1.0);
            previous = speed;
        }
        assert!(previous < 1.01);
    }

    #[test]
    fn steep_curve_gives_the_same_value_every_frame() {
        let sample = BandSample::from_bands(1.0 / 256.0, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let curve = CubicBezier::new(0.0, 1.0, 0.0, 1.0).unwrap();
        let config = ReactivityConfig::new(ReactivitySource::Bass).with_curve(curve);

        let first = manager.smoothed_value("steep", &frame(&sample, &beats), &config, DT);
        let second = manager.smoothed_value("steep", &frame(&sample, &beats), &config, DT);
        assert_eq!(first, second);
        assert_eq!(first, curve.solve(1.0 / 256.0));
    }

    #[test]
    fn reset_removes_only_the_given_key() {
        let sample = BandSample::from_bands(0.5, 0.0, 0.0);
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        let config = ReactivityConfig::new(ReactivitySource::Bass)
            .with_envelope(NoteFraction::EIGHTH, NoteFraction::EIGHTH)
            .with_curve(CubicBezier::EASE);

        manager.smoothed_value("one", &frame(&sample, &beats), &config, DT);
        manager.smoothed_value("one:glow", &frame(&sample, &beats), &config, DT);
        manager.smoothed_value("one2", &frame(&sample, &beats), &config, DT);
        manager.smoothed_value("two", &frame(&sample, &beats), &config, DT);
        manager.reset("one");
        assert_eq!(manager.smoothing_state("one", ReactivitySource::Bass), None);
        assert_eq!(manager.smoothing_state("one:glow", ReactivitySource::Bass), None);
        assert!(manager.smoothing_state("one2", ReactivitySource::Bass).is_some());
        assert!(manager.smoothing_state("two", ReactivitySource::Bass).is_some());

        manager.reset_all();
        assert_eq!(manager.smoothing_state("two", ReactivitySource::Bass), None);
        assert!(manager.curve_cache().is_empty());
    }

    #[test]
    fn non_finite_sources_stay_in_range() {
        let mut sample = BandSample::from_bands(f32::NAN, 0.0, 0.0);
        sample.bins[0] = f32::INFINITY;
        let beats = BeatFrame::default();
        let mut manager = AudioReactivityManager::new();
        for source in [ReactivitySource::Bass, ReactivitySource::Custom(0), ReactivitySource::Spectrum] {
            let config = ReactivityConfig::new(source)
                .with_envelope(NoteFraction::SIXTEENTH, NoteFraction::QUARTER);
            let value = manager.smoothed_value("nan", &frame(&sample, &beats), &config, DT);
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn config_round_trips_through_json_names() {
        let json = r#"{"source":"bassBeat","attack":0.0625,"curve":[0.5,0.0,1.0,1.0],"mode":"speed"}"#;
        let config: ReactivityConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.source, ReactivitySource::BassBeat);
        assert_eq!(config.envelope(), Some((NoteFraction::SIXTEENTH, NoteFraction::SIXTEENTH)));
        assert_eq!(config.curve, Some(CubicBezier::new(0.5, 0.0, 1.0, 1.0).unwrap()));
        assert_eq!(config.mode, ReactivityMode::Speed);

        let bad = r#"{"source":"bass","curve":[2.0,0.0,1.0,1.0]}"#;
        assert!(serde_json::from_str::<ReactivityConfig>(bad).is_err());
    }
}
