use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{
    sample::{Band, BandSample, BandTriple, DEFAULT_CUSTOM_BINS},
    BeatBindError, Result,
};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

const BASS_RANGE_HZ: (f32, f32) = (20.0, 250.0);
const MID_RANGE_HZ: (f32, f32) = (250.0, 4_000.0);
const TREBLE_LOW_HZ: f32 = 4_000.0;
const LOWEST_BIN_HZ: f32 = 20.0;
const PEAK_DECAY: f32 = 0.95;

/// Turns raw PCM blocks into [`BandSample`]s.
///
/// This is a small reference analyser for driving the engine from synthetic
/// or decoded audio. Each channel is Hann-windowed and transformed with a
/// real FFT; band energies are the norm of the amplitude spectrum inside the
/// band, scaled by `gain` and clamped to `[0, 1]`.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    gain: f32,
    custom_bins: usize,
    peaks: BandTriple,
    bpm_override: Option<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    /// Creates a new analyser using the default 48 kHz sample rate.
    pub fn new() -> Self {
        Self::with_sample_rate(DEFAULT_SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            gain: 1.0,
            custom_bins: DEFAULT_CUSTOM_BINS,
            peaks: BandTriple::default(),
            bpm_override: None,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
        self
    }

    /// Tempo attached to every produced sample, e.g. from track metadata.
    pub fn set_bpm_override(&mut self, bpm: Option<f32>) {
        self.bpm_override = bpm;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clears the peak trackers while preserving configuration.
    pub fn reset(&mut self) {
        self.peaks = BandTriple::default();
    }

    /// Analyses a mono block; stereo balance is always centred.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<BandSample> {
        validate_block(samples)?;
        let spectrum = self.amplitude_spectrum(samples)?;
        let rms = compute_rms(samples);
        Ok(self.build_sample(&spectrum, &spectrum, rms))
    }

    /// Analyses one block per channel. Both blocks must have the same length.
    pub fn process_stereo(&mut self, left: &[f32], right: &[f32]) -> Result<BandSample> {
        validate_block(left)?;
        validate_block(right)?;
        if left.len() != right.len() {
            return Err(BeatBindError::InvalidInput(
                "stereo channels must have the same length",
            ));
        }

        let left_spectrum = self.amplitude_spectrum(left)?;
        let right_spectrum = self.amplitude_spectrum(right)?;
        let rms = (compute_rms(left) + compute_rms(right)) * 0.5;
        Ok(self.build_sample(&left_spectrum, &right_spectrum, rms))
    }

    fn build_sample(&mut self, left: &[f32], right: &[f32], rms: f32) -> BandSample {
        let resolution = self.bin_resolution(left.len());
        let nyquist = self.sample_rate as f32 * 0.5;
        let ranges = BandTriple {
            bass: BASS_RANGE_HZ,
            mid: MID_RANGE_HZ,
            treble: (TREBLE_LOW_HZ, nyquist),
        };

        let mut bands = BandTriple::default();
        let mut stereo = BandTriple::default();
        for band in Band::ALL {
            let (low, high) = ranges[band];
            let l = band_energy(left, resolution, low, high);
            let r = band_energy(right, resolution, low, high);
            bands[band] = (self.gain * (l + r) * 0.5).clamp(0.0, 1.0);
            stereo[band] = balance(l, r);
            self.peaks[band] = (self.peaks[band] * PEAK_DECAY).max(bands[band]);
        }

        let ratio = (nyquist / LOWEST_BIN_HZ).max(1.0);
        let bins = (0..self.custom_bins)
            .map(|i| {
                let low = LOWEST_BIN_HZ * ratio.powf(i as f32 / self.custom_bins as f32);
                let high = LOWEST_BIN_HZ * ratio.powf((i + 1) as f32 / self.custom_bins as f32);
                let l = band_energy(left, resolution, low, high);
                let r = band_energy(right, resolution, low, high);
                (self.gain * (l + r) * 0.5).clamp(0.0, 1.0)
            })
            .collect();

        BandSample {
            bass: bands.bass,
            mid: bands.mid,
            treble: bands.treble,
            volume: (self.gain * rms).clamp(0.0, 1.0),
            bins,
            stereo,
            peaks: self.peaks,
            bpm_override: self.bpm_override,
        }
    }

    /// Hz covered by one spectrum bin for a spectrum of `bins` entries.
    fn bin_resolution(&self, bins: usize) -> f32 {
        let block = (bins.saturating_sub(1) * 2).max(1);
        self.sample_rate as f32 / block as f32
    }

    /// Magnitudes normalised so a full-scale sine on a bin centre reads 1.
    fn amplitude_spectrum(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let len = samples.len();
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = 4.0 / len as f32;
        Ok(fft.spectrum.iter().map(|bin| bin.norm() * scale).collect())
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        if self.fft.as_ref().is_some_and(|fft| fft.size != size) {
            self.fft = None;
        }

        let planner = &mut self.fft_planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("gain", &self.gain)
            .field("peaks", &self.peaks)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn validate_block(samples: &[f32]) -> Result<()> {
    if samples.len() < 2 {
        return Err(BeatBindError::InvalidInput(
            "analysis requires blocks with at least two samples",
        ));
    }
    Ok(())
}

/// Euclidean norm of the spectrum bins whose centre lies in `[low, high)`.
/// Falls back to the nearest bin when the range is narrower than one bin.
fn band_energy(spectrum: &[f32], resolution: f32, low: f32, high: f32) -> f32 {
    if spectrum.is_empty() || high <= low {
        return 0.0;
    }
    let last = spectrum.len() - 1;
    let first = ((low / resolution).ceil() as usize).min(last);
    let end = ((high / resolution).ceil() as usize).min(spectrum.len());

    if first >= end {
        let centre = (((low + high) * 0.5 / resolution).round() as usize).min(last);
        return spectrum[centre];
    }

    spectrum[first..end]
        .iter()
        .map(|m| m * m)
        .sum::<f32>()
        .sqrt()
}

/// Stereo balance in `[-1, 1]`, negative toward the left channel.
fn balance(left: f32, right: f32) -> f32 {
    let total = left + right;
    if total <= f32::EPSILON {
        0.0
    } else {
        ((right - left) / total).clamp(-1.0, 1.0)
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
