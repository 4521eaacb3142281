use std::{fmt, ops::Index, ops::IndexMut};

use serde::{Deserialize, Serialize};

/// Number of custom frequency bins produced by the default analyser.
pub const DEFAULT_CUSTOM_BINS: usize = 16;

/// The three beat-tracked frequency bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Bass,
    Mid,
    Treble,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Bass, Band::Mid, Band::Treble];
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Band::Bass => "bass",
            Band::Mid => "mid",
            Band::Treble => "treble",
        })
    }
}

/// One value per [`Band`], indexable by band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandTriple<T = f32> {
    pub bass: T,
    pub mid: T,
    pub treble: T,
}

impl<T: Copy> BandTriple<T> {
    pub fn splat(value: T) -> Self {
        Self {
            bass: value,
            mid: value,
            treble: value,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> BandTriple<U> {
        BandTriple {
            bass: f(self.bass),
            mid: f(self.mid),
            treble: f(self.treble),
        }
    }
}

impl<T> Index<Band> for BandTriple<T> {
    type Output = T;

    fn index(&self, band: Band) -> &T {
        match band {
            Band::Bass => &self.bass,
            Band::Mid => &self.mid,
            Band::Treble => &self.treble,
        }
    }
}

impl<T> IndexMut<Band> for BandTriple<T> {
    fn index_mut(&mut self, band: Band) -> &mut T {
        match band {
            Band::Bass => &mut self.bass,
            Band::Mid => &mut self.mid,
            Band::Treble => &mut self.treble,
        }
    }
}

/// Per-frame snapshot handed over by the frequency analysis collaborator.
///
/// Energies are expected in `[0, 1]`, stereo balance in `[-1, 1]` (negative is
/// left). The core treats the record as read-only; see [`BandSample::sanitized`]
/// for how malformed values are neutralised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSample {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub volume: f32,
    #[serde(default)]
    pub bins: Vec<f32>,
    #[serde(default)]
    pub stereo: BandTriple,
    #[serde(default)]
    pub peaks: BandTriple,
    #[serde(default)]
    pub bpm_override: Option<f32>,
}

impl Default for BandSample {
    fn default() -> Self {
        Self::silent()
    }
}

impl BandSample {
    /// A sample with every energy at zero and the default number of bins.
    pub fn silent() -> Self {
        Self {
            bass: 0.0,
            mid: 0.0,
            treble: 0.0,
            volume: 0.0,
            bins: vec![0.0; DEFAULT_CUSTOM_BINS],
            stereo: BandTriple::default(),
            peaks: BandTriple::default(),
            bpm_override: None,
        }
    }

    /// Convenience constructor for the three band energies; volume is their mean.
    pub fn from_bands(bass: f32, mid: f32, treble: f32) -> Self {
        Self {
            bass,
            mid,
            treble,
            volume: (bass + mid + treble) / 3.0,
            ..Self::silent()
        }
    }

    pub fn with_peaks(mut self, peaks: BandTriple) -> Self {
        self.peaks = peaks;
        self
    }

    pub fn with_stereo(mut self, stereo: BandTriple) -> Self {
        self.stereo = stereo;
        self
    }

    pub fn with_bpm_override(mut self, bpm: f32) -> Self {
        self.bpm_override = Some(bpm);
        self
    }

    /// Energy of one beat-tracked band.
    pub fn energy(&self, band: Band) -> f32 {
        match band {
            Band::Bass => self.bass,
            Band::Mid => self.mid,
            Band::Treble => self.treble,
        }
    }

    /// Custom bin value, or 0 when the bin does not exist in this sample.
    pub fn bin(&self, index: usize) -> f32 {
        self.bins.get(index).copied().unwrap_or(0.0)
    }

    /// Returns a copy where every non-finite value is replaced by silence and
    /// stereo balance is clamped to `[-1, 1]`.
    pub fn sanitized(&self) -> Self {
        Self {
            bass: finite_or_zero(self.bass),
            mid: finite_or_zero(self.mid),
            treble: finite_or_zero(self.treble),
            volume: finite_or_zero(self.volume),
            bins: self.bins.iter().copied().map(finite_or_zero).collect(),
            stereo: self.stereo.map(|s| finite_or_zero(s).clamp(-1.0, 1.0)),
            peaks: self.peaks.map(finite_or_zero),
            bpm_override: self.bpm_override.filter(|bpm| bpm.is_finite() && *bpm > 0.0),
        }
    }

    /// True when any field carries a NaN or infinity.
    pub fn has_non_finite(&self) -> bool {
        let scalars = [self.bass, self.mid, self.treble, self.volume];
        let triples = [self.stereo, self.peaks];
        scalars.iter().any(|v| !v.is_finite())
            || self.bins.iter().any(|v| !v.is_finite())
            || triples
                .iter()
                .any(|t| Band::ALL.iter().any(|band| !t[*band].is_finite()))
    }
}

pub(crate) fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
