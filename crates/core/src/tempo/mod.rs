//! Tempo-relative time constants and asymmetric attack/release smoothing.
//!
//! Musical note fractions are turned into seconds using the current tempo, so
//! an envelope configured as "attack 1/16, release 1/4" tightens when the track
//! speeds up. When the tempo is unknown a fallback constant is used instead.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::BeatBindError;

/// Time constant used whenever no tempo is available.
pub const DEFAULT_FALLBACK_SECONDS: f32 = 0.1;

/// Shortest note fraction accepted for envelopes (a 256th note).
pub const MIN_NOTE_FRACTION: f32 = 1.0 / 256.0;

/// Longest note fraction accepted for envelopes (a whole note).
pub const MAX_NOTE_FRACTION: f32 = 1.0;

/// A musical duration expressed as a fraction of a whole note.
///
/// Values are clamped to `[1/256, 1]` on construction. Non-finite input maps to
/// a quarter note.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct NoteFraction(f32);

impl NoteFraction {
    pub const WHOLE: NoteFraction = NoteFraction(1.0);
    pub const HALF: NoteFraction = NoteFraction(0.5);
    pub const QUARTER: NoteFraction = NoteFraction(0.25);
    pub const EIGHTH: NoteFraction = NoteFraction(0.125);
    pub const SIXTEENTH: NoteFraction = NoteFraction(0.0625);

    pub fn new(fraction: f32) -> Self {
        if fraction.is_finite() {
            Self(fraction.clamp(MIN_NOTE_FRACTION, MAX_NOTE_FRACTION))
        } else {
            Self::QUARTER
        }
    }

    /// `1/denominator`, e.g. `from_denominator(16)` is a sixteenth note.
    pub fn from_denominator(denominator: u16) -> Self {
        Self::new(1.0 / f32::from(denominator.max(1)))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Length of the note in beats, assuming a quarter note gets the beat.
    pub fn beats(self) -> f32 {
        self.0 * 4.0
    }
}

impl From<f32> for NoteFraction {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl From<NoteFraction> for f32 {
    fn from(value: NoteFraction) -> Self {
        value.0
    }
}

impl fmt::Display for NoteFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let denominator = 1.0 / self.0;
        if (denominator - denominator.round()).abs() < 1e-3 {
            write!(f, "1/{}", denominator.round() as u32)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for NoteFraction {
    type Err = BeatBindError;

    /// Parses either `"n/d"` or a plain decimal fraction.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BeatBindError::msg(format!("invalid note fraction `{s}`"));
        let trimmed = s.trim();
        let fraction = match trimmed.split_once('/') {
            Some((num, den)) => {
                let num: f32 = num.trim().parse().map_err(|_| invalid())?;
                let den: f32 = den.trim().parse().map_err(|_| invalid())?;
                if den == 0.0 {
                    return Err(invalid());
                }
                num / den
            }
            None => trimmed.parse().map_err(|_| invalid())?,
        };
        if !fraction.is_finite() || fraction <= 0.0 {
            return Err(invalid());
        }
        Ok(Self::new(fraction))
    }
}

/// Converts a note fraction into a time constant in seconds at `bpm`.
///
/// A quarter note at 120 BPM yields 0.5 s. Unknown (non-positive or
/// non-finite) tempo yields `fallback_seconds`; a non-positive fallback is
/// replaced by [`DEFAULT_FALLBACK_SECONDS`], so the result is always positive.
pub fn time_constant(note: NoteFraction, bpm: f32, fallback_seconds: f32) -> f32 {
    let fallback = if fallback_seconds.is_finite() && fallback_seconds > 0.0 {
        fallback_seconds
    } else {
        DEFAULT_FALLBACK_SECONDS
    };

    if !bpm.is_finite() || bpm <= 0.0 {
        return fallback;
    }

    let seconds_per_beat = 60.0 / bpm;
    let tau = seconds_per_beat * note.beats();
    if tau.is_finite() && tau > 0.0 {
        tau
    } else {
        fallback
    }
}

/// One step of asymmetric exponential smoothing from `current` toward `target`.
///
/// Rising targets use `attack_tau`, falling ones `release_tau`. A non-positive
/// `delta_time` leaves `current` untouched. A non-finite result falls back to
/// `current` (or 0 when `current` is itself non-finite).
pub fn smooth(current: f32, target: f32, delta_time: f32, attack_tau: f32, release_tau: f32) -> f32 {
    let last_valid = if current.is_finite() { current } else { 0.0 };
    if delta_time.is_nan() || delta_time <= 0.0 {
        return last_valid;
    }

    let tau = if target > last_valid {
        attack_tau
    } else {
        release_tau
    };
    let next = last_valid + (target - last_valid) * (1.0 - (-delta_time / tau).exp());

    if next.is_finite() {
        next
    } else {
        last_valid
    }
}

/// Stateful wrapper around [`smooth`] that remembers its last valid value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvelopeSmoother {
    value: f32,
}

impl EnvelopeSmoother {
    pub fn new(initial: f32) -> Self {
        Self {
            value: if initial.is_finite() { initial } else { 0.0 },
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn step(&mut self, target: f32, delta_time: f32, attack_tau: f32, release_tau: f32) -> f32 {
        self.value = smooth(self.value, target, delta_time, attack_tau, release_tau);
        self.value
    }

    /// Same as [`EnvelopeSmoother::step`] but derives both time constants from notes.
    pub fn step_notes(
        &mut self,
        target: f32,
        delta_time: f32,
        attack: NoteFraction,
        release: NoteFraction,
        bpm: f32,
    ) -> f32 {
        let attack_tau = time_constant(attack, bpm, DEFAULT_FALLBACK_SECONDS);
        let release_tau = time_constant(release, bpm, DEFAULT_FALLBACK_SECONDS);
        self.step(target, delta_time, attack_tau, release_tau)
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_note_is_one_beat() {
        let tau = time_constant(NoteFraction::QUARTER, 120.0, 0.3);
        assert!((tau - 0.5).abs() < 1e-6);

        let sixteenth = time_constant(NoteFraction::from_denominator(16), 120.0, 0.3);
        assert!((sixteenth - 0.125).abs() < 1e-6);
    }

    #[test]
    fn unknown_tempo_uses_fallback() {
        assert_eq!(time_constant(NoteFraction::QUARTER, 0.0, 0.3), 0.3);
        assert_eq!(time_constant(NoteFraction::QUARTER, -10.0, 0.3), 0.3);
        assert_eq!(time_constant(NoteFraction::QUARTER, f32::NAN, 0.3), 0.3);
        assert_eq!(
            time_constant(NoteFraction::QUARTER, 0.0, 0.0),
            DEFAULT_FALLBACK_SECONDS
        );
    }

    #[test]
    fn note_fractions_are_clamped_and_parsed() {
        assert_eq!(NoteFraction::new(4.0).value(), 1.0);
        assert_eq!(NoteFraction::new(0.0).value(), MIN_NOTE_FRACTION);
        assert_eq!("1/16".parse::<NoteFraction>().unwrap(), NoteFraction::SIXTEENTH);
        assert_eq!("0.5".parse::<NoteFraction>().unwrap(), NoteFraction::HALF);
        assert!("1/0".parse::<NoteFraction>().is_err());
        assert!("fast".parse::<NoteFraction>().is_err());
        assert_eq!(NoteFraction::EIGHTH.to_string(), "1/8");
    }

    #[test]
    fn smoothing_uses_attack_when_rising_and_release_when_falling() {
        let dt = 0.1;
        let rising = smooth(0.0, 1.0, dt, 0.1, 10.0);
        assert!((rising - (1.0 - (-1.0_f32).exp())).abs() < 1e-6);

        let falling = smooth(1.0, 0.0, dt, 0.1, 10.0);
        assert!(falling > 0.98, "slow release should barely move: {falling}");
    }

    #[test]
    fn smoothing_ignores_non_positive_delta() {
        assert_eq!(smooth(0.4, 1.0, 0.0, 0.1, 0.1), 0.4);
        assert_eq!(smooth(0.4, 1.0, -0.016, 0.1, 0.1), 0.4);
        assert_eq!(smooth(0.4, 1.0, f32::NAN, 0.1, 0.1), 0.4);
    }

    #[test]
    fn smoothing_never_propagates_non_finite_values() {
        assert_eq!(smooth(0.4, f32::NAN, 0.016, 0.1, 0.1), 0.4);
        assert_eq!(smooth(0.4, f32::INFINITY, 0.016, 0.1, 0.1), 0.4);
        assert_eq!(smooth(f32::NAN, 0.5, 0.016, 0.0, 0.0), 0.5);
    }

    #[test]
    fn smoother_converges_toward_target() {
        let mut smoother = EnvelopeSmoother::default();
        for _ in 0..600 {
            smoother.step_notes(0.8, 1.0 / 60.0, NoteFraction::SIXTEENTH, NoteFraction::QUARTER, 120.0);
        }
        assert!((smoother.value() - 0.8).abs() < 1e-3);
        smoother.reset();
        assert_eq!(smoother.value(), 0.0);
    }
}
