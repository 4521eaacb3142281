use serde::{Deserialize, Serialize};
use tracing::debug;

/// Frame clock that keeps absolute time and per-frame delta separate.
///
/// Beat detection compares absolute millisecond timestamps while smoothing
/// works on the delta of the current frame in seconds. Both are advanced
/// together here so callers never derive one from the other by hand.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameClock {
    pub elapsed_ms: f64,
    pub delta_seconds: f32,
    pub frame: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advances by a relative step in seconds.
    pub fn advance(&mut self, delta_seconds: f32) {
        if !delta_seconds.is_finite() || delta_seconds < 0.0 {
            debug!(delta_seconds, "ignoring invalid clock step");
            self.delta_seconds = 0.0;
        } else {
            self.delta_seconds = delta_seconds;
            self.elapsed_ms += f64::from(delta_seconds) * 1000.0;
        }
        self.frame += 1;
    }

    /// Advances to an absolute timestamp, deriving the delta from the
    /// previous one.
    pub fn advance_to(&mut self, now_ms: f64) {
        let delta_ms = now_ms - self.elapsed_ms;
        if !delta_ms.is_finite() || delta_ms < 0.0 {
            debug!(now_ms, elapsed_ms = self.elapsed_ms, "clock moved backwards");
            self.delta_seconds = 0.0;
        } else {
            self.delta_seconds = (delta_ms / 1000.0) as f32;
            self.elapsed_ms = now_ms;
        }
        self.frame += 1;
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_ms / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_domains() {
        let mut clock = FrameClock::new();
        clock.advance(0.5);
        clock.advance(0.25);
        assert_eq!(clock.elapsed_ms, 750.0);
        assert_eq!(clock.delta_seconds, 0.25);
        assert_eq!(clock.frame, 2);
    }

    #[test]
    fn advance_to_derives_delta() {
        let mut clock = FrameClock::new();
        clock.advance_to(100.0);
        clock.advance_to(150.0);
        assert!((clock.delta_seconds - 0.05).abs() < 1e-6);
        assert!((clock.elapsed_seconds() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn backwards_or_invalid_steps_yield_zero_delta() {
        let mut clock = FrameClock::new();
        clock.advance_to(200.0);
        clock.advance_to(100.0);
        assert_eq!(clock.delta_seconds, 0.0);
        assert_eq!(clock.elapsed_ms, 200.0);

        clock.advance(f32::NAN);
        assert_eq!(clock.delta_seconds, 0.0);
        assert_eq!(clock.elapsed_ms, 200.0);
        assert_eq!(clock.frame, 3);

        clock.reset();
        assert_eq!(clock, FrameClock::default());
    }
}
