//! Hard-edged pulses on sharp rises in a level.

use std::collections::VecDeque;

use tracing::trace;

use crate::{config::PulseConfig, sample::finite_or_zero};

/// Sliding-window limiter with a cooldown once the window overflows.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window_ms: f64,
    max_events: usize,
    cooldown_ms: f64,
    accepted: VecDeque<f64>,
    cooldown_until: Option<f64>,
}

impl RateLimiter {
    pub fn new(window_ms: f64, max_events: usize, cooldown_ms: f64) -> Self {
        Self {
            window_ms,
            max_events: max_events.max(1),
            cooldown_ms,
            accepted: VecDeque::with_capacity(max_events),
            cooldown_until: None,
        }
    }

    /// Returns true and records the event when it is allowed at `now_ms`.
    ///
    /// An event that would exceed the window's budget is refused and starts
    /// the cooldown; nothing is accepted until the cooldown has elapsed.
    pub fn try_acquire(&mut self, now_ms: f64) -> bool {
        if let Some(until) = self.cooldown_until {
            if now_ms < until {
                return false;
            }
            self.cooldown_until = None;
        }

        while let Some(&oldest) = self.accepted.front() {
            if now_ms - oldest >= self.window_ms {
                self.accepted.pop_front();
            } else {
                break;
            }
        }

        if self.accepted.len() >= self.max_events {
            self.cooldown_until = Some(now_ms + self.cooldown_ms);
            self.accepted.clear();
            return false;
        }

        self.accepted.push_back(now_ms);
        true
    }

    pub fn in_cooldown(&self, now_ms: f64) -> bool {
        self.cooldown_until.is_some_and(|until| now_ms < until)
    }

    pub fn reset(&mut self) {
        self.accepted.clear();
        self.cooldown_until = None;
    }
}

/// Binary multiplier that jumps to the active value on a qualifying rise and
/// drops back once the pulse duration has passed.
#[derive(Debug, Clone)]
pub struct TransientTrigger {
    config: PulseConfig,
    limiter: RateLimiter,
    previous_level: f32,
    active_until: Option<f64>,
}

impl Default for TransientTrigger {
    fn default() -> Self {
        Self::new(PulseConfig::default())
    }
}

impl TransientTrigger {
    pub fn new(config: PulseConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.window_ms, config.max_triggers, config.cooldown_ms),
            config,
            previous_level: 0.0,
            active_until: None,
        }
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    /// Feeds this frame's level and returns the current multiplier.
    pub fn update(&mut self, level: f32, now_ms: f64) -> f32 {
        let level = finite_or_zero(level);

        if self.active_until.is_some_and(|until| now_ms >= until) {
            self.active_until = None;
        }

        let rise = level - self.previous_level;
        self.previous_level = level;

        if level > self.config.threshold
            && rise > self.config.change_threshold
            && self.active_until.is_none()
        {
            if self.limiter.try_acquire(now_ms) {
                trace!(level, rise, now_ms, "transient pulse");
                self.active_until = Some(now_ms + self.config.duration_ms);
            } else {
                trace!(level, now_ms, "transient pulse rate limited");
            }
        }

        self.multiplier()
    }

    pub fn multiplier(&self) -> f32 {
        if self.is_active() {
            self.config.active_value
        } else {
            self.config.rest_value
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_until.is_some()
    }

    pub fn reset(&mut self) {
        self.limiter.reset();
        self.previous_level = 0.0;
        self.active_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_caps_window_then_cools_down() {
        let mut limiter = RateLimiter::new(500.0, 4, 500.0);
        for i in 0..4 {
            assert!(limiter.try_acquire(i as f64 * 50.0));
        }
        assert!(!limiter.try_acquire(200.0));
        assert!(limiter.in_cooldown(300.0));
        assert!(!limiter.try_acquire(650.0));
        assert!(limiter.try_acquire(700.0));
    }

    #[test]
    fn limiter_window_slides() {
        let mut limiter = RateLimiter::new(500.0, 2, 500.0);
        assert!(limiter.try_acquire(0.0));
        assert!(limiter.try_acquire(100.0));
        assert!(limiter.try_acquire(500.0));
        assert!(!limiter.in_cooldown(500.0));
    }

    #[test]
    fn sharp_rise_fires_a_fixed_length_pulse() {
        let mut trigger = TransientTrigger::default();
        assert_eq!(trigger.update(0.1, 0.0), 1.0);
        assert_eq!(trigger.update(0.8, 16.0), 2.0);
        assert_eq!(trigger.update(0.9, 100.0), 2.0);
        assert_eq!(trigger.update(0.9, 136.0), 1.0);
    }

    #[test]
    fn slow_rise_or_quiet_level_does_not_fire() {
        let mut trigger = TransientTrigger::default();
        let mut now = 0.0;
        let mut level = 0.0;
        while level < 1.0 {
            assert_eq!(trigger.update(level, now), 1.0);
            level += 0.05;
            now += 16.0;
        }

        let mut quiet = TransientTrigger::default();
        assert_eq!(quiet.update(0.0, 0.0), 1.0);
        assert_eq!(quiet.update(0.45, 16.0), 1.0);
    }

    #[test]
    fn no_retrigger_while_animating() {
        let mut trigger = TransientTrigger::default();
        trigger.update(0.0, 0.0);
        trigger.update(0.9, 10.0);
        trigger.update(0.0, 20.0);
        assert_eq!(trigger.update(0.9, 30.0), 2.0);
        // The pulse started at 10 ms, so it ends at 130 ms regardless of the second rise.
        assert_eq!(trigger.update(0.0, 130.0), 1.0);
    }

    #[test]
    fn rapid_hits_are_rate_limited() {
        let config = PulseConfig {
            duration_ms: 10.0,
            ..PulseConfig::default()
        };
        let mut trigger = TransientTrigger::new(config);
        let mut fired = 0;
        for hit in 0..10 {
            let t = hit as f64 * 40.0;
            trigger.update(0.0, t);
            if trigger.update(1.0, t + 20.0) > 1.0 {
                fired += 1;
            }
        }
        assert_eq!(fired, 4);
    }

    #[test]
    fn non_finite_level_reads_as_silence() {
        let mut trigger = TransientTrigger::default();
        assert_eq!(trigger.update(f32::NAN, 0.0), 1.0);
        assert_eq!(trigger.update(0.9, 16.0), 2.0);
    }
}
