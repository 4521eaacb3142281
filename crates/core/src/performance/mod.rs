//! Adaptive quality control from observed frame durations.
//!
//! The monitor keeps a fixed window of recent frame times and derives a render
//! quality level in `[0.5, 1.0]` plus a target frame-rate tier. It never
//! touches a renderer; callers read [`ResizeHints`] and apply them.

use serde::Serialize;
use tracing::debug;

use crate::config::PerformanceConfig;

pub const MIN_QUALITY: f32 = 0.5;
pub const MAX_QUALITY: f32 = 1.0;
pub const QUALITY_STEP: f32 = 0.1;

/// Which configured frame rate the monitor is aiming for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FpsTier {
    Min,
    Max,
}

/// Resolution caps scaled by the current quality level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResizeHints {
    pub quality: f32,
    pub max_dimension: u32,
    pub max_pixel_ratio: f32,
}

/// Fixed-capacity ring of frame durations with a running sum.
#[derive(Debug, Clone)]
struct FrameWindow {
    durations: Vec<f32>,
    capacity: usize,
    next: usize,
    sum: f64,
}

impl FrameWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            durations: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            sum: 0.0,
        }
    }

    fn push(&mut self, duration_ms: f32) {
        if self.durations.len() < self.capacity {
            self.durations.push(duration_ms);
        } else {
            self.sum -= f64::from(self.durations[self.next]);
            self.durations[self.next] = duration_ms;
        }
        self.sum += f64::from(duration_ms);
        self.next = (self.next + 1) % self.capacity;
    }

    fn len(&self) -> usize {
        self.durations.len()
    }

    fn is_full(&self) -> bool {
        self.durations.len() == self.capacity
    }

    fn average(&self) -> Option<f32> {
        if self.durations.is_empty() {
            None
        } else {
            Some((self.sum / self.durations.len() as f64) as f32)
        }
    }

    fn clear(&mut self) {
        self.durations.clear();
        self.next = 0;
        self.sum = 0.0;
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    window: FrameWindow,
    current_fps: f32,
    quality: f32,
    tier: FpsTier,
    good_frames: u32,
    bad_frames: u32,
    frames_until_check: u32,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerformanceConfig::default())
    }
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            window: FrameWindow::new(config.window),
            config,
            current_fps: 0.0,
            quality: MAX_QUALITY,
            tier: FpsTier::Min,
            good_frames: 0,
            bad_frames: 0,
            frames_until_check: 0,
        }
    }

    /// Records the duration of the frame that just completed.
    pub fn record_frame(&mut self, duration_ms: f32) {
        if !duration_ms.is_finite() || duration_ms <= 0.0 {
            debug!(duration_ms, "ignoring invalid frame duration");
            return;
        }

        self.window.push(duration_ms);
        if let Some(average) = self.window.average() {
            self.current_fps = 1000.0 / average;
        }

        self.update_tier();

        if self.window.is_full() {
            if self.frames_until_check == 0 {
                self.adjust_quality();
                self.frames_until_check = self.config.adjust_interval.max(1);
            }
            self.frames_until_check -= 1;
        } else {
            let interval = self.config.early_check_interval.max(1) as usize;
            if self.window.len() % interval == 0 {
                self.recover_quality();
            }
        }
    }

    fn adjust_quality(&mut self) {
        let target = self.target_fps();
        if self.current_fps < target * self.config.degrade_ratio && self.quality > MIN_QUALITY {
            let quality = (self.quality - QUALITY_STEP).max(MIN_QUALITY);
            debug!(
                fps = self.current_fps,
                target,
                from = self.quality,
                to = quality,
                "lowering render quality"
            );
            self.quality = quality;
        } else {
            self.recover_quality();
        }
    }

    fn recover_quality(&mut self) {
        if self.current_fps >= self.target_fps() && self.quality < MAX_QUALITY {
            debug!(fps = self.current_fps, from = self.quality, "restoring full render quality");
            self.quality = MAX_QUALITY;
        }
    }

    fn update_tier(&mut self) {
        let target = self.target_fps();
        if self.current_fps >= target * self.config.good_ratio {
            self.good_frames += 1;
            self.bad_frames = 0;
        } else if self.current_fps < target * self.config.bad_ratio {
            self.bad_frames += 1;
            self.good_frames = 0;
        } else {
            self.good_frames = self.good_frames.saturating_sub(1);
            self.bad_frames = self.bad_frames.saturating_sub(1);
        }

        if self.tier == FpsTier::Min && self.good_frames >= self.config.frames_to_upgrade {
            self.set_tier(FpsTier::Max);
        } else if self.tier == FpsTier::Max && self.bad_frames >= self.config.frames_to_downgrade {
            self.set_tier(FpsTier::Min);
        }
    }

    fn set_tier(&mut self, tier: FpsTier) {
        debug!(?tier, fps = self.current_fps, "switching target frame rate");
        self.tier = tier;
        self.good_frames = 0;
        self.bad_frames = 0;
    }

    /// Average frame rate over the window, or 0 before any frame.
    pub fn current_fps(&self) -> f32 {
        self.current_fps
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn tier(&self) -> FpsTier {
        self.tier
    }

    pub fn target_fps(&self) -> f32 {
        match self.tier {
            FpsTier::Min => self.config.min_fps,
            FpsTier::Max => self.config.max_fps,
        }
    }

    pub fn is_window_full(&self) -> bool {
        self.window.is_full()
    }

    pub fn resize_hints(&self) -> ResizeHints {
        ResizeHints {
            quality: self.quality,
            max_dimension: (self.config.max_dimension as f32 * self.quality).round() as u32,
            max_pixel_ratio: (self.config.max_pixel_ratio * self.quality).max(1.0),
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.current_fps = 0.0;
        self.quality = MAX_QUALITY;
        self.tier = FpsTier::Min;
        self.good_frames = 0;
        self.bad_frames = 0;
        self.frames_until_check = 0;
    }
}
