//! Cubic-bezier response curves.
//!
//! Curves use the familiar easing form: endpoints pinned at (0, 0) and (1, 1)
//! with two free control points. [`CubicBezier::solve`] maps an input level to
//! the eased output; [`CurveCache`] memoises quantised samples per curve.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{BeatBindError, Result};

const SOLVE_ITERATIONS: usize = 20;
const SOLVE_EPSILON: f32 = 1e-4;

/// Number of quantisation buckets stored per cached curve.
pub const CACHE_BUCKETS: usize = 128;

/// Maximum number of distinct curves the cache keeps at once.
pub const MAX_CACHED_CURVES: usize = 64;

/// A fixed-endpoint cubic bezier `(0,0) (x1,y1) (x2,y2) (1,1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; 4]", into = "[f32; 4]")]
pub struct CubicBezier {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl CubicBezier {
    pub const LINEAR: CubicBezier = CubicBezier::unchecked(0.0, 0.0, 1.0, 1.0);
    pub const EASE: CubicBezier = CubicBezier::unchecked(0.25, 0.1, 0.25, 1.0);
    pub const EASE_IN: CubicBezier = CubicBezier::unchecked(0.42, 0.0, 1.0, 1.0);
    pub const EASE_OUT: CubicBezier = CubicBezier::unchecked(0.0, 0.0, 0.58, 1.0);
    pub const EASE_IN_OUT: CubicBezier = CubicBezier::unchecked(0.42, 0.0, 0.58, 1.0);

    const fn unchecked(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Validates the control points.
    ///
    /// All values must be finite and both x coordinates must lie in `[0, 1]`,
    /// which keeps x(t) monotonic so the curve is a function of x. The y
    /// coordinates may overshoot.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        let invalid = |reason| BeatBindError::InvalidCurve {
            x1,
            y1,
            x2,
            y2,
            reason,
        };

        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(invalid("control points must be finite"));
        }
        if !(0.0..=1.0).contains(&x1) || !(0.0..=1.0).contains(&x2) {
            return Err(invalid("x coordinates must lie in [0, 1]"));
        }

        Ok(Self::unchecked(x1, y1, x2, y2))
    }

    /// Like [`CubicBezier::new`], but substitutes [`CubicBezier::LINEAR`] and
    /// logs a warning when the control points are invalid.
    pub fn new_or_linear(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2, y2).unwrap_or_else(|err| {
            warn!(%err, "falling back to linear response curve");
            Self::LINEAR
        })
    }

    pub fn control_points(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Evaluates the eased output for `x`, clamped to `[0, 1]` first.
    pub fn solve(&self, x: f32) -> f32 {
        let x = if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 };
        let t = self.parameter_for(x);
        bezier_component(t, self.y1, self.y2)
    }

    pub fn is_linear(&self) -> bool {
        self.x1 == self.y1 && self.x2 == self.y2
    }

    /// Binary search for the curve parameter whose x equals `x`.
    fn parameter_for(&self, x: f32) -> f32 {
        let mut low = 0.0_f32;
        let mut high = 1.0_f32;
        let mut t = x;

        for _ in 0..SOLVE_ITERATIONS {
            let estimate = bezier_component(t, self.x1, self.x2);
            let error = estimate - x;
            if error.abs() < SOLVE_EPSILON {
                break;
            }
            if error > 0.0 {
                high = t;
            } else {
                low = t;
            }
            t = (low + high) * 0.5;
        }

        t
    }

    fn key(&self) -> CurveKey {
        let round = |v: f32| (v * 1000.0).round() as i32;
        CurveKey([round(self.x1), round(self.y1), round(self.x2), round(self.y2)])
    }
}

impl Default for CubicBezier {
    fn default() -> Self {
        Self::LINEAR
    }
}

impl TryFrom<[f32; 4]> for CubicBezier {
    type Error = BeatBindError;

    fn try_from(value: [f32; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = value;
        Self::new(x1, y1, x2, y2)
    }
}

impl From<CubicBezier> for [f32; 4] {
    fn from(value: CubicBezier) -> Self {
        value.control_points()
    }
}

/// One coordinate of the bezier at parameter `t`, with endpoints 0 and 1.
fn bezier_component(t: f32, p1: f32, p2: f32) -> f32 {
    let inv = 1.0 - t;
    3.0 * inv * inv * t * p1 + 3.0 * inv * t * t * p2 + t * t * t
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CurveKey([i32; 4]);

/// Largest gap allowed between a segment's interpolated midpoint and the
/// exact solve before the segment is answered exactly.
pub const INTERPOLATION_TOLERANCE: f32 = 5e-4;

#[derive(Debug, Clone)]
struct CurveSamples {
    samples: Vec<Option<f32>>,
    /// Per segment: `Some(true)` when linear interpolation is close enough.
    segments: Vec<Option<bool>>,
}

impl CurveSamples {
    fn new() -> Self {
        Self {
            samples: vec![None; CACHE_BUCKETS + 1],
            segments: vec![None; CACHE_BUCKETS],
        }
    }

    fn fill(&mut self, curve: &CubicBezier, bucket: usize) -> f32 {
        *self.samples[bucket]
            .get_or_insert_with(|| curve.solve(bucket as f32 / CACHE_BUCKETS as f32))
    }

    fn classify(&mut self, curve: &CubicBezier, segment: usize) -> bool {
        if let Some(interpolable) = self.segments[segment] {
            return interpolable;
        }
        let a = self.fill(curve, segment);
        let b = self.fill(curve, segment + 1);
        let midpoint = curve.solve((segment as f32 + 0.5) / CACHE_BUCKETS as f32);
        let interpolable = ((a + b) * 0.5 - midpoint).abs() <= INTERPOLATION_TOLERANCE;
        self.segments[segment] = Some(interpolable);
        interpolable
    }
}

/// Hit/miss counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub curves: usize,
}

/// Bounded cache of quantised curve samples.
///
/// Curves are keyed by their control points rounded to three decimals. Each
/// curve stores at most `CACHE_BUCKETS + 1` samples; at most
/// [`MAX_CACHED_CURVES`] curves are kept, evicting the oldest first. A lookup
/// interpolates between the two neighbouring buckets only when that segment's
/// midpoint agrees with the exact solve within [`INTERPOLATION_TOLERANCE`];
/// steeper segments are always answered with the exact solve.
#[derive(Debug)]
pub struct CurveCache {
    curves: HashMap<CurveKey, CurveSamples>,
    order: VecDeque<CurveKey>,
    capacity: usize,
    stats: CacheStats,
}

impl Default for CurveCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CurveCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHED_CURVES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            curves: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn solve(&mut self, curve: &CubicBezier, x: f32) -> f32 {
        let x = if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 };
        if curve.is_linear() {
            return curve.solve(x);
        }

        let position = x * CACHE_BUCKETS as f32;
        let low = (position.floor() as usize).min(CACHE_BUCKETS - 1);
        let high = low + 1;
        let fraction = position - low as f32;

        let key = curve.key();
        let samples = self.entry(key);
        let known = samples.segments[low].is_some();

        // The answer depends only on the curve and the input, never on
        // whether this call filled the segment.
        let value = match (samples.classify(curve, low), samples.samples[low], samples.samples[high]) {
            (true, Some(a), Some(b)) => a + (b - a) * fraction,
            _ => curve.solve(x),
        };

        if known {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        value
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            curves: self.curves.len(),
            ..self.stats
        }
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    pub fn clear(&mut self) {
        self.curves.clear();
        self.order.clear();
        self.stats = CacheStats::default();
    }

    fn entry(&mut self, key: CurveKey) -> &mut CurveSamples {
        if !self.curves.contains_key(&key) {
            while self.curves.len() >= self.capacity {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.curves.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(key);
        }
        self.curves.entry(key).or_insert_with(CurveSamples::new)
    }
}
