//! Core library for beatbind.
//!
//! The crate turns per-frame frequency analysis into smoothed control values
//! for visual parameters. Each module owns one stage of that pipeline (beat
//! detection, tempo-relative smoothing, response curves, the loudness-driven
//! time offset, transient pulses and adaptive quality control), and
//! [`ReactiveEngine`] drives them in order once per frame. Everything is
//! synchronous and owned; nothing here performs I/O.

pub mod analysis;
pub mod beat;
pub mod config;
pub mod curve;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod offset;
pub mod performance;
pub mod reactivity;
pub mod sample;
pub mod tempo;
pub mod timeline;
pub mod transient;

pub use analysis::SpectrumAnalyzer;
pub use beat::{BandBeat, BeatDetector, BeatEvent, BeatFrame, BpmEstimate, GlobalBeat};
pub use config::{
    BeatConfig, EngineConfig, LegacyBeatConfig, PerformanceConfig, PulseConfig, TimeOffsetConfig,
};
pub use curve::{CubicBezier, CurveCache};
pub use engine::{FrameOutput, ReactiveEngine};
pub use error::{BeatBindError, Result};
pub use mapping::{MappingMatrix, ParameterBinding, ParameterUpdate, PulseBinding};
pub use offset::TimeOffsetManager;
pub use performance::{FpsTier, PerformanceMonitor, ResizeHints};
pub use reactivity::{
    AudioFrame, AudioReactivityManager, ReactivityConfig, ReactivityMode, ReactivitySource,
};
pub use sample::{Band, BandSample, BandTriple};
pub use tempo::{EnvelopeSmoother, NoteFraction};
pub use timeline::FrameClock;
pub use transient::{RateLimiter, TransientTrigger};
