//! Property tests for the per-frame invariants of the engine.

use beatbind_core::{
    AudioFrame, AudioReactivityManager, Band, BandSample, BandTriple, BeatDetector, CubicBezier,
    NoteFraction, RateLimiter, ReactivityConfig, ReactivityMode, ReactivitySource,
    TimeOffsetConfig, TimeOffsetManager,
};
use proptest::prelude::*;

const FRAME_MS: f64 = 1000.0 / 60.0;

fn any_source() -> impl Strategy<Value = ReactivitySource> {
    prop::sample::select(ReactivitySource::all().collect::<Vec<_>>())
}

fn any_mode() -> impl Strategy<Value = ReactivityMode> {
    prop::sample::select(vec![
        ReactivityMode::Additive,
        ReactivityMode::Interpolation,
        ReactivityMode::Speed,
    ])
}

fn any_curve() -> impl Strategy<Value = CubicBezier> {
    (0.0f32..=1.0, -1.0f32..2.0, 0.0f32..=1.0, -1.0f32..2.0).prop_map(|(x1, y1, x2, y2)| {
        CubicBezier::new(x1, y1, x2, y2).expect("x coordinates are generated inside [0, 1]")
    })
}

fn any_note() -> impl Strategy<Value = NoteFraction> {
    (1u16..=32).prop_map(NoteFraction::from_denominator)
}

prop_compose! {
    fn any_config()(
        source in any_source(),
        attack in proptest::option::of(any_note()),
        release in proptest::option::of(any_note()),
        curve in proptest::option::of(any_curve()),
        mode in any_mode(),
        invert in any::<bool>(),
        strength in proptest::option::of(-2.0f32..4.0),
        min in proptest::option::of(-2.0f32..2.0),
        max in proptest::option::of(-2.0f32..2.0),
    ) -> ReactivityConfig {
        ReactivityConfig { source, attack, release, curve, mode, invert, strength, min, max }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn smoothed_value_stays_in_unit_range(
        config in any_config(),
        frames in prop::collection::vec(
            (0.0f32..1.5, 0.0f32..1.5, 0.0f32..1.5, -0.05f32..0.1),
            1..60,
        ),
        bpm in proptest::option::of(40.0f32..220.0),
    ) {
        let mut detector = BeatDetector::default();
        let mut manager = AudioReactivityManager::new();
        let mut now = 0.0;

        for (bass, mid, treble, dt) in frames {
            let mut sample = BandSample::from_bands(bass, mid, treble);
            if let Some(bpm) = bpm {
                sample = sample.with_bpm_override(bpm);
            }
            detector.update(&sample, now);
            now += FRAME_MS;

            let frame = AudioFrame::new(Some(&sample), detector.frame());
            let value = manager.smoothed_value("param", &frame, &config, dt);
            prop_assert!((0.0..=1.0).contains(&value), "value {} out of range", value);
        }
    }

    #[test]
    fn linear_curve_is_identity(x in 0.0f32..=1.0) {
        let y = CubicBezier::LINEAR.solve(x);
        prop_assert!((y - x).abs() < 1e-3);
    }

    #[test]
    fn curve_endpoints_are_exact(curve in any_curve()) {
        prop_assert_eq!(curve.solve(0.0), 0.0);
        prop_assert_eq!(curve.solve(1.0), 1.0);
    }

    #[test]
    fn disabled_time_offset_never_grows(
        warmup in 1usize..240,
        levels in prop::collection::vec(0.0f32..1.5, 1..400),
    ) {
        let mut manager = TimeOffsetManager::new(TimeOffsetConfig::default());
        for _ in 0..warmup {
            manager.update(1.0, 1.0 / 60.0, 120.0);
        }
        manager.set_enabled(false);

        let mut previous = manager.time_offset();
        for level in levels {
            manager.update(level, 1.0 / 60.0, 120.0);
            let offset = manager.time_offset();
            prop_assert!(offset <= previous);
            prop_assert!(offset >= 0.0);
            previous = offset;
        }
    }

    #[test]
    fn band_below_its_floor_never_beats(
        values in prop::collection::vec(0.0f32..0.08, 1..200),
        peak in 0.0f32..1.0,
    ) {
        let mut detector = BeatDetector::default();
        let peaks = BandTriple { bass: peak, mid: 0.0, treble: 0.0 };
        for (i, value) in values.into_iter().enumerate() {
            let sample = BandSample::from_bands(value, 0.0, 0.0).with_peaks(peaks);
            let frame = detector.update(&sample, i as f64 * FRAME_MS);
            prop_assert!(frame.events.iter().all(|event| event.band != Band::Bass));
        }
    }

    #[test]
    fn rate_limiter_respects_window_budget(
        steps in prop::collection::vec(1.0f64..200.0, 1..200),
    ) {
        let mut limiter = RateLimiter::new(500.0, 4, 500.0);
        let mut now = 0.0;
        let mut accepted: Vec<f64> = Vec::new();
        for step in steps {
            now += step;
            if limiter.try_acquire(now) {
                accepted.push(now);
            }
        }
        for (i, start) in accepted.iter().enumerate() {
            let in_window = accepted[i..].iter().filter(|t| **t - start < 500.0).count();
            prop_assert!(in_window <= 4);
        }
    }
}
