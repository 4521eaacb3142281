use std::f32::consts::PI;

use beatbind_core::{
    BandSample, BeatBindError, CubicBezier, FrameClock, NoteFraction, ParameterBinding,
    PulseBinding, ReactiveEngine, ReactivityConfig, ReactivityMode,
    ReactivitySource, SpectrumAnalyzer,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const SAMPLE_RATE: u32 = 48_000;
const KICK_HZ: f32 = 60.0;
const HAT_HZ: f32 = 9_000.0;

fn main() -> beatbind_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            bpm,
            seconds,
            fps,
            metadata_bpm,
            json,
        } => run_simulation(bpm, seconds, fps, metadata_bpm, json),
        Commands::Curve {
            x1,
            y1,
            x2,
            y2,
            steps,
        } => print_curve(x1, y1, x2, y2, steps),
    }
}

fn run_simulation(
    bpm: f32,
    seconds: f32,
    fps: f32,
    metadata_bpm: Option<f32>,
    json: bool,
) -> beatbind_core::Result<()> {
    if !(bpm > 0.0 && seconds > 0.0 && fps > 0.0) {
        return Err(BeatBindError::InvalidInput(
            "bpm, seconds and fps must all be positive",
        ));
    }
    tracing::info!(bpm, seconds, fps, ?metadata_bpm, "starting simulation");

    let mut analyzer = SpectrumAnalyzer::with_sample_rate(SAMPLE_RATE).with_gain(1.5);
    analyzer.set_bpm_override(metadata_bpm);
    let mut engine = ReactiveEngine::default();
    bind_demo_parameters(&mut engine);

    let block = ((SAMPLE_RATE as f32 / fps).round() as usize).max(2);
    let frames = (seconds * fps).ceil() as u64;
    let frame_ms = 1000.0 / fps;
    let beat_seconds = 60.0 / bpm;

    let mut clock = FrameClock::new();
    let mut beats = 0usize;
    let mut left = vec![0.0; block];
    let mut right = vec![0.0; block];

    for frame in 0..frames {
        let start = frame as usize * block;
        synthesize(&mut left, &mut right, start, beat_seconds);
        let sample = analyzer.process_stereo(&left, &right)?;

        clock.advance(1.0 / fps);
        let output = engine.tick(Some(&sample), &clock);
        for event in &output.events {
            tracing::debug!(
                band = %event.band,
                at_ms = event.timestamp_ms,
                intensity = event.intensity,
                "beat"
            );
        }
        beats += output.events.len();

        engine.record_frame(simulated_frame_time(frame_ms, &sample));

        if json {
            let line = serde_json::to_string(&output)
                .map_err(|err| BeatBindError::msg(format!("failed to encode frame: {err}")))?;
            println!("{line}");
        }
    }

    let hints = engine.resize_hints();
    tracing::info!(
        frames,
        beats,
        bpm = ?engine.bpm(),
        quality = engine.quality(),
        max_dimension = hints.max_dimension,
        time_offset = engine.time_offset(),
        "simulation finished"
    );
    Ok(())
}

fn bind_demo_parameters(engine: &mut ReactiveEngine) {
    engine.bind(ParameterBinding::new(
        "pulse_scale",
        ReactivityConfig::new(ReactivitySource::BassBeat),
    ));
    engine.bind(ParameterBinding::new(
        "glow",
        ReactivityConfig::new(ReactivitySource::Volume)
            .with_envelope(NoteFraction::EIGHTH, NoteFraction::QUARTER)
            .with_curve(CubicBezier::EASE_OUT),
    ));
    engine.bind(ParameterBinding::new(
        "hue_shift",
        ReactivityConfig::new(ReactivitySource::Treble)
            .with_envelope(NoteFraction::SIXTEENTH, NoteFraction::HALF)
            .with_mode(ReactivityMode::Interpolation)
            .with_range(0.0, 360.0),
    ));
    engine.bind(ParameterBinding::new(
        "rotation_speed",
        ReactivityConfig::new(ReactivitySource::Low)
            .with_envelope(NoteFraction::QUARTER, NoteFraction::WHOLE)
            .with_mode(ReactivityMode::Speed)
            .with_range(0.1, 2.0),
    ));
    engine.add_pulse(PulseBinding::new("flash", ReactivitySource::Bass));
}

/// Fills one block of a kick on every beat and a hat on every off-beat. The
/// hat leans right so the stereo metrics have something to show.
fn synthesize(left: &mut [f32], right: &mut [f32], start: usize, beat_seconds: f32) {
    for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
        let t = (start + i) as f32 / SAMPLE_RATE as f32;
        let since_beat = t % beat_seconds;
        let since_offbeat = (t + beat_seconds * 0.5) % beat_seconds;

        let kick = (-since_beat * 18.0).exp() * (2.0 * PI * KICK_HZ * t).sin();
        let hat = (-since_offbeat * 60.0).exp() * (2.0 * PI * HAT_HZ * t).sin() * 0.4;

        *l = kick * 0.8 + hat * 0.3;
        *r = kick * 0.8 + hat * 0.7;
    }
}

/// Pretends rendering gets slower the busier the picture is.
fn simulated_frame_time(frame_ms: f32, sample: &BandSample) -> f32 {
    frame_ms * (1.0 + sample.volume)
}

fn print_curve(x1: f32, y1: f32, x2: f32, y2: f32, steps: usize) -> beatbind_core::Result<()> {
    let curve = CubicBezier::new(x1, y1, x2, y2)?;
    let steps = steps.max(1);
    for i in 0..=steps {
        let x = i as f32 / steps as f32;
        println!("{x:.4}\t{:.4}", curve.solve(x));
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive control engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic kick/hat track through the analyser and engine.
    Simulate {
        /// Tempo of the synthetic track.
        #[arg(long, default_value_t = 120.0)]
        bpm: f32,
        /// Length of the simulation in seconds.
        #[arg(long, default_value_t = 8.0)]
        seconds: f32,
        /// Frame rate the engine is ticked at.
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
        /// Tempo reported as track metadata; overrides detection.
        #[arg(long)]
        metadata_bpm: Option<f32>,
        /// Print every frame's output as a JSON line.
        #[arg(long)]
        json: bool,
    },
    /// Print samples of a cubic-bezier response curve.
    #[command(allow_negative_numbers = true)]
    Curve {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        /// Number of intervals between 0 and 1.
        #[arg(long, default_value_t = 10)]
        steps: usize,
    },
}
