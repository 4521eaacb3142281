/// Result alias that carries the custom [`BeatBindError`] type.
pub type Result<T> = std::result::Result<T, BeatBindError>;

/// Common error type for the core crate.
///
/// Only setup-time operations (curve construction, configuration validation,
/// the demo analysis path) are fallible. Per-frame operations never return
/// errors; they degrade to safe defaults and log instead.
#[derive(Debug, thiserror::Error)]
pub enum BeatBindError {
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Input data that cannot be processed at all.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Bezier control points that do not describe a function of x.
    #[error("invalid bezier control points ({x1}, {y1}, {x2}, {y2}): {reason}")]
    InvalidCurve {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        reason: &'static str,
    },
    /// Tunables that contradict each other.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A reactivity source name that is not part of the metric set.
    #[error("unknown reactivity source `{0}`")]
    UnknownSource(String),
    /// Failure reported by the FFT backend.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl BeatBindError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<&str> for BeatBindError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatBindError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
