//! Error types for controller configuration

use std::path::PathBuf;
use thiserror::Error;

/// Faults that can be reported while configuring a controller.
///
/// Gains, the sample interval, input and target are never rejected; they are
/// coerced to safe values instead. Only the clamp range and options loading
/// can fail.
#[derive(Debug, Error)]
pub enum PidError {
    #[error("invalid output bounds: lower {lower} must not exceed upper {upper}")]
    InvalidBounds { lower: f64, upper: f64 },

    #[error("failed to read options file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse options: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T, E = PidError> = std::result::Result<T, E>;
