//! Controller options and options-file loading

use crate::error::{PidError, Result};
use serde::Deserialize;
use std::path::Path;

/// Sample interval used when none (or a non-positive one) is configured.
pub const DEFAULT_INTERVAL_MS: u64 = 500;

// ============================================================================
// PID OPTIONS - Recognized construction options
// ============================================================================

/// Options bag accepted by [`PidController::new`](crate::PidController::new).
///
/// Every key may be omitted. Unset bounds mean that side of the output is
/// unclamped, rather than clamped to zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PidOptions {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Sample interval in milliseconds.
    pub dt: Option<i64>,
    /// Initial process input.
    pub initial: f64,
    pub target: f64,
    pub u_bound: Option<f64>,
    pub l_bound: Option<f64>,
}

impl PidOptions {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn with_tuning(mut self, kp: f64, ki: f64, kd: f64) -> Self {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self
    }

    pub fn with_interval_ms(mut self, dt: i64) -> Self {
        self.dt = Some(dt);
        self
    }

    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = target;
        self
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.l_bound = Some(lower);
        self.u_bound = Some(upper);
        self
    }
}

/// Resolves a configured interval to a usable one.
pub fn resolve_interval_ms(ms: Option<i64>) -> u64 {
    match ms {
        Some(ms) if ms > 0 => ms as u64,
        _ => DEFAULT_INTERVAL_MS,
    }
}

// ============================================================================
// OPTIONS FILE LOADING
// ============================================================================

pub fn load_options(path: impl AsRef<Path>) -> Result<PidOptions> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| PidError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    PidOptions::from_toml_str(&contents)
}

/// Loads options from `path`, falling back to `fallback` when the file is
/// missing or malformed.
pub fn load_options_or(path: impl AsRef<Path>, fallback: PidOptions) -> PidOptions {
    match load_options(path.as_ref()) {
        Ok(options) => options,
        Err(e) => {
            tracing::warn!(path = %path.as_ref().display(), error = %e, "using fallback options");
            fallback
        }
    }
}

pub fn load_options_or_default(path: impl AsRef<Path>) -> PidOptions {
    load_options_or(path, PidOptions::default())
}
