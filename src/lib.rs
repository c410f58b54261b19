//! Discrete-time PID controller with integral anti-windup, derivative on
//! measurement and a cancellable periodic loop.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod scheduler;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{load_options, load_options_or, load_options_or_default, PidOptions, DEFAULT_INTERVAL_MS};
pub use controller::PidController;
pub use error::PidError;
pub use metrics::{MetricsReport, TickMetrics};
pub use observer::{OutputBus, SubscriptionId};
pub use scheduler::{shared, AsyncPidLoop, LoopState, PidLoop, SharedController};
