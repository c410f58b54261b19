//! Scheduling wrapper - invokes compute on the controller's cadence
//!
//! Two drivers share the same contract: [`threaded::PidLoop`] runs on a
//! dedicated OS thread and [`async_impl::AsyncPidLoop`] runs as a tokio task.
//! Both pace themselves off [`PidController::time_until_next_tick`], so a
//! late wake-up never turns into a skipped tick, and both check for
//! cancellation while holding the controller lock, so no tick fires once
//! `stop_loop` has returned.

pub mod async_impl;
pub mod threaded;

use crate::clock::{Clock, MonotonicClock};
use crate::controller::PidController;
use crate::metrics::TickMetrics;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use async_impl::AsyncPidLoop;
pub use threaded::PidLoop;

/// Controller handle shared between a loop driver and its owner.
///
/// Drivers hold the lock for the whole tick, output callbacks included.
pub type SharedController<C = MonotonicClock> = Arc<Mutex<PidController<C>>>;

pub fn shared<C: Clock>(controller: PidController<C>) -> SharedController<C> {
    Arc::new(Mutex::new(controller))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Running => write!(f, "Running"),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One driver iteration. Returns how long to wait before the next one, or
/// `None` once the loop has been cancelled.
pub(crate) fn run_tick<C: Clock>(
    controller: &SharedController<C>,
    cancel: &CancelFlag,
    metrics: &TickMetrics,
) -> Option<Duration> {
    let mut pid = controller.lock();
    if cancel.is_cancelled() {
        return None;
    }

    let start = Instant::now();
    match pid.compute() {
        Some(_) => {
            metrics.record_compute(start.elapsed());
            metrics.record_tick(pid.clock().now(), pid.dt());
        }
        None => metrics.record_skip(),
    }

    Some(pid.time_until_next_tick())
}
