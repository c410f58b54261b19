use super::{run_tick, CancelFlag, LoopState, SharedController};
use crate::clock::{Clock, MonotonicClock};
use crate::metrics::TickMetrics;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::thread;
use tracing::{debug, info};

struct Worker {
    cancel: CancelFlag,
    // Dropping the sender wakes the thread out of its wait
    _stop_tx: Sender<()>,
    _handle: thread::JoinHandle<()>,
}

/// Runs a controller's `compute` on a dedicated thread, every `dt`.
///
/// `start_loop` on a running loop stops the previous thread first and starts a
/// fresh one. Dropping the loop stops it.
pub struct PidLoop<C = MonotonicClock>
where
    C: Clock + Send + 'static,
{
    controller: SharedController<C>,
    metrics: TickMetrics,
    worker: Option<Worker>,
}

impl<C> PidLoop<C>
where
    C: Clock + Send + 'static,
{
    pub fn new(controller: SharedController<C>) -> Self {
        Self::with_metrics(controller, TickMetrics::new())
    }

    pub fn with_metrics(controller: SharedController<C>, metrics: TickMetrics) -> Self {
        Self {
            controller,
            metrics,
            worker: None,
        }
    }

    pub fn controller(&self) -> &SharedController<C> {
        &self.controller
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn state(&self) -> LoopState {
        match self.worker {
            Some(_) => LoopState::Running,
            None => LoopState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn start_loop(&mut self) {
        if self.worker.is_some() {
            debug!("loop already running, restarting");
            self.stop_loop();
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let cancel = CancelFlag::default();
        let controller = self.controller.clone();
        let metrics = self.metrics.clone();
        let flag = cancel.clone();

        let handle = thread::spawn(move || loop {
            let Some(wait) = run_tick(&controller, &flag, &metrics) else {
                break;
            };
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        info!(dt_ms = self.controller.lock().dt_ms(), "pid loop started");
        self.worker = Some(Worker {
            cancel,
            _stop_tx: stop_tx,
            _handle: handle,
        });
    }

    /// Cancels the loop. Returns without waiting for an in-flight tick, but no
    /// new tick will start afterwards.
    pub fn stop_loop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            drop(worker);
            info!("pid loop stopped");
        }
    }
}

impl<C> Drop for PidLoop<C>
where
    C: Clock + Send + 'static,
{
    fn drop(&mut self) {
        self.stop_loop();
    }
}
