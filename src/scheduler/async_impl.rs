use super::{run_tick, CancelFlag, LoopState, SharedController};
use crate::clock::{Clock, MonotonicClock};
use crate::metrics::TickMetrics;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct AsyncWorker {
    cancel: CancelFlag,
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Tokio counterpart of [`PidLoop`](super::PidLoop).
pub struct AsyncPidLoop<C = MonotonicClock>
where
    C: Clock + Send + 'static,
{
    controller: SharedController<C>,
    metrics: TickMetrics,
    worker: Option<AsyncWorker>,
}

impl<C> AsyncPidLoop<C>
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

    /// Spawns the loop task onto the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start_loop(&mut self) {
        if self.worker.is_some() {
            debug!("async loop already running, restarting");
            self.stop_loop();
        }

        let cancel = CancelFlag::default();
        let stop = Arc::new(Notify::new());
        let controller = self.controller.clone();
        let metrics = self.metrics.clone();
        let flag = cancel.clone();
        let stopped = stop.clone();

        let task = tokio::spawn(async move {
            loop {
                let Some(wait) = run_tick(&controller, &flag, &metrics) else {
                    break;
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stopped.notified() => break,
                }
            }
        });

        info!(dt_ms = self.controller.lock().dt_ms(), "async pid loop started");
        self.worker = Some(AsyncWorker { cancel, stop, task });
    }

    pub fn stop_loop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            // Stores a permit if the task is not currently waiting
            worker.stop.notify_one();
            drop(worker.task);
            info!("async pid loop stopped");
        }
    }
}

impl<C> Drop for AsyncPidLoop<C>
where
    C: Clock + Send + 'static,
{
    fn drop(&mut self) {
        self.stop_loop();
    }
}
