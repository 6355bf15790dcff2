//! Background reconciliation of epic status from descendant state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::interval;

use super::engine::WorkflowEngine;

/// Periodically sweeps every non-terminal epic through
/// `update_epic_from_stories`. Stop is cooperative: `stop()` flips a shared
/// flag that the loop observes on its next tick.
pub struct Reconciler {
    engine: Arc<WorkflowEngine>,
    running: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        tracing::info!("Stopping reconciler");
        self.running.store(false, Ordering::Relaxed);
    }

    /// Drive the reconciliation loop until stopped. The first tick fires
    /// after one full period.
    pub async fn run(&self) {
        self.running.store(true, Ordering::Relaxed);
        let period = self.engine.config().progress_update_freq;
        tracing::info!("Reconciler started, period {:?}", period);

        let mut ticker = interval(period);
        // Consume the immediate first tick so the sweep waits a full period.
        ticker.tick().await;

        while self.running.load(Ordering::Relaxed) {
            ticker.tick().await;
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            match self.engine.reconcile_all() {
                Ok(count) => tracing::debug!("Reconciled {} epics", count),
                Err(e) => tracing::warn!("Reconciliation sweep failed: {}", e),
            }
        }

        tracing::info!("Reconciler stopped");
    }
}
