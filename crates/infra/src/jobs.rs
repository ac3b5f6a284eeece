//! Background execution of the reconciliation job.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::order_store::OrderStore;
use crate::reconciliation::ReconciliationJob;
use crate::stock_store::StockStore;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Time between healing passes.
    pub interval: Duration,
    /// Name for logging.
    pub name: String,
}

impl RunnerConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            name: "reconciliation-runner".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Handle to control a running reconciliation runner.
#[derive(Debug)]
pub struct ReconciliationRunnerHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ReconciliationRunnerHandle {
    /// Request graceful shutdown and wait for the final pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}

/// Spawn the reconciliation job on a fixed interval.
///
/// The first pass runs immediately; a pass that overruns its slot delays
/// the next one rather than stacking up. Reports are logged by the job
/// itself; the runner only owns scheduling and shutdown.
pub fn spawn_reconciliation_runner<S, O>(
    job: ReconciliationJob<S, O>,
    config: RunnerConfig,
) -> ReconciliationRunnerHandle
where
    S: StockStore + Clone + Send + Sync + 'static,
    O: OrderStore + Send + Sync + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let join = tokio::spawn(async move {
        info!(runner = %config.name, interval_secs = config.interval.as_secs(), "reconciliation runner started");

        // tokio panics on a zero period.
        let period = config.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    job.heal().await;
                }
            }
        }

        info!(runner = %config.name, "reconciliation runner stopped");
    });

    ReconciliationRunnerHandle {
        shutdown: shutdown_tx,
        join,
    }
}
