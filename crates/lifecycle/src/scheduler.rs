//! Start/stop-able scheduling of the expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stock_store::CheckoutStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::reconciler::ExpiryReconciler;
use crate::services::PaymentGateway;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs [`ExpiryReconciler::sweep`] on a fixed interval.
pub struct SweepScheduler;

impl SweepScheduler {
    /// Spawns the sweep loop. The first sweep runs immediately.
    ///
    /// A sweep that overruns the interval delays the next one instead of
    /// queueing extra runs.
    pub fn start<S, G>(reconciler: Arc<ExpiryReconciler<S, G>>, interval: Duration) -> SweepHandle
    where
        S: CheckoutStore,
        G: PaymentGateway + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tracing::info!(interval_secs = interval.as_secs_f64(), "starting sweep scheduler");
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = reconciler.sweep(Utc::now()).await {
                            tracing::error!(error = %err, "sweep failed");
                        }
                    }
                }
            }
            tracing::info!("sweep scheduler stopped");
        });

        SweepHandle { token, task }
    }
}

/// Handle to a running sweep loop.
pub struct SweepHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Token that stops the loop when cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the loop and waits for an in-flight sweep to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "sweep task ended abnormally");
        }
    }
}
