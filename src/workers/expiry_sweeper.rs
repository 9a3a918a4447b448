use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SweeperConfig;
use crate::database::store::LedgerStore;
use crate::services::orders::{OrderService, RefreshOutcome};

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Counters for one sweep cycle.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub expired: usize,
    pub completed: usize,
    pub failed: usize,
    /// Orders that could not be processed this cycle; retried next cycle.
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Periodically settles active orders whose expiry has passed.
///
/// Each overdue order goes through [`OrderService::refresh_order`], so a code
/// that arrived just before expiry still completes the order, and a refund
/// raced by a user cancel is applied exactly once.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn LedgerStore>,
    orders: OrderService,
    config: SweeperConfig,
    running: Arc<AtomicBool>,
}

/// Clears the running flag even if a sweep panics.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn LedgerStore>, orders: OrderService, config: SweeperConfig) -> Self {
        Self {
            store,
            orders,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "order expiry sweeper started"
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("order expiry sweeper stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        info!("order expiry sweeper stopped");
    }

    /// Runs one cycle. Returns `None` when a cycle is already in flight.
    pub async fn sweep_once(&self) -> Option<SweepSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous sweep still running, skipping tick");
            return None;
        }
        let _guard = RunningGuard(self.running.clone());

        let started_at = Utc::now();
        let mut summary = SweepSummary {
            checked: 0,
            expired: 0,
            completed: 0,
            failed: 0,
            errors: 0,
            started_at,
            finished_at: started_at,
        };

        let overdue = match self
            .store
            .find_overdue_orders(started_at, self.config.batch_size)
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "failed to load overdue orders");
                summary.errors += 1;
                summary.finished_at = Utc::now();
                return Some(summary);
            }
        };

        summary.checked = overdue.len();
        let results: Vec<_> = stream::iter(overdue)
            .map(|order| {
                let orders = self.orders.clone();
                async move {
                    let order_id = order.id;
                    (order_id, orders.refresh_order(order).await)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (order_id, result) in results {
            match result {
                Ok((_, RefreshOutcome::Expired)) => summary.expired += 1,
                Ok((_, RefreshOutcome::Completed)) => summary.completed += 1,
                Ok((_, RefreshOutcome::Failed)) => summary.failed += 1,
                Ok((_, RefreshOutcome::Unchanged)) => {}
                Err(e) => {
                    warn!(%order_id, error = %e, "failed to settle overdue order");
                    summary.errors += 1;
                }
            }
        }

        summary.finished_at = Utc::now();
        log_summary(&summary);
        Some(summary)
    }
}

fn log_summary(summary: &SweepSummary) {
    let duration_ms = (summary.finished_at - summary.started_at).num_milliseconds();
    if summary.checked == 0 {
        debug!(
            checked = 0,
            started_at = %summary.started_at.to_rfc3339(),
            finished_at = %summary.finished_at.to_rfc3339(),
            duration_ms,
            "expiry sweep finished, nothing overdue"
        );
        return;
    }
    info!(
        checked = summary.checked,
        expired = summary.expired,
        completed = summary.completed,
        failed = summary.failed,
        errors = summary.errors,
        started_at = %summary.started_at.to_rfc3339(),
        finished_at = %summary.finished_at.to_rfc3339(),
        duration_ms,
        "expiry sweep finished"
    );
}
