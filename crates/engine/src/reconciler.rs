//! Reconciliation sweep: settle ledger rows the fan-out left `created`.
//!
//! Rows younger than the grace period may still be in flight and are left
//! alone. Older rows get one more send through the provider registry and are
//! then marked `delivered` or `failed`. At most one sweep runs at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use siren_common::types::MessageStatus;
use siren_notifier::ProviderRegistry;

use crate::ledger::MessageLedger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// `created` rows loaded.
    pub examined: usize,
    /// Rows inside the grace period.
    pub deferred: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweep was already running.
    Skipped,
    /// The ledger could not be read.
    Aborted,
    Completed(SweepStats),
}

pub struct ReconciliationWorker {
    ledger: Arc<dyn MessageLedger>,
    registry: Arc<ProviderRegistry>,
    interval: Duration,
    grace: Duration,
    running: Arc<AtomicBool>,
}

/// Clears the single-flight flag when the sweep ends, however it ends.
struct FlightGuard(Arc<AtomicBool>);

impl FlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag.clone()))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReconciliationWorker {
    pub fn new(
        ledger: Arc<dyn MessageLedger>,
        registry: Arc<ProviderRegistry>,
        interval: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            ledger,
            registry,
            interval,
            grace,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one sweep unless another is already in progress.
    pub async fn sweep(&self) -> SweepOutcome {
        let Some(_guard) = FlightGuard::acquire(&self.running) else {
            tracing::debug!("Reconciliation sweep already running, skipping tick");
            return SweepOutcome::Skipped;
        };

        let records = match self.ledger.find_by_status(MessageStatus::Created).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Reconciliation sweep could not load pending messages");
                return SweepOutcome::Aborted;
            }
        };

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero());
        let mut stats = SweepStats {
            examined: records.len(),
            ..SweepStats::default()
        };

        for record in records {
            if record.created_at > cutoff {
                stats.deferred += 1;
                continue;
            }

            let status = match self.registry.send(&record).await {
                Ok(()) => MessageStatus::Delivered,
                Err(e) => {
                    tracing::warn!(
                        message_id = %record.id,
                        channel = %record.contact_type,
                        error = %e,
                        "Resend failed, marking message failed"
                    );
                    MessageStatus::Failed
                }
            };

            match self.ledger.update_status(record.id, status).await {
                Ok(()) if status == MessageStatus::Delivered => stats.delivered += 1,
                Ok(()) => stats.failed += 1,
                Err(e) => {
                    tracing::error!(
                        message_id = %record.id,
                        status = %status,
                        error = %e,
                        "Failed to settle message status"
                    );
                }
            }
        }

        tracing::info!(
            examined = stats.examined,
            deferred = stats.deferred,
            delivered = stats.delivered,
            failed = stats.failed,
            "Reconciliation sweep complete"
        );
        SweepOutcome::Completed(stats)
    }

    /// Sweep on every tick until `shutdown` fires. Each sweep runs on its own
    /// task so a slow sweep never delays the ticker. On shutdown every
    /// spawned sweep is awaited, including one still in progress.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            grace_secs = self.grace.as_secs(),
            "Reconciliation worker started"
        );

        let mut sweeps = JoinSet::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let worker = self.clone();
                    sweeps.spawn(async move { worker.sweep().await });
                }
                Some(joined) = sweeps.join_next(), if !sweeps.is_empty() => {
                    log_join(joined);
                }
                _ = shutdown.cancelled() => break,
            }
        }

        if !sweeps.is_empty() {
            tracing::info!("Reconciliation worker stopping, waiting for running sweep");
        }
        while let Some(joined) = sweeps.join_next().await {
            log_join(joined);
        }
        tracing::info!("Reconciliation worker stopped");
    }
}

fn log_join(joined: Result<SweepOutcome, JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Reconciliation sweep panicked");
    }
}
