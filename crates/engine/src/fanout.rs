//! Fan-out engine: deliver one rendered broadcast to every active contact of
//! every receiver in its city.
//!
//! A feeder task streams receivers into a bounded channel; a fixed pool of
//! workers drains it. For each active contact a worker writes a `created`
//! ledger row, hands the row to the provider registry and marks it
//! `delivered` on success. Anything that goes wrong stays `created` for the
//! reconciliation sweep.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use siren_common::error::AppError;
use siren_common::types::{Contact, MessageRecord, MessageStatus, Receiver, RenderedBroadcast};
use siren_notifier::{NotifyError, ProviderRegistry};

use crate::ledger::MessageLedger;
use crate::queue::BroadcastHandler;
use crate::receivers::ReceiverDirectory;

/// Aggregate counts for one fan-out run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    /// Receivers found for the city.
    pub receivers: usize,
    /// Active (receiver, contact) pairs processed.
    pub attempted: usize,
    /// Rows marked delivered.
    pub delivered: usize,
    /// Rows written but left `created`.
    pub pending: usize,
}

impl FanoutSummary {
    fn merge(&mut self, other: FanoutSummary) {
        self.receivers += other.receivers;
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.pending += other.pending;
    }
}

#[derive(Clone)]
pub struct FanoutEngine {
    directory: Arc<dyn ReceiverDirectory>,
    ledger: Arc<dyn MessageLedger>,
    registry: Arc<ProviderRegistry>,
    workers: usize,
}

impl FanoutEngine {
    pub fn new(
        directory: Arc<dyn ReceiverDirectory>,
        ledger: Arc<dyn MessageLedger>,
        registry: Arc<ProviderRegistry>,
        workers: usize,
    ) -> Self {
        Self {
            directory,
            ledger,
            registry,
            workers: workers.max(1),
        }
    }

    /// Fan `broadcast` out and wait until every receiver has been processed.
    ///
    /// Only a directory failure is returned as an error. A city with no
    /// receivers is a successful no-op.
    pub async fn fan_out(&self, broadcast: RenderedBroadcast) -> Result<FanoutSummary, AppError> {
        let receivers = self.directory.find_by_city(&broadcast.city).await?;
        if receivers.is_empty() {
            tracing::info!(city = %broadcast.city, "No receivers in city, nothing to send");
            return Ok(FanoutSummary::default());
        }

        let broadcast = Arc::new(broadcast);
        let (tx, rx) = mpsc::channel::<Receiver>(self.workers);
        let rx = Arc::new(Mutex::new(rx));

        let feeder = tokio::spawn(async move {
            for receiver in receivers {
                if tx.send(receiver).await.is_err() {
                    break;
                }
            }
        });

        let handles: Vec<JoinHandle<FanoutSummary>> = (0..self.workers)
            .map(|_| {
                let rx = rx.clone();
                let worker = Worker {
                    ledger: self.ledger.clone(),
                    registry: self.registry.clone(),
                    broadcast: broadcast.clone(),
                };
                tokio::spawn(async move { worker.drain(rx).await })
            })
            .collect();

        let mut summary = FanoutSummary::default();
        for handle in handles {
            match handle.await {
                Ok(partial) => summary.merge(partial),
                Err(e) => tracing::error!(error = %e, "Fan-out worker panicked"),
            }
        }
        if let Err(e) = feeder.await {
            tracing::error!(error = %e, "Fan-out feeder panicked");
        }

        tracing::info!(
            city = %broadcast.city,
            receivers = summary.receivers,
            attempted = summary.attempted,
            delivered = summary.delivered,
            pending = summary.pending,
            "Fan-out complete"
        );
        Ok(summary)
    }
}

#[async_trait]
impl BroadcastHandler for FanoutEngine {
    async fn handle(&self, broadcast: RenderedBroadcast) -> Result<(), AppError> {
        self.fan_out(broadcast).await.map(|_| ())
    }
}

struct Worker {
    ledger: Arc<dyn MessageLedger>,
    registry: Arc<ProviderRegistry>,
    broadcast: Arc<RenderedBroadcast>,
}

impl Worker {
    async fn drain(self, rx: Arc<Mutex<mpsc::Receiver<Receiver>>>) -> FanoutSummary {
        let mut summary = FanoutSummary::default();
        loop {
            let next = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(receiver) = next else {
                break;
            };

            summary.receivers += 1;
            for contact in receiver.active_contacts() {
                summary.attempted += 1;
                match self.deliver(receiver.id, contact).await {
                    Outcome::Delivered => summary.delivered += 1,
                    Outcome::Pending => summary.pending += 1,
                    Outcome::NotRecorded => {}
                }
            }
        }
        summary
    }

    async fn deliver(&self, receiver_id: Uuid, contact: &Contact) -> Outcome {
        let mut record = MessageRecord::for_contact(&self.broadcast, receiver_id, contact);
        record.id = match self.ledger.create(&record).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    receiver_id = %receiver_id,
                    channel = %contact.channel_type,
                    error = %e,
                    "Failed to record message, skipping contact"
                );
                return Outcome::NotRecorded;
            }
        };

        match self.registry.send(&record).await {
            Ok(()) => {}
            Err(NotifyError::NoProvider(channel)) => {
                tracing::warn!(
                    message_id = %record.id,
                    channel = %channel,
                    "No provider for channel, message left pending"
                );
                return Outcome::Pending;
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %record.id,
                    channel = %contact.channel_type,
                    error = %e,
                    "Provider send failed, message left pending"
                );
                return Outcome::Pending;
            }
        }

        if let Err(e) = self
            .ledger
            .update_status(record.id, MessageStatus::Delivered)
            .await
        {
            tracing::error!(
                message_id = %record.id,
                error = %e,
                "Sent message could not be marked delivered"
            );
            return Outcome::Pending;
        }
        Outcome::Delivered
    }
}

enum Outcome {
    Delivered,
    Pending,
    NotRecorded,
}
