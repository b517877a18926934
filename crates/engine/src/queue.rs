//! Broadcast queue: the boundary between the HTTP dispatch path and fan-out.
//!
//! The Redis rendition is a reliable list. Producers `LPUSH`; the consumer
//! `BLMOVE`s each payload into `<key>:processing` and removes it with `LREM`
//! once handled. Payloads stranded in the processing list by a crash are
//! pushed back at startup, so delivery is at-least-once.
//!
//! `BLMOVE` holds its connection for the whole wait, so acknowledgements and
//! recovery go through a separate connection when one is supplied.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use siren_common::error::AppError;
use siren_common::types::RenderedBroadcast;

/// One payload taken off the queue, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Vec<u8>,
}

/// Producer side of the queue.
#[async_trait]
pub trait BroadcastPublisher: Send + Sync {
    /// Publish one payload. Returns once the broker has accepted it.
    async fn send(&self, payload: Vec<u8>) -> Result<(), AppError>;
}

/// Consumer side of the queue.
#[async_trait]
pub trait BroadcastQueue: Send + Sync {
    /// Wait up to `timeout` for the next payload. `None` means nothing arrived.
    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, AppError>;

    /// Mark a delivery as handled so it is never redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<(), AppError>;

    /// Return payloads left unacknowledged by a previous consumer to the
    /// queue. Returns how many were moved.
    async fn recover(&self) -> Result<usize, AppError> {
        Ok(0)
    }
}

/// Work performed for each decoded broadcast.
#[async_trait]
pub trait BroadcastHandler: Send + Sync {
    async fn handle(&self, broadcast: RenderedBroadcast) -> Result<(), AppError>;
}

pub fn encode(broadcast: &RenderedBroadcast) -> Result<Vec<u8>, AppError> {
    Ok(serde_json::to_vec(broadcast)?)
}

pub fn decode(payload: &[u8]) -> Result<RenderedBroadcast, AppError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Redis list-backed queue.
#[derive(Clone)]
pub struct RedisBroadcastQueue {
    conn: ConnectionManager,
    /// Used for `LREM`/`LMOVE`, never for blocking reads.
    ack_conn: ConnectionManager,
    key: String,
    processing_key: String,
}

impl RedisBroadcastQueue {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        let key = key.into();
        let processing_key = format!("{}:processing", key);
        Self {
            ack_conn: conn.clone(),
            conn,
            key,
            processing_key,
        }
    }

    /// Route acknowledgements and recovery through `conn` instead of the
    /// connection used for blocking receives.
    pub fn with_ack_connection(mut self, conn: ConnectionManager) -> Self {
        self.ack_conn = conn;
        self
    }
}

#[async_trait]
impl BroadcastPublisher for RedisBroadcastQueue {
    async fn send(&self, payload: Vec<u8>) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BroadcastQueue for RedisBroadcastQueue {
    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, AppError> {
        let mut conn = self.conn.clone();
        // BLMOVE treats 0 as "block forever".
        let timeout_secs = timeout.as_secs_f64().max(0.01);
        let payload: Option<Vec<u8>> = redis::cmd("BLMOVE")
            .arg(&self.key)
            .arg(&self.processing_key)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(payload.map(|payload| Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), AppError> {
        let mut conn = self.ack_conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(delivery.payload.as_slice())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(&self) -> Result<usize, AppError> {
        let mut conn = self.ack_conn.clone();
        let mut moved = 0;
        loop {
            let item: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&self.processing_key)
                .arg(&self.key)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }
}

/// Pulls broadcasts off the queue and runs the handler for each one.
pub struct QueueConsumer {
    queue: Arc<dyn BroadcastQueue>,
    handler: Arc<dyn BroadcastHandler>,
    max_in_flight: usize,
    poll_timeout: Duration,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn BroadcastQueue>,
        handler: Arc<dyn BroadcastHandler>,
        max_in_flight: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            max_in_flight: max_in_flight.max(1),
            poll_timeout,
        }
    }

    /// Consume until `shutdown` fires, then wait for in-flight broadcasts.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        match self.queue.recover().await {
            Ok(0) => {}
            Ok(moved) => tracing::warn!(moved, "Requeued unacknowledged broadcasts"),
            Err(e) => tracing::error!(error = %e, "Failed to requeue unacknowledged broadcasts"),
        }

        let permits = u32::try_from(self.max_in_flight)
            .map_err(|_| AppError::Config("max_in_flight is too large".to_string()))?;
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));

        tracing::info!(
            max_in_flight = self.max_in_flight,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Queue consumer started"
        );

        while !shutdown.is_cancelled() {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|_| AppError::Internal("consumer semaphore closed".to_string()))?,
                _ = shutdown.cancelled() => break,
            };

            let delivery = match self.queue.receive(self.poll_timeout).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive from broadcast queue");
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = shutdown.cancelled() => {}
                    }
                    continue;
                }
            };

            let queue = self.queue.clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                process(queue.as_ref(), handler.as_ref(), delivery).await;
                drop(permit);
            });
        }

        tracing::info!("Queue consumer stopping, waiting for in-flight broadcasts");
        let _all = semaphore
            .acquire_many(permits)
            .await
            .map_err(|_| AppError::Internal("consumer semaphore closed".to_string()))?;
        tracing::info!("Queue consumer stopped");
        Ok(())
    }
}

async fn process(queue: &dyn BroadcastQueue, handler: &dyn BroadcastHandler, delivery: Delivery) {
    match decode(&delivery.payload) {
        Ok(broadcast) => {
            let city = broadcast.city.clone();
            if let Err(e) = handler.handle(broadcast).await {
                tracing::error!(city = %city, error = %e, "Broadcast handling failed");
            }
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                bytes = delivery.payload.len(),
                "Dropping malformed broadcast payload"
            );
        }
    }

    if let Err(e) = queue.ack(&delivery).await {
        tracing::error!(error = %e, "Failed to acknowledge broadcast");
    }
}
