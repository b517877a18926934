use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use siren_common::config::AppConfig;
use siren_common::{db, redis_pool};
use siren_engine::fanout::FanoutEngine;
use siren_engine::ledger::PgMessageLedger;
use siren_engine::queue::{QueueConsumer, RedisBroadcastQueue};
use siren_engine::receivers::PgReceiverDirectory;
use siren_engine::reconciler::ReconciliationWorker;
use siren_notifier::ProviderRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "siren_worker=info,siren_engine=info,siren_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Siren worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    // BLMOVE blocks its connection, so acks travel on a second one.
    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let ack_redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let queue = Arc::new(
        RedisBroadcastQueue::new(redis, config.broadcast_queue_key.clone())
            .with_ack_connection(ack_redis),
    );

    let registry = Arc::new(ProviderRegistry::from_config(&config, reqwest::Client::new()));
    let ledger = Arc::new(PgMessageLedger::new(pool.clone()));

    let fanout = FanoutEngine::new(
        Arc::new(PgReceiverDirectory::new(pool)),
        ledger.clone(),
        registry.clone(),
        config.fanout_workers,
    );
    let consumer = QueueConsumer::new(
        queue,
        Arc::new(fanout),
        config.consumer_max_in_flight,
        Duration::from_secs(config.consumer_poll_timeout_secs),
    );
    let reconciler = Arc::new(ReconciliationWorker::new(
        ledger,
        registry,
        Duration::from_secs(config.reconcile_interval_secs),
        Duration::from_secs(config.reconcile_grace_secs),
    ));

    let shutdown = CancellationToken::new();
    let reconcile_task = tokio::spawn(reconciler.run(shutdown.clone()));
    let consume_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    tracing::info!(
        queue = %config.broadcast_queue_key,
        fanout_workers = config.fanout_workers,
        "Siren worker running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");
    shutdown.cancel();

    match consume_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Queue consumer exited with error"),
        Err(e) => tracing::error!(error = %e, "Queue consumer task panicked"),
    }
    if let Err(e) = reconcile_task.await {
        tracing::error!(error = %e, "Reconciliation task panicked");
    }

    tracing::info!("Siren worker stopped.");
    Ok(())
}
