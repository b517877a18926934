//! Shared application state for the Axum API server.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use siren_common::config::AppConfig;
use siren_engine::dispatch::DispatchService;
use siren_engine::queue::{BroadcastPublisher, RedisBroadcastQueue};
use siren_engine::receivers::{PgReceiverDirectory, ReceiverDirectory, ReceiverService};
use siren_engine::templates::{PgTemplateStore, TemplateService, TemplateStore};

use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchService,
    pub templates: TemplateService,
    pub receivers: ReceiverService,
    pub limiter: Arc<RateLimiter>,
    pub config: AppConfig,
}

impl AppState {
    /// Production wiring: PostgreSQL stores and the Redis broadcast queue.
    pub fn new(pool: PgPool, redis: ConnectionManager, config: AppConfig) -> Self {
        let queue = RedisBroadcastQueue::new(redis, config.broadcast_queue_key.clone());
        Self::from_parts(
            Arc::new(PgTemplateStore::new(pool.clone())),
            Arc::new(PgReceiverDirectory::new(pool)),
            Arc::new(queue),
            config,
        )
    }

    pub fn from_parts(
        templates: Arc<dyn TemplateStore>,
        directory: Arc<dyn ReceiverDirectory>,
        publisher: Arc<dyn BroadcastPublisher>,
        config: AppConfig,
    ) -> Self {
        Self {
            dispatch: DispatchService::new(templates.clone(), publisher),
            templates: TemplateService::new(templates),
            receivers: ReceiverService::new(directory),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::from(&config))),
            config,
        }
    }
}
