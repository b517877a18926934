//! Per-IP rate limiting.
//!
//! Every client IP gets its own token bucket. Buckets idle longer than the
//! configured window are evicted lazily on the next request, and the map is
//! capped: when full, the least recently seen visitor makes room.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Bucket};
use tokio::sync::Mutex;

use siren_common::config::AppConfig;

use crate::state::AppState;

type VisitorBucket = Bucket<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

struct Visitor {
    bucket: Arc<VisitorBucket>,
    last_seen: Instant,
}

/// Rate limiter settings.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub burst: u32,
    pub idle: Duration,
    pub max_visitors: usize,
}

impl From<&AppConfig> for RateLimitConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            per_second: config.rate_limit_per_second,
            burst: config.rate_limit_burst,
            idle: Duration::from_secs(config.rate_limit_idle_secs),
            max_visitors: config.rate_limit_max_visitors,
        }
    }
}

pub struct RateLimiter {
    quota: Quota,
    idle: Duration,
    max_visitors: usize,
    visitors: Mutex<HashMap<IpAddr, Visitor>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let rate = NonZeroU32::new(config.per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst.max(1)).unwrap_or(NonZeroU32::MIN);

        Self {
            quota: Quota::per_second(rate).allow_burst(burst),
            idle: config.idle,
            max_visitors: config.max_visitors.max(1),
            visitors: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token from `ip`'s bucket. Returns `false` when the request
    /// should be rejected.
    pub async fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let bucket = {
            let mut visitors = self.visitors.lock().await;
            visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) <= self.idle);

            if !visitors.contains_key(&ip) && visitors.len() >= self.max_visitors {
                let oldest = visitors
                    .iter()
                    .min_by_key(|(_, v)| v.last_seen)
                    .map(|(ip, _)| *ip);
                if let Some(oldest) = oldest {
                    visitors.remove(&oldest);
                }
            }

            let visitor = visitors.entry(ip).or_insert_with(|| Visitor {
                bucket: Arc::new(Bucket::direct(self.quota)),
                last_seen: now,
            });
            visitor.last_seen = now;
            visitor.bucket.clone()
        };

        bucket.check().is_ok()
    }

    pub async fn visitors(&self) -> usize {
        self.visitors.lock().await.len()
    }
}

/// Axum middleware rejecting clients over their quota with 429.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.limiter.check(addr.ip()).await {
        return next.run(req).await;
    }

    tracing::warn!(ip = %addr.ip(), path = %req.uri().path(), "Rate limit exceeded");
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({ "error": "Too many requests" })),
    )
        .into_response()
}
