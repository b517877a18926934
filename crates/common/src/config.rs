use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (broadcast queue broker)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// HTTP listen address for the API server (default: 0.0.0.0:3000)
    pub listen_addr: String,

    /// Redis list carrying rendered broadcasts
    pub broadcast_queue_key: String,

    /// Fan-out worker pool size (default: number of CPU cores)
    pub fanout_workers: usize,

    /// Broadcasts the consumer processes concurrently (default: 4)
    pub consumer_max_in_flight: usize,

    /// Blocking read timeout for the queue consumer in seconds (default: 1)
    pub consumer_poll_timeout_secs: u64,

    /// Reconciliation sweep interval in seconds (default: 30)
    pub reconcile_interval_secs: u64,

    /// Minimum age of a Created record before reconciliation touches it (default: 60)
    pub reconcile_grace_secs: u64,

    /// Per-IP sustained request rate (default: 1/s)
    pub rate_limit_per_second: u32,

    /// Per-IP burst size (default: 3)
    pub rate_limit_burst: u32,

    /// Idle time after which a visitor is evicted from the limiter (default: 180)
    pub rate_limit_idle_secs: u64,

    /// Upper bound on tracked visitors (default: 10000)
    pub rate_limit_max_visitors: usize,

    /// Mailgun API key for email delivery
    pub mailgun_api_key: Option<String>,

    /// Mailgun sending domain
    pub mailgun_domain: Option<String>,

    /// Email sender address
    pub mailgun_from: Option<String>,

    /// Mailgun API base URL override
    pub mailgun_base_url: Option<String>,

    /// Twilio account SID for SMS delivery
    pub twilio_account_sid: Option<String>,

    /// Twilio auth token
    pub twilio_auth_token: Option<String>,

    /// Phone number SMS messages are sent from
    pub twilio_from_number: Option<String>,

    /// Twilio API base URL override
    pub twilio_base_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            broadcast_queue_key: std::env::var("BROADCAST_QUEUE_KEY")
                .unwrap_or_else(|_| "siren:broadcasts".to_string()),
            fanout_workers: parse_var("FANOUT_WORKERS", num_cpus::get())?.max(1),
            consumer_max_in_flight: parse_var("CONSUMER_MAX_IN_FLIGHT", 4)?.max(1),
            consumer_poll_timeout_secs: parse_var("CONSUMER_POLL_TIMEOUT_SECS", 1)?,
            reconcile_interval_secs: parse_var("RECONCILE_INTERVAL_SECS", 30)?.max(1),
            reconcile_grace_secs: parse_var("RECONCILE_GRACE_SECS", 60)?,
            rate_limit_per_second: parse_var("RATE_LIMIT_PER_SECOND", 1)?,
            rate_limit_burst: parse_var("RATE_LIMIT_BURST", 3)?,
            rate_limit_idle_secs: parse_var("RATE_LIMIT_IDLE_SECS", 180)?,
            rate_limit_max_visitors: parse_var("RATE_LIMIT_MAX_VISITORS", 10_000)?,
            mailgun_api_key: std::env::var("MAILGUN_API_KEY").ok(),
            mailgun_domain: std::env::var("MAILGUN_DOMAIN").ok(),
            mailgun_from: std::env::var("MAILGUN_FROM").ok(),
            mailgun_base_url: std::env::var("MAILGUN_BASE_URL").ok(),
            twilio_account_sid: std::env::var("TWILIO_ACCOUNT_SID").ok(),
            twilio_auth_token: std::env::var("TWILIO_AUTH_TOKEN").ok(),
            twilio_from_number: std::env::var("TWILIO_FROM_NUMBER").ok(),
            twilio_base_url: std::env::var("TWILIO_BASE_URL").ok(),
        })
    }

    /// Configuration suitable for tests and local tooling: no credentials,
    /// small pools, default intervals.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://unused".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            db_max_connections: 5,
            listen_addr: "127.0.0.1:0".to_string(),
            broadcast_queue_key: "siren:test:broadcasts".to_string(),
            fanout_workers: 4,
            consumer_max_in_flight: 2,
            consumer_poll_timeout_secs: 1,
            reconcile_interval_secs: 30,
            reconcile_grace_secs: 60,
            rate_limit_per_second: 1,
            rate_limit_burst: 3,
            rate_limit_idle_secs: 180,
            rate_limit_max_visitors: 10_000,
            mailgun_api_key: None,
            mailgun_domain: None,
            mailgun_from: None,
            mailgun_base_url: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_from_number: None,
            twilio_base_url: None,
        }
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> anyhow::Result<T> {
    raw.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "{} must be a valid {}",
            name,
            std::any::type_name::<T>()
        )
    })
}
