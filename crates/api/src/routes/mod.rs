pub mod health;
pub mod messages;
pub mod receivers;
pub mod templates;

use axum::Router;

use crate::middleware::rate_limit::rate_limit;
use crate::state::AppState;

/// Build the complete API router with all routes.
///
/// Every route sits behind the per-IP rate limiter, which reads the peer
/// address from `ConnectInfo<SocketAddr>`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(messages::router())
        .merge(templates::router())
        .merge(receivers::router())
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}
