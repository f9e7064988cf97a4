//! HTTP adapters - REST API implementations.

pub mod dunning;
pub mod middleware;

pub use dunning::{dunning_router, DunningAppState};

use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use middleware::AuthState;

/// Full application router: dunning routes, `/health`, tracing and request timeout.
pub fn app_router(state: DunningAppState, auth: AuthState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(dunning::handlers::health))
        .merge(dunning_router(auth))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}
