//! Axum router configuration for dunning endpoints.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::adapters::http::middleware::{auth_middleware, AuthState};

use super::handlers::{
    cancel_account, get_account, get_stats, handle_gateway_webhook, list_accounts,
    retry_account, DunningAppState,
};

/// Operator-only admin routes.
///
/// # Routes
/// - `GET /accounts` - List accounts (`?stage=&page=&per_page=`)
/// - `GET /accounts/:id` - Record detail with audit trail
/// - `POST /accounts/:id/retry` - Advance one stage now, ignoring the due date
/// - `POST /accounts/:id/cancel` - Force cancellation (`{"reason": ...}`)
/// - `GET /stats` - Counts per stage and resolution
pub fn admin_routes() -> Router<DunningAppState> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/retry", post(retry_account))
        .route("/accounts/:id/cancel", post(cancel_account))
        .route("/stats", get(get_stats))
}

/// Gateway webhook routes. No bearer auth; deliveries are signed.
///
/// # Routes
/// - `POST /gateway` - Payment failed / recovered events
pub fn webhook_routes() -> Router<DunningAppState> {
    Router::new().route("/gateway", post(handle_gateway_webhook))
}

/// Mounts `/dunning` (behind operator auth) and `/webhooks`.
pub fn dunning_router(auth: AuthState) -> Router<DunningAppState> {
    Router::new()
        .nest(
            "/dunning",
            admin_routes().layer(middleware::from_fn_with_state(auth, auth_middleware)),
        )
        .nest("/webhooks", webhook_routes())
}
