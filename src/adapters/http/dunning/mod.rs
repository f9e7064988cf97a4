//! HTTP adapter for dunning endpoints.
//!
//! - `POST /webhooks/gateway` - Signed gateway events
//! - `GET /dunning/accounts` - Accounts in recovery
//! - `GET /dunning/accounts/:id` - One account with its audit trail
//! - `POST /dunning/accounts/:id/retry` - Manual advance
//! - `POST /dunning/accounts/:id/cancel` - Forced cancellation
//! - `GET /dunning/stats` - Dashboard counts

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{DunningAppState, DunningApiError, WebhookApiError, SIGNATURE_HEADER};
pub use routes::{admin_routes, dunning_router, webhook_routes};
