//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `auth` - Operator token validation (JWT, mock)
//! - `clock` - System and manual clocks
//! - `email` - Stage notifications (Resend, log-only)
//! - `http` - Axum routes for webhooks and the admin API
//! - `memory` - In-memory stores for tests and development
//! - `postgres` - PostgreSQL stores

pub mod auth;
pub mod clock;
pub mod email;
pub mod http;
pub mod memory;
pub mod postgres;

pub use clock::{ManualClock, SystemClock};
