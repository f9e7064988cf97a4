//! HTTP middleware for axum.
//!
//! This module contains middleware layers for cross-cutting concerns:
//!
//! - `auth` - Operator authentication middleware and extractor

pub mod auth;

pub use auth::{auth_middleware, AuthRejection, AuthState, RequireOperator};
