//! Session validation port for operator bearer tokens.
//!
//! # Contract
//!
//! Implementations must:
//! - Validate the token signature and expiry
//! - Return `AuthError::InvalidToken` for malformed or badly signed tokens
//! - Return `AuthError::TokenExpired` for expired tokens
//! - Return `AuthError::InsufficientPermissions` when the principal is not an operator

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedOperator};

#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validates a raw token (without the "Bearer " prefix).
    async fn validate(&self, token: &str) -> Result<AuthenticatedOperator, AuthError>;
}
