//! Authentication types for the domain layer.
//!
//! An `AuthenticatedOperator` is the support staff member behind an admin
//! request. Any token provider can populate it via the `SessionValidator`
//! port; the domain only cares about the id and the role.

use super::OperatorId;
use thiserror::Error;

/// Operator extracted from a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedOperator {
    /// Stable operator identifier, recorded as the actor in audit entries.
    pub id: OperatorId,

    /// Role claim from the token.
    pub role: String,

    /// Display name if the token carried one.
    pub display_name: Option<String>,
}

impl AuthenticatedOperator {
    pub fn new(id: OperatorId, role: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id,
            role: role.into(),
            display_name,
        }
    }

    /// Returns true if this principal carries the given role.
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// Authentication errors that can occur during token validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The token is missing, malformed, or has an invalid signature.
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    /// Token is valid but the principal is not an operator.
    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Returns true if the caller should obtain a new token.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, AuthError::InvalidToken | AuthError::TokenExpired)
    }
}
