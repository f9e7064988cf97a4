//! Authentication middleware and extractors for axum.
//!
//! This module provides:
//! - `auth_middleware` - Layer that validates Bearer tokens and injects the operator into extensions
//! - `RequireOperator` - Extractor that requires an authenticated operator
//!
//! # Architecture
//!
//! The middleware uses the `SessionValidator` port, so the JWT validator and
//! the test mock plug in the same way.
//!
//! ```text
//! Request → auth_middleware → injects AuthenticatedOperator into extensions
//!                                      ↓
//!                              Handler → RequireOperator reads from extensions
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::domain::foundation::{AuthError, AuthenticatedOperator};
use crate::ports::SessionValidator;

/// Auth middleware state - wraps the session validator.
pub type AuthState = Arc<dyn SessionValidator>;

/// Authentication middleware that validates Bearer tokens.
///
/// A missing token passes through untouched; `RequireOperator` turns that
/// into a 401. A token that fails validation is rejected here.
pub async fn auth_middleware(
    State(validator): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return next.run(request).await;
    };

    match validator.validate(token).await {
        Ok(operator) => {
            request.extensions_mut().insert(operator);
            next.run(request).await
        }
        Err(e) => auth_error_response(&e),
    }
}

fn auth_error_response(error: &AuthError) -> Response {
    let (status, message, code) = match error {
        AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired", "AUTH_ERROR"),
        AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token", "AUTH_ERROR"),
        AuthError::InsufficientPermissions => {
            (StatusCode::FORBIDDEN, "Operator role required", "FORBIDDEN")
        }
        AuthError::ServiceUnavailable(msg) => {
            tracing::error!("Auth service unavailable: {}", msg);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Authentication service unavailable",
                "AUTH_ERROR",
            )
        }
    };

    (
        status,
        Json(serde_json::json!({
            "error": message,
            "code": code
        })),
    )
        .into_response()
}

/// Extractor that requires an authenticated operator.
#[derive(Debug, Clone)]
pub struct RequireOperator(pub AuthenticatedOperator);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for RequireOperator
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedOperator>()
            .cloned()
            .map(RequireOperator)
            .ok_or(AuthRejection::Unauthenticated)
    }
}

/// Rejection type for authentication failures.
#[derive(Debug, Clone)]
pub enum AuthRejection {
    /// No valid authentication token was provided.
    Unauthenticated,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthRejection::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "Authentication required")
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": message,
                "code": "UNAUTHENTICATED"
            })),
        )
            .into_response()
    }
}
