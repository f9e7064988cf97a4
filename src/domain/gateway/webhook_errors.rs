//! Webhook error types for payment-gateway ingress.
//!
//! The gateway treats any non-2xx response as "retry later", so the status
//! code of each error decides whether an event is redelivered.

use http::StatusCode;
use thiserror::Error;

use crate::domain::dunning::DunningError;

/// Errors that occur during webhook processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature timestamp is older than the tolerance window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Signature timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Signature header present but not in `t=..,v1=..` form.
    #[error("Malformed signature header: {0}")]
    MalformedSignature(String),

    /// Failed to parse the webhook payload.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing for this event type.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Event was intentionally ignored (not an error condition).
    #[error("Event ignored: {0}")]
    Ignored(String),

    /// Store or collaborator failure; the gateway should redeliver.
    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// Returns true if the gateway should redeliver this event.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Database(_))
    }

    /// Maps the error to an HTTP status code.
    ///
    /// - 2xx: event acknowledged, no retry
    /// - 4xx: rejected input, no retry
    /// - 5xx: transient failure, gateway retries
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature
            | WebhookError::MalformedSignature(_)
            | WebhookError::TimestampOutOfRange
            | WebhookError::InvalidTimestamp => StatusCode::UNAUTHORIZED,

            WebhookError::ParseError(_) | WebhookError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            WebhookError::Ignored(_) => StatusCode::OK,

            WebhookError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DunningError> for WebhookError {
    fn from(err: DunningError) -> Self {
        match err {
            DunningError::ValidationFailed { .. } => WebhookError::ParseError(err.message()),
            DunningError::Infrastructure(_)
            | DunningError::Conflict(_)
            | DunningError::TerminalActionFailed { .. } => WebhookError::Database(err.message()),
            DunningError::NotFound(_)
            | DunningError::AlreadyTerminal(_)
            | DunningError::InvalidTransition { .. } => WebhookError::Ignored(err.message()),
        }
    }
}
