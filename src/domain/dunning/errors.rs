//! Dunning-specific error types.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | NotFound | 404 |
//! | AlreadyTerminal | 409 |
//! | InvalidTransition | 409 |
//! | Conflict | 409 |
//! | ValidationFailed | 400 |
//! | TerminalActionFailed | 502 |
//! | Infrastructure | 500 |

use crate::domain::foundation::{DomainError, DunningRecordId, ErrorCode, ValidationError};

use super::DunningStage;

/// Errors returned by dunning engine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DunningError {
    /// No dunning record with this id.
    NotFound(DunningRecordId),

    /// The record was canceled or resolved and can no longer change.
    AlreadyTerminal(DunningRecordId),

    /// The stage machine refused the transition.
    InvalidTransition {
        from: DunningStage,
        to: DunningStage,
    },

    /// Version-checked writes kept losing to concurrent writers.
    Conflict(DunningRecordId),

    /// Cancellation or downgrade failed; the record keeps its previous stage.
    TerminalActionFailed {
        record_id: DunningRecordId,
        action: String,
        reason: String,
    },

    ValidationFailed {
        field: String,
        message: String,
    },

    /// Store or collaborator unavailable.
    Infrastructure(String),
}

impl DunningError {
    pub fn not_found(id: DunningRecordId) -> Self {
        DunningError::NotFound(id)
    }

    pub fn already_terminal(id: DunningRecordId) -> Self {
        DunningError::AlreadyTerminal(id)
    }

    pub fn conflict(id: DunningRecordId) -> Self {
        DunningError::Conflict(id)
    }

    pub fn terminal_action_failed(
        record_id: DunningRecordId,
        action: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DunningError::TerminalActionFailed {
            record_id,
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DunningError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        DunningError::Infrastructure(message.into())
    }

    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DunningError::NotFound(_) => ErrorCode::RecordNotFound,
            DunningError::AlreadyTerminal(_) => ErrorCode::RecordTerminal,
            DunningError::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            DunningError::Conflict(_) => ErrorCode::VersionConflict,
            DunningError::TerminalActionFailed { .. } => ErrorCode::CollaboratorError,
            DunningError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            DunningError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }

    /// Returns a user-friendly error message.
    pub fn message(&self) -> String {
        match self {
            DunningError::NotFound(id) => format!("Dunning record not found: {}", id),
            DunningError::AlreadyTerminal(id) => {
                format!("Dunning record {} is already closed", id)
            }
            DunningError::InvalidTransition { from, to } => {
                format!("Cannot move dunning record from {} to {}", from, to)
            }
            DunningError::Conflict(id) => {
                format!("Dunning record {} was modified concurrently", id)
            }
            DunningError::TerminalActionFailed {
                record_id,
                action,
                reason,
            } => format!(
                "Terminal action '{}' failed for record {}: {}",
                action, record_id, reason
            ),
            DunningError::ValidationFailed { field, message } => {
                format!("Validation failed for '{}': {}", field, message)
            }
            DunningError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }

    /// Returns true if the same call may succeed later without any change
    /// in input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DunningError::Infrastructure(_)
                | DunningError::Conflict(_)
                | DunningError::TerminalActionFailed { .. }
        )
    }
}

impl std::fmt::Display for DunningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for DunningError {}

impl From<DomainError> for DunningError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ValidationFailed => DunningError::ValidationFailed {
                field: err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                message: err.message,
            },
            _ => DunningError::Infrastructure(err.to_string()),
        }
    }
}

impl From<ValidationError> for DunningError {
    fn from(err: ValidationError) -> Self {
        let field = match &err {
            ValidationError::EmptyField { field }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. } => field.clone(),
        };
        DunningError::ValidationFailed {
            field,
            message: err.to_string(),
        }
    }
}

impl From<DunningError> for DomainError {
    fn from(err: DunningError) -> Self {
        DomainError::new(err.code(), err.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        let id = DunningRecordId::new();
        assert_eq!(DunningError::not_found(id).code(), ErrorCode::RecordNotFound);
        assert_eq!(DunningError::already_terminal(id).code(), ErrorCode::RecordTerminal);
        assert_eq!(DunningError::conflict(id).code(), ErrorCode::VersionConflict);
        assert_eq!(
            DunningError::infrastructure("db down").code(),
            ErrorCode::DatabaseError
        );
    }

    #[test]
    fn transient_failures_are_retryable() {
        let id = DunningRecordId::new();
        assert!(DunningError::infrastructure("timeout").is_retryable());
        assert!(DunningError::conflict(id).is_retryable());
        assert!(DunningError::terminal_action_failed(id, "cancel", "503").is_retryable());
        assert!(!DunningError::not_found(id).is_retryable());
        assert!(!DunningError::already_terminal(id).is_retryable());
        assert!(!DunningError::validation("amount", "negative").is_retryable());
    }

    #[test]
    fn domain_database_errors_become_infrastructure() {
        let err: DunningError = DomainError::database("connection reset").into();
        assert!(matches!(err, DunningError::Infrastructure(_)));
    }

    #[test]
    fn domain_validation_errors_keep_their_field() {
        let err: DunningError = DomainError::validation("currency", "bad").into();
        assert_eq!(
            err,
            DunningError::ValidationFailed {
                field: "currency".to_string(),
                message: "bad".to_string()
            }
        );
    }

    #[test]
    fn value_object_errors_keep_their_field() {
        let err: DunningError = ValidationError::empty_field("user_id").into();
        assert!(matches!(err, DunningError::ValidationFailed { ref field, .. } if field == "user_id"));
    }

    #[test]
    fn message_names_both_stages_for_bad_transition() {
        let err = DunningError::InvalidTransition {
            from: DunningStage::FinalWarning,
            to: DunningStage::FirstReminder,
        };
        assert_eq!(
            err.to_string(),
            "Cannot move dunning record from final_warning to first_reminder"
        );
    }
}
