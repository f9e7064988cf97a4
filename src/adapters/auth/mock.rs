//! Mock session validator for testing.
//!
//! Maps fixed tokens to operators so HTTP tests don't need to sign JWTs.
//!
//! # Example
//!
//! ```ignore
//! use dunning::adapters::auth::MockSessionValidator;
//!
//! let validator = MockSessionValidator::new()
//!     .with_test_operator("op-token", "op_1")
//!     .with_member("member-token", "user_1");
//! ```

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedOperator, OperatorId};
use crate::ports::SessionValidator;

/// Role given to principals registered through `with_test_operator`.
pub const TEST_OPERATOR_ROLE: &str = "operator";

/// Stores a map of tokens to principals. Unknown tokens return `InvalidToken`;
/// principals without the operator role return `InsufficientPermissions`.
#[derive(Debug, Default)]
pub struct MockSessionValidator {
    tokens: RwLock<HashMap<String, AuthenticatedOperator>>,
    force_error: RwLock<Option<AuthError>>,
}

impl MockSessionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operator(self, token: impl Into<String>, operator: AuthenticatedOperator) -> Self {
        self.add_token(token, operator);
        self
    }

    /// Adds a token for an operator with the given id.
    pub fn with_test_operator(self, token: impl Into<String>, operator_id: &str) -> Self {
        match OperatorId::new(operator_id) {
            Ok(id) => self.with_operator(
                token,
                AuthenticatedOperator::new(id, TEST_OPERATOR_ROLE, Some(format!("Operator {}", operator_id))),
            ),
            Err(_) => self,
        }
    }

    /// Adds a token whose principal is authenticated but not an operator.
    pub fn with_member(self, token: impl Into<String>, principal_id: &str) -> Self {
        match OperatorId::new(principal_id) {
            Ok(id) => self.with_operator(token, AuthenticatedOperator::new(id, "member", None)),
            Err(_) => self,
        }
    }

    /// Forces all validations to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *write(&self.force_error) = Some(error);
        self
    }

    pub fn add_token(&self, token: impl Into<String>, operator: AuthenticatedOperator) {
        write(&self.tokens).insert(token.into(), operator);
    }

    pub fn token_count(&self) -> usize {
        read(&self.tokens).len()
    }
}

#[async_trait]
impl SessionValidator for MockSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedOperator, AuthError> {
        if let Some(error) = read(&self.force_error).clone() {
            return Err(error);
        }

        let operator = read(&self.tokens)
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)?;

        if !operator.has_role(TEST_OPERATOR_ROLE) {
            return Err(AuthError::InsufficientPermissions);
        }
        Ok(operator)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
