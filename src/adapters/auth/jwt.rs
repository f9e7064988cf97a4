//! HS256 JWT adapter for operator tokens.
//!
//! Implements the `SessionValidator` port by checking a shared-secret
//! signature, expiry and (optionally) issuer, then requiring the `role`
//! claim to equal the configured operator role.
//!
//! # Claims
//!
//! | Claim | Required | Meaning |
//! |-------|----------|---------|
//! | `sub` | yes | operator id, recorded as the audit actor |
//! | `exp` | yes | expiry (Unix seconds) |
//! | `role` | yes | must equal the operator role |
//! | `iss` | when configured | must equal the configured issuer |
//! | `name` | no | display name |

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AuthError, AuthenticatedOperator, OperatorId, Timestamp};
use crate::ports::SessionValidator;

#[derive(Debug, Clone)]
pub struct JwtValidatorConfig {
    pub secret: SecretString,
    pub issuer: Option<String>,
    pub operator_role: String,
}

impl JwtValidatorConfig {
    pub fn new(secret: SecretString, operator_role: impl Into<String>) -> Self {
        Self {
            secret,
            issuer: None,
            operator_role: operator_role.into(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OperatorClaims {
    sub: String,

    exp: i64,

    #[serde(default)]
    role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

pub struct JwtOperatorValidator {
    config: JwtValidatorConfig,
}

impl JwtOperatorValidator {
    pub fn new(config: JwtValidatorConfig) -> Self {
        Self { config }
    }

    /// Signs a token for `operator`. Used by local tooling and tests.
    pub fn issue(
        &self,
        operator: &OperatorId,
        role: &str,
        name: Option<String>,
        expires_at: Timestamp,
    ) -> Result<String, AuthError> {
        let claims = OperatorClaims {
            sub: operator.as_str().to_string(),
            exp: expires_at.as_unix_secs(),
            role: Some(role.to_string()),
            iss: self.config.issuer.clone(),
            name,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.secret.expose_secret().as_bytes()),
        )
        .map_err(|e| AuthError::service_unavailable(format!("Failed to sign token: {}", e)))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

#[async_trait]
impl SessionValidator for JwtOperatorValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedOperator, AuthError> {
        let key = DecodingKey::from_secret(self.config.secret.expose_secret().as_bytes());

        let data = decode::<OperatorClaims>(token, &key, &self.validation()).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("Operator token expired");
                    AuthError::TokenExpired
                }
                ErrorKind::InvalidIssuer => {
                    tracing::warn!("Invalid issuer in operator token");
                    AuthError::InvalidToken
                }
                _ => {
                    tracing::warn!(error = %e, "Operator token validation failed");
                    AuthError::InvalidToken
                }
            }
        })?;
        let claims = data.claims;

        let operator_id = OperatorId::new(claims.sub).map_err(|_| {
            tracing::warn!("Operator token has an empty subject");
            AuthError::InvalidToken
        })?;

        let role = claims.role.unwrap_or_default();
        if role != self.config.operator_role {
            tracing::warn!(
                operator_id = %operator_id,
                role = %role,
                "Token does not carry the operator role"
            );
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(AuthenticatedOperator::new(operator_id, role, claims.name))
    }
}

impl std::fmt::Debug for JwtOperatorValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtOperatorValidator")
            .field("issuer", &self.config.issuer)
            .field("operator_role", &self.config.operator_role)
            .finish_non_exhaustive()
    }
}
