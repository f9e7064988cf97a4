//! HTTP handlers for dunning endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Json, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::adapters::http::middleware::RequireOperator;
use crate::application::handlers::dunning::{
    CancelAccountCommand, CancelAccountHandler, GetAccountHandler, GetAccountQuery,
    GetDunningStatsHandler, GetDunningStatsQuery, HandleGatewayWebhookCommand,
    HandleGatewayWebhookHandler, ListAccountsHandler, ListAccountsQuery, RetryAccountCommand,
    RetryAccountHandler,
};
use crate::application::DunningEngine;
use crate::domain::dunning::{DunningError, DunningStage};
use crate::domain::foundation::DunningRecordId;
use crate::domain::gateway::WebhookError;
use crate::ports::{AuditLog, DunningRecordStore, UserDirectory};

use super::dto::{
    AccountDetailResponse, AccountListResponse, AdvanceResponse, CancelAccountRequest,
    ErrorResponse, ListAccountsParams, StatsResponse, WebhookAckResponse,
};

/// Header carrying `t=<unix>,v1=<hex>`.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the dunning routes.
#[derive(Clone)]
pub struct DunningAppState {
    pub engine: Arc<DunningEngine>,
    pub records: Arc<dyn DunningRecordStore>,
    pub audit: Arc<dyn AuditLog>,
    pub users: Arc<dyn UserDirectory>,
    pub webhook_handler: Arc<HandleGatewayWebhookHandler>,
}

impl DunningAppState {
    pub fn list_accounts_handler(&self) -> ListAccountsHandler {
        ListAccountsHandler::new(self.records.clone(), self.users.clone())
    }

    pub fn get_account_handler(&self) -> GetAccountHandler {
        GetAccountHandler::new(self.records.clone(), self.audit.clone(), self.users.clone())
    }

    pub fn retry_account_handler(&self) -> RetryAccountHandler {
        RetryAccountHandler::new(self.engine.clone())
    }

    pub fn cancel_account_handler(&self) -> CancelAccountHandler {
        CancelAccountHandler::new(self.engine.clone())
    }

    pub fn stats_handler(&self) -> GetDunningStatsHandler {
        GetDunningStatsHandler::new(self.records.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook Ingress
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/gateway - Handle a payment gateway event
pub async fn handle_gateway_webhook(
    State(state): State<DunningAppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::InvalidSignature)?;

    let cmd = HandleGatewayWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    let result = state.webhook_handler.handle(cmd).await?;
    Ok(Json(WebhookAckResponse::from(result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Admin Queries
// ════════════════════════════════════════════════════════════════════════════════

/// GET /dunning/accounts - List accounts in recovery
pub async fn list_accounts(
    State(state): State<DunningAppState>,
    RequireOperator(_operator): RequireOperator,
    Query(params): Query<ListAccountsParams>,
) -> Result<impl IntoResponse, DunningApiError> {
    let stage = params
        .stage
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(DunningStage::from_str)
        .transpose()
        .map_err(|e| DunningError::validation("stage", e))?;

    let query = ListAccountsQuery {
        stage,
        page: params.page,
        per_page: params.per_page,
    };

    let result = state.list_accounts_handler().handle(query).await?;
    Ok(Json(AccountListResponse::from(result)))
}

/// GET /dunning/accounts/:id - Record, user fields and audit trail
pub async fn get_account(
    State(state): State<DunningAppState>,
    RequireOperator(_operator): RequireOperator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DunningApiError> {
    let query = GetAccountQuery {
        record_id: parse_record_id(&id)?,
    };

    let result = state.get_account_handler().handle(query).await?;
    Ok(Json(AccountDetailResponse::from(result)))
}

/// GET /dunning/stats - Counts per stage and resolution
pub async fn get_stats(
    State(state): State<DunningAppState>,
    RequireOperator(_operator): RequireOperator,
) -> Result<impl IntoResponse, DunningApiError> {
    let result = state.stats_handler().handle(GetDunningStatsQuery).await?;
    Ok(Json(StatsResponse::from(result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Admin Commands
// ════════════════════════════════════════════════════════════════════════════════

/// POST /dunning/accounts/:id/retry - Advance one stage now, ignoring the due date
pub async fn retry_account(
    State(state): State<DunningAppState>,
    RequireOperator(operator): RequireOperator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DunningApiError> {
    let cmd = RetryAccountCommand {
        record_id: parse_record_id(&id)?,
        operator: operator.id,
    };

    let result = state.retry_account_handler().handle(cmd).await?;
    Ok(Json(AdvanceResponse::from(result)))
}

/// POST /dunning/accounts/:id/cancel - Force cancellation
pub async fn cancel_account(
    State(state): State<DunningAppState>,
    RequireOperator(operator): RequireOperator,
    Path(id): Path<String>,
    Json(request): Json<CancelAccountRequest>,
) -> Result<impl IntoResponse, DunningApiError> {
    let cmd = CancelAccountCommand {
        record_id: parse_record_id(&id)?,
        operator: operator.id,
        reason: request.reason,
    };

    let result = state.cancel_account_handler().handle(cmd).await?;
    Ok(Json(AdvanceResponse::from(result)))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn parse_record_id(raw: &str) -> Result<DunningRecordId, DunningError> {
    DunningRecordId::from_str(raw).map_err(|_| DunningError::validation("id", "Invalid record id"))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts dunning errors to HTTP responses.
#[derive(Debug)]
pub struct DunningApiError(DunningError);

impl From<DunningError> for DunningApiError {
    fn from(err: DunningError) -> Self {
        Self(err)
    }
}

impl IntoResponse for DunningApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DunningError::NotFound(_) => StatusCode::NOT_FOUND,
            DunningError::AlreadyTerminal(_)
            | DunningError::InvalidTransition { .. }
            | DunningError::Conflict(_) => StatusCode::CONFLICT,
            DunningError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            DunningError::TerminalActionFailed { .. } => StatusCode::BAD_GATEWAY,
            DunningError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Dunning request failed");
        }

        let body = ErrorResponse::new(self.0.code().to_string(), self.0.message());
        (status, Json(body)).into_response()
    }
}

/// API error type for webhook ingress.
#[derive(Debug)]
pub struct WebhookApiError(WebhookError);

impl From<WebhookError> for WebhookApiError {
    fn from(err: WebhookError) -> Self {
        Self(err)
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if self.0.is_retryable() {
            tracing::error!(error = %self.0, "Webhook processing failed; gateway will retry");
        } else {
            tracing::warn!(error = %self.0, status = status.as_u16(), "Webhook rejected");
        }

        let code = match &self.0 {
            WebhookError::InvalidSignature
            | WebhookError::MalformedSignature(_)
            | WebhookError::TimestampOutOfRange
            | WebhookError::InvalidTimestamp => "INVALID_WEBHOOK_SIGNATURE",
            WebhookError::ParseError(_) | WebhookError::MissingField(_) => "INVALID_PAYLOAD",
            WebhookError::Ignored(_) => "IGNORED",
            WebhookError::Database(_) => "INTERNAL_ERROR",
        };
        (status, Json(ErrorResponse::new(code, self.0.to_string()))).into_response()
    }
}
