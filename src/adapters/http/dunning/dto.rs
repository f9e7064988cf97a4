//! Data Transfer Objects for dunning HTTP endpoints.
//!
//! These types define the JSON request/response format for the webhook
//! ingress and the admin API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::application::handlers::dunning::{
    AccountDetail, AccountSummary, HandleGatewayWebhookResult, ListAccountsResult,
};
use crate::application::AdvanceOutcome;
use crate::domain::dunning::{AuditEntry, DunningRecord, DunningStage};
use crate::ports::DunningStats;

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Query string for `GET /dunning/accounts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListAccountsParams {
    pub stage: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Body for `POST /dunning/accounts/:id/cancel`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelAccountRequest {
    pub reason: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// A dunning record as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct DunningRecordResponse {
    pub id: String,
    pub subscription_id: String,
    pub user_id: String,
    pub stage: DunningStage,
    pub amount_cents: i64,
    pub currency: String,
    pub gateway_invoice_ref: String,
    pub reminder_count: u32,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_gateway_retry_at: Option<String>,
}

impl From<&DunningRecord> for DunningRecordResponse {
    fn from(record: &DunningRecord) -> Self {
        Self {
            id: record.id.to_string(),
            subscription_id: record.subscription_id.to_string(),
            user_id: record.user_id.to_string(),
            stage: record.stage,
            amount_cents: record.amount_due.amount_cents(),
            currency: record.amount_due.currency().to_string(),
            gateway_invoice_ref: record.gateway_invoice_ref.clone(),
            reminder_count: record.reminder_count,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
            next_action_at: record.next_action_at.map(|t| t.to_rfc3339()),
            archived_at: record.archived_at.map(|t| t.to_rfc3339()),
            resolution: record.resolution.as_ref().map(|r| r.as_str().to_string()),
            attempt_count: record.metadata.attempt_count,
            next_gateway_retry_at: record.metadata.next_gateway_retry_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// One row of the admin account list.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummaryResponse {
    #[serde(flatten)]
    pub record: DunningRecordResponse,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl From<AccountSummary> for AccountSummaryResponse {
    fn from(summary: AccountSummary) -> Self {
        Self {
            record: DunningRecordResponse::from(&summary.record),
            display_name: summary.display_name,
            email: summary.email,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountListResponse {
    pub items: Vec<AccountSummaryResponse>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl From<ListAccountsResult> for AccountListResponse {
    fn from(result: ListAccountsResult) -> Self {
        Self {
            items: result.accounts.into_iter().map(Into::into).collect(),
            total: result.total,
            page: result.page,
            per_page: result.per_page,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntryResponse {
    pub id: String,
    pub action: String,
    pub actor: String,
    pub timestamp: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl From<&AuditEntry> for AuditEntryResponse {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            action: entry.action.as_str().to_string(),
            actor: entry.actor.to_storage(),
            timestamp: entry.timestamp.to_rfc3339(),
            details: entry.details.clone(),
            event_id: entry.event_id.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Record, user fields and full audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetailResponse {
    pub record: DunningRecordResponse,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub audit_trail: Vec<AuditEntryResponse>,
}

impl From<AccountDetail> for AccountDetailResponse {
    fn from(detail: AccountDetail) -> Self {
        let (display_name, email, role) = match detail.user {
            Some(user) => (user.display_name, user.email, Some(user.role)),
            None => (None, None, None),
        };
        Self {
            record: DunningRecordResponse::from(&detail.record),
            display_name,
            email,
            role,
            audit_trail: detail.audit_trail.iter().map(Into::into).collect(),
        }
    }
}

/// Result of a manual retry or cancel.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResponse {
    pub record_id: String,
    /// `advanced`, `canceled`, `not_due`, `already_terminal` or `superseded`.
    pub outcome: &'static str,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DunningStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DunningStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
}

impl From<AdvanceOutcome> for AdvanceResponse {
    fn from(outcome: AdvanceOutcome) -> Self {
        let changed = outcome.changed();
        let base = |record_id: &dyn std::fmt::Display, outcome: &'static str| AdvanceResponse {
            record_id: record_id.to_string(),
            outcome,
            changed,
            from: None,
            to: None,
            due_at: None,
        };
        match outcome {
            AdvanceOutcome::Advanced {
                record_id,
                from,
                to,
            } => AdvanceResponse {
                from: Some(from),
                to: Some(to),
                ..base(&record_id, "advanced")
            },
            AdvanceOutcome::Canceled { record_id, from } => AdvanceResponse {
                from: Some(from),
                to: Some(DunningStage::Canceled),
                ..base(&record_id, "canceled")
            },
            AdvanceOutcome::NotDue { record_id, due_at } => AdvanceResponse {
                due_at: Some(due_at.to_rfc3339()),
                ..base(&record_id, "not_due")
            },
            AdvanceOutcome::AlreadyTerminal { record_id } => base(&record_id, "already_terminal"),
            AdvanceOutcome::Superseded { record_id } => base(&record_id, "superseded"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub active_by_stage: BTreeMap<String, u64>,
    pub total_active: u64,
    pub recovered: u64,
    pub canceled: u64,
}

impl From<DunningStats> for StatsResponse {
    fn from(stats: DunningStats) -> Self {
        let mut active_by_stage: BTreeMap<String, u64> = DunningStage::ALL
            .iter()
            .filter(|s| **s != DunningStage::Canceled)
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for (stage, count) in &stats.active_by_stage {
            active_by_stage.insert(stage.as_str().to_string(), *count);
        }
        Self {
            total_active: stats.total_active(),
            active_by_stage,
            recovered: stats.recovered,
            canceled: stats.canceled,
        }
    }
}

/// Acknowledgement for a webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAckResponse {
    pub received: bool,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl From<HandleGatewayWebhookResult> for WebhookAckResponse {
    fn from(result: HandleGatewayWebhookResult) -> Self {
        let record_id = match &result {
            HandleGatewayWebhookResult::DunningOpened { record_id }
            | HandleGatewayWebhookResult::AlreadyInRecovery { record_id }
            | HandleGatewayWebhookResult::InvoiceAlreadyCanceled { record_id }
            | HandleGatewayWebhookResult::Recovered { record_id } => Some(record_id.to_string()),
            _ => None,
        };
        Self {
            received: true,
            outcome: result.as_str(),
            record_id,
        }
    }
}

/// Standard error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}
