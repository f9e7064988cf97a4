//! Append-only audit trail for dunning records.
//!
//! Entries that originate from a gateway event carry its `event_id`; the
//! audit log is the ledger webhook deduplication is checked against.

use crate::domain::foundation::{AuditEntryId, DunningRecordId, EventId, OperatorId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of change an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PaymentFailure,
    ReminderSent,
    SubscriptionCanceled,
    UserDowngraded,
    ManualOverride,
    PaymentRecovered,
    /// An event was suppressed because it would have broken a record invariant.
    InvariantWarning,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PaymentFailure => "payment_failure",
            AuditAction::ReminderSent => "reminder_sent",
            AuditAction::SubscriptionCanceled => "subscription_canceled",
            AuditAction::UserDowngraded => "user_downgraded",
            AuditAction::ManualOverride => "manual_override",
            AuditAction::PaymentRecovered => "payment_recovered",
            AuditAction::InvariantWarning => "invariant_warning",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_failure" => Ok(AuditAction::PaymentFailure),
            "reminder_sent" => Ok(AuditAction::ReminderSent),
            "subscription_canceled" => Ok(AuditAction::SubscriptionCanceled),
            "user_downgraded" => Ok(AuditAction::UserDowngraded),
            "manual_override" => Ok(AuditAction::ManualOverride),
            "payment_recovered" => Ok(AuditAction::PaymentRecovered),
            "invariant_warning" => Ok(AuditAction::InvariantWarning),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

/// Who caused a change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// Webhook ingress or the scheduler.
    System,
    Operator(OperatorId),
}

impl Actor {
    /// Storage form: `system` or `operator:<id>`.
    pub fn to_storage(&self) -> String {
        match self {
            Actor::System => "system".to_string(),
            Actor::Operator(id) => format!("operator:{}", id),
        }
    }

    pub fn from_storage(s: &str) -> Result<Self, String> {
        if s == "system" {
            return Ok(Actor::System);
        }
        s.strip_prefix("operator:")
            .and_then(|id| OperatorId::new(id).ok())
            .map(Actor::Operator)
            .ok_or_else(|| format!("unknown actor: {}", s))
    }
}

/// One immutable entry in a record's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub dunning_record_id: DunningRecordId,
    pub action: AuditAction,
    pub actor: Actor,
    pub timestamp: Timestamp,
    pub details: serde_json::Value,

    /// Gateway event this entry accounts for, if any. Unique across the log.
    pub event_id: Option<EventId>,
}

impl AuditEntry {
    pub fn new(
        dunning_record_id: DunningRecordId,
        action: AuditAction,
        actor: Actor,
        timestamp: Timestamp,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            dunning_record_id,
            action,
            actor,
            timestamp,
            details,
            event_id: None,
        }
    }

    /// Ties the entry to the gateway event that caused it.
    pub fn for_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }
}
