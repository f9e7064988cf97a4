//! DunningRecord aggregate.
//!
//! One record tracks one subscription through the recovery workflow.
//!
//! # Invariants
//!
//! - At most one active (non-archived) record per subscription; the store
//!   enforces this at insert time
//! - `stage` only moves forward; recovery archives the record instead of
//!   rewinding it
//! - Archived records are immutable
//! - `amount_due` and `created_at` never change after creation

use crate::domain::foundation::{
    DunningRecordId, EventId, Money, StateMachine, SubscriptionId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

use super::{DunningError, DunningStage, StagePolicy};

/// Gateway and notification bookkeeping carried alongside the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningMetadata {
    /// Payment attempts reported by the gateway so far.
    pub attempt_count: Option<u32>,

    /// When the gateway plans to retry the charge. Informational only.
    pub next_gateway_retry_at: Option<Timestamp>,

    pub last_reminder_sent_at: Option<Timestamp>,
}

/// How an archived record was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// A successful payment closed the record.
    Recovered { event_id: EventId },

    /// The workflow ran to cancellation.
    Canceled,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Recovered { .. } => "recovered",
            Resolution::Canceled => "canceled",
        }
    }
}

/// Input for opening a record on a payment failure.
#[derive(Debug, Clone)]
pub struct OpenDunningRecord {
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub amount_due: Money,
    pub gateway_invoice_ref: String,
    pub source_event_id: EventId,
    pub metadata: DunningMetadata,
}

/// Recovery state for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningRecord {
    pub id: DunningRecordId,
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub stage: DunningStage,

    /// Snapshot of the failed invoice.
    pub amount_due: Money,

    pub gateway_invoice_ref: String,

    /// First failure; anchors every stage's due date.
    pub created_at: Timestamp,

    pub updated_at: Timestamp,

    /// Notifications successfully sent. Never decreases.
    pub reminder_count: u32,

    pub metadata: DunningMetadata,

    /// Event that opened the record.
    pub source_event_id: EventId,

    /// Due time of the next stage; `None` once archived.
    pub next_action_at: Option<Timestamp>,

    pub archived_at: Option<Timestamp>,

    pub resolution: Option<Resolution>,

    /// Version as read from the store; the store bumps it on every update.
    pub version: u64,
}

impl DunningRecord {
    /// Opens a new record at `PaymentFailed`.
    pub fn open(input: OpenDunningRecord, policy: &StagePolicy, now: Timestamp) -> Self {
        Self {
            id: DunningRecordId::new(),
            subscription_id: input.subscription_id,
            user_id: input.user_id,
            stage: DunningStage::PaymentFailed,
            amount_due: input.amount_due,
            gateway_invoice_ref: input.gateway_invoice_ref,
            created_at: now,
            updated_at: now,
            reminder_count: 0,
            metadata: input.metadata,
            source_event_id: input.source_event_id,
            next_action_at: policy.next_due_at(DunningStage::PaymentFailed, now),
            archived_at: None,
            resolution: None,
            version: 0,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Active records are still moving through the workflow.
    pub fn is_active(&self) -> bool {
        !self.is_archived()
    }

    /// True once the record can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.is_archived() || self.stage.is_terminal()
    }

    /// Records a delivered notification.
    pub fn record_notification(&mut self, now: Timestamp) {
        self.reminder_count = self.reminder_count.saturating_add(1);
        self.metadata.last_reminder_sent_at = Some(now);
    }

    /// Moves to a later non-terminal stage.
    ///
    /// Cancellation goes through [`DunningRecord::cancel`] so the archive
    /// fields are set together with the stage.
    pub fn advance_to(
        &mut self,
        target: DunningStage,
        policy: &StagePolicy,
        now: Timestamp,
    ) -> Result<(), DunningError> {
        if self.is_archived() {
            return Err(DunningError::already_terminal(self.id));
        }
        if target == DunningStage::Canceled {
            return self.cancel(now);
        }
        self.stage = self
            .stage
            .transition_to(target)
            .map_err(|_| DunningError::InvalidTransition {
                from: self.stage,
                to: target,
            })?;
        self.next_action_at = policy.next_due_at(target, self.created_at);
        self.updated_at = now;
        Ok(())
    }

    /// Moves to `Canceled` and archives the record.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), DunningError> {
        if self.is_archived() {
            return Err(DunningError::already_terminal(self.id));
        }
        self.stage = self
            .stage
            .transition_to(DunningStage::Canceled)
            .map_err(|_| DunningError::InvalidTransition {
                from: self.stage,
                to: DunningStage::Canceled,
            })?;
        self.archive(Resolution::Canceled, now);
        Ok(())
    }

    /// Archives the record after a successful payment. The stage is kept
    /// as it was so the trail shows how far recovery had progressed.
    pub fn recover(&mut self, event_id: EventId, now: Timestamp) -> Result<(), DunningError> {
        if self.is_terminal() {
            return Err(DunningError::already_terminal(self.id));
        }
        self.archive(Resolution::Recovered { event_id }, now);
        Ok(())
    }

    fn archive(&mut self, resolution: Resolution, now: Timestamp) {
        self.resolution = Some(resolution);
        self.archived_at = Some(now);
        self.next_action_at = None;
        self.updated_at = now;
    }
}
