//! DunningEngine - orchestrates every state change of a dunning record.
//!
//! All mutating operations take the per-subscription lock and write the
//! record through the version-checked store update. Gateway events are
//! deduplicated on `event_id` against the audit log before anything else
//! happens, and the event-carrying audit entry is always the last write of
//! an event's handling, so a crash part-way leaves the event retryable.
//!
//! Ordering per transition:
//! - opening: insert -> notify (inserter only) -> count notice -> past due
//!   -> audit
//! - regular stages: notify (best effort) -> stage write -> audit
//! - cancellation: cancel subscription -> downgrade user -> notify -> stage
//!   write -> audit. Both side effects are idempotent by record id, so a
//!   failure before the stage write is safe to replay.

use serde_json::json;
use std::sync::Arc;

use crate::domain::dunning::{
    Actor, AuditAction, AuditEntry, DunningError, DunningMetadata, DunningRecord, DunningStage,
    NextAction, OpenDunningRecord, Resolution, StagePolicy,
};
use crate::domain::foundation::{
    DunningRecordId, EventId, Money, OperatorId, SubscriptionId, Timestamp, UserId,
};
use crate::ports::{
    AppendResult, AuditLog, Clock, DunningRecordStore, InsertResult, Notification,
    NotificationGateway, SubscriptionStatus, SubscriptionStore, UpdateResult, UserDirectory,
};

use super::keyed_lock::KeyedLocks;

/// How many times a version conflict is retried before giving up.
const MAX_CONFLICT_RETRIES: u32 = 3;

/// A verified "payment failed" event.
#[derive(Debug, Clone)]
pub struct PaymentFailedCommand {
    pub event_id: EventId,
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub amount_due: Money,
    pub gateway_invoice_ref: String,
    pub metadata: DunningMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentFailedOutcome {
    /// A new record was opened (or an interrupted opening was completed).
    Opened { record_id: DunningRecordId },
    /// The event was already handled.
    Duplicate,
    /// The subscription already has an active record; only audited.
    AlreadyInRecovery { record_id: DunningRecordId },
    /// The invoice already ran to cancellation; only audited.
    InvoiceAlreadyCanceled { record_id: DunningRecordId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRecoveredOutcome {
    Recovered { record_id: DunningRecordId },
    Duplicate,
    NoActiveRecord,
}

/// Who asked for an advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceTrigger {
    Scheduled,
    /// Operator retry; ignores the due date.
    Manual { operator: OperatorId },
}

impl AdvanceTrigger {
    fn actor(&self) -> Actor {
        match self {
            AdvanceTrigger::Scheduled => Actor::System,
            AdvanceTrigger::Manual { operator } => Actor::Operator(operator.clone()),
        }
    }

    fn is_manual(&self) -> bool {
        matches!(self, AdvanceTrigger::Manual { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced {
        record_id: DunningRecordId,
        from: DunningStage,
        to: DunningStage,
    },
    Canceled {
        record_id: DunningRecordId,
        from: DunningStage,
    },
    NotDue {
        record_id: DunningRecordId,
        due_at: Timestamp,
    },
    /// Already canceled or resolved; nothing to do.
    AlreadyTerminal { record_id: DunningRecordId },
    /// A concurrent writer already moved the record to or past the target.
    Superseded { record_id: DunningRecordId },
}

impl AdvanceOutcome {
    /// True if this call changed the record.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            AdvanceOutcome::Advanced { .. } | AdvanceOutcome::Canceled { .. }
        )
    }
}

/// Why a terminal transition is happening.
enum TerminalCause {
    Schedule,
    ManualRetry { operator: OperatorId },
    ManualCancel { operator: OperatorId, reason: String },
}

impl TerminalCause {
    fn actor(&self) -> Actor {
        match self {
            TerminalCause::Schedule => Actor::System,
            TerminalCause::ManualRetry { operator } | TerminalCause::ManualCancel { operator, .. } => {
                Actor::Operator(operator.clone())
            }
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            TerminalCause::ManualCancel { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

pub struct DunningEngine {
    records: Arc<dyn DunningRecordStore>,
    audit: Arc<dyn AuditLog>,
    notifications: Arc<dyn NotificationGateway>,
    subscriptions: Arc<dyn SubscriptionStore>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    policy: StagePolicy,
    locks: KeyedLocks,
}

impl DunningEngine {
    pub fn new(
        records: Arc<dyn DunningRecordStore>,
        audit: Arc<dyn AuditLog>,
        notifications: Arc<dyn NotificationGateway>,
        subscriptions: Arc<dyn SubscriptionStore>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        policy: StagePolicy,
    ) -> Self {
        Self {
            records,
            audit,
            notifications,
            subscriptions,
            users,
            clock,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ════════════════════════════════════════════════════════════════
    // Gateway events
    // ════════════════════════════════════════════════════════════════

    pub async fn on_payment_failed(
        &self,
        cmd: PaymentFailedCommand,
    ) -> Result<PaymentFailedOutcome, DunningError> {
        let _guard = self.locks.lock(cmd.subscription_id.as_str()).await;

        if self.audit.exists_for_event(&cmd.event_id).await? {
            tracing::debug!(event_id = %cmd.event_id, "Duplicate payment failure event");
            return Ok(PaymentFailedOutcome::Duplicate);
        }

        let now = self.clock.now();

        if let Some(active) = self
            .records
            .find_active_by_subscription(&cmd.subscription_id)
            .await?
        {
            if active.source_event_id == cmd.event_id {
                // an earlier delivery stopped after the insert, or another
                // process is opening it right now; the inserter owns the notice
                return match self.finish_opening(&active, &cmd, now).await? {
                    AppendResult::Appended => Ok(PaymentFailedOutcome::Opened {
                        record_id: active.id,
                    }),
                    AppendResult::DuplicateEvent => Ok(PaymentFailedOutcome::Duplicate),
                };
            }
            return self.suppress_failure(&active, &cmd, now).await;
        }

        if let Some(latest) = self
            .records
            .find_latest_by_subscription(&cmd.subscription_id)
            .await?
        {
            if latest.resolution == Some(Resolution::Canceled)
                && latest.gateway_invoice_ref == cmd.gateway_invoice_ref
            {
                return self.ignore_for_canceled_invoice(&latest, &cmd, now).await;
            }
        }

        let mut record = DunningRecord::open(
            OpenDunningRecord {
                subscription_id: cmd.subscription_id.clone(),
                user_id: cmd.user_id.clone(),
                amount_due: cmd.amount_due.clone(),
                gateway_invoice_ref: cmd.gateway_invoice_ref.clone(),
                source_event_id: cmd.event_id.clone(),
                metadata: cmd.metadata.clone(),
            },
            &self.policy,
            now,
        );

        match self.records.insert(&record).await? {
            InsertResult::Inserted => record.version = 1,
            InsertResult::ActiveExists(existing_id) => {
                // lost a race with another process
                let existing = self
                    .records
                    .find_by_id(&existing_id)
                    .await?
                    .ok_or_else(|| DunningError::conflict(existing_id))?;
                if existing.source_event_id == cmd.event_id {
                    tracing::debug!(
                        record_id = %existing.id,
                        event_id = %cmd.event_id,
                        "Same payment failure opened concurrently elsewhere"
                    );
                    return Ok(PaymentFailedOutcome::Duplicate);
                }
                return self.suppress_failure(&existing, &cmd, now).await;
            }
        }

        // only the process whose insert won sends the opening notice
        let opening = self.policy.open_action(now);
        if opening.notify && self.notify(&record, opening.stage).await {
            record = self.record_opening_notice(record, now).await?;
        }

        if self.finish_opening(&record, &cmd, now).await? == AppendResult::DuplicateEvent {
            tracing::debug!(
                record_id = %record.id,
                event_id = %cmd.event_id,
                "Opening completed concurrently by a redelivery"
            );
        }

        tracing::info!(
            record_id = %record.id,
            subscription_id = %record.subscription_id,
            event_id = %cmd.event_id,
            amount = %record.amount_due,
            "Dunning record opened"
        );

        Ok(PaymentFailedOutcome::Opened {
            record_id: record.id,
        })
    }

    pub async fn on_payment_recovered(
        &self,
        subscription_id: &SubscriptionId,
        event_id: &EventId,
    ) -> Result<PaymentRecoveredOutcome, DunningError> {
        let _guard = self.locks.lock(subscription_id.as_str()).await;

        if self.audit.exists_for_event(event_id).await? {
            tracing::debug!(event_id = %event_id, "Duplicate payment recovery event");
            return Ok(PaymentRecoveredOutcome::Duplicate);
        }

        let now = self.clock.now();

        let record = match self
            .records
            .find_active_by_subscription(subscription_id)
            .await?
        {
            Some(active) => self.archive_recovered(active, event_id, now).await?,
            None => match self
                .records
                .find_latest_by_subscription(subscription_id)
                .await?
            {
                // an earlier delivery archived the record but did not finish
                Some(latest) if recovered_by(&latest, event_id) => latest,
                _ => {
                    tracing::debug!(
                        subscription_id = %subscription_id,
                        event_id = %event_id,
                        "Payment recovered without an active dunning record"
                    );
                    return Ok(PaymentRecoveredOutcome::NoActiveRecord);
                }
            },
        };

        self.subscriptions
            .set_status(subscription_id, SubscriptionStatus::Active)
            .await?;

        let entry = AuditEntry::new(
            record.id,
            AuditAction::PaymentRecovered,
            Actor::System,
            now,
            json!({
                "stage": record.stage,
                "reminder_count": record.reminder_count,
            }),
        )
        .for_event(event_id.clone());
        if self.audit.append(&entry).await? == AppendResult::DuplicateEvent {
            return Ok(PaymentRecoveredOutcome::Duplicate);
        }

        tracing::info!(
            record_id = %record.id,
            subscription_id = %subscription_id,
            stage = %record.stage,
            "Dunning record resolved by payment"
        );

        Ok(PaymentRecoveredOutcome::Recovered {
            record_id: record.id,
        })
    }

    // ════════════════════════════════════════════════════════════════
    // Stage transitions
    // ════════════════════════════════════════════════════════════════

    /// Moves the record at most one stage forward.
    ///
    /// Scheduled calls are no-ops until the next stage is due. Manual calls
    /// advance immediately and are audited as overrides.
    pub async fn advance(
        &self,
        record_id: &DunningRecordId,
        now: Timestamp,
        trigger: AdvanceTrigger,
    ) -> Result<AdvanceOutcome, DunningError> {
        let subscription_id = self.load(record_id).await?.subscription_id;
        let _guard = self.locks.lock(subscription_id.as_str()).await;

        let mut notified_for: Option<DunningStage> = None;
        let mut conflicts = 0;

        loop {
            let record = self.load(record_id).await?;
            if record.is_terminal() {
                return Ok(AdvanceOutcome::AlreadyTerminal {
                    record_id: record.id,
                });
            }

            let action = match self.policy.next_action(&record, now) {
                Some(action) => action,
                None => {
                    return Ok(AdvanceOutcome::AlreadyTerminal {
                        record_id: record.id,
                    })
                }
            };

            if !action.due && !trigger.is_manual() {
                return Ok(AdvanceOutcome::NotDue {
                    record_id: record.id,
                    due_at: action.due_at,
                });
            }

            if action.terminal {
                let cause = match &trigger {
                    AdvanceTrigger::Scheduled => TerminalCause::Schedule,
                    AdvanceTrigger::Manual { operator } => TerminalCause::ManualRetry {
                        operator: operator.clone(),
                    },
                };
                return self.finish_terminal(record, action, now, cause).await;
            }

            let from = record.stage;
            let notified = match notified_for {
                _ if !action.notify => false,
                Some(stage) if stage == action.stage => true,
                _ => {
                    let sent = self.notify(&record, action.stage).await;
                    if sent {
                        notified_for = Some(action.stage);
                    }
                    sent
                }
            };

            let mut updated = record.clone();
            updated.advance_to(action.stage, &self.policy, now)?;
            if notified {
                updated.record_notification(now);
            }

            match self.records.update(&updated).await? {
                UpdateResult::Updated { .. } => {
                    self.append_trail(AuditEntry::new(
                        record.id,
                        AuditAction::ReminderSent,
                        trigger.actor(),
                        now,
                        json!({
                            "from": from,
                            "to": action.stage,
                            "notified": notified,
                            "due_at": action.due_at,
                        }),
                    ))
                    .await;

                    if trigger.is_manual() {
                        self.append_trail(AuditEntry::new(
                            record.id,
                            AuditAction::ManualOverride,
                            trigger.actor(),
                            now,
                            json!({
                                "operation": "retry",
                                "from": from,
                                "to": action.stage,
                                "scheduled_for": action.due_at,
                            }),
                        ))
                        .await;
                    }

                    tracing::info!(
                        record_id = %record.id,
                        from = %from,
                        to = %action.stage,
                        notified,
                        manual = trigger.is_manual(),
                        "Dunning record advanced"
                    );

                    return Ok(AdvanceOutcome::Advanced {
                        record_id: record.id,
                        from,
                        to: action.stage,
                    });
                }
                UpdateResult::Conflict => {
                    conflicts += 1;
                    let fresh = self.load(record_id).await?;
                    if fresh.is_terminal() || fresh.stage >= action.stage {
                        tracing::debug!(
                            record_id = %record_id,
                            target = %action.stage,
                            "Concurrent writer already advanced record"
                        );
                        return Ok(AdvanceOutcome::Superseded {
                            record_id: *record_id,
                        });
                    }
                    if conflicts > MAX_CONFLICT_RETRIES {
                        return Err(DunningError::conflict(*record_id));
                    }
                }
            }
        }
    }

    /// Cancels immediately through the same path as a scheduled cancellation.
    pub async fn cancel_now(
        &self,
        record_id: &DunningRecordId,
        operator: OperatorId,
        reason: impl Into<String>,
    ) -> Result<AdvanceOutcome, DunningError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DunningError::validation("reason", "reason is required"));
        }

        let subscription_id = self.load(record_id).await?.subscription_id;
        let _guard = self.locks.lock(subscription_id.as_str()).await;

        let record = self.load(record_id).await?;
        if record.is_terminal() {
            return Ok(AdvanceOutcome::AlreadyTerminal {
                record_id: record.id,
            });
        }

        let now = self.clock.now();
        let action = self.policy.cancel_now(now);
        self.finish_terminal(
            record,
            action,
            now,
            TerminalCause::ManualCancel { operator, reason },
        )
        .await
    }

    // ════════════════════════════════════════════════════════════════
    // Internals
    // ════════════════════════════════════════════════════════════════

    async fn load(&self, record_id: &DunningRecordId) -> Result<DunningRecord, DunningError> {
        self.records
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| DunningError::not_found(*record_id))
    }

    /// Sends the notification for `stage`. Failures are logged, never raised.
    async fn notify(&self, record: &DunningRecord, stage: DunningStage) -> bool {
        let notification = Notification {
            record_id: record.id,
            user_id: record.user_id.clone(),
            stage,
            amount_due: record.amount_due.clone(),
            due_date_for_next_stage: self.policy.next_due_at(stage, record.created_at),
        };

        match self.notifications.send(&notification).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    stage = %stage,
                    error = %e,
                    "Dunning notification failed"
                );
                false
            }
        }
    }

    /// Appends an entry that no retry depends on. Failures are logged.
    async fn append_trail(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry).await {
            tracing::error!(
                record_id = %entry.dunning_record_id,
                action = %entry.action,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    /// Counts the opening notice on the freshly inserted record.
    async fn record_opening_notice(
        &self,
        mut record: DunningRecord,
        now: Timestamp,
    ) -> Result<DunningRecord, DunningError> {
        let mut conflicts = 0;
        loop {
            let mut updated = record.clone();
            updated.record_notification(now);

            match self.records.update(&updated).await? {
                UpdateResult::Updated { version } => {
                    updated.version = version;
                    return Ok(updated);
                }
                UpdateResult::Conflict => {
                    conflicts += 1;
                    record = self.load(&record.id).await?;
                    if record.is_terminal() || conflicts > MAX_CONFLICT_RETRIES {
                        tracing::warn!(
                            record_id = %record.id,
                            "Opening notice sent but not counted on the record"
                        );
                        return Ok(record);
                    }
                }
            }
        }
    }

    /// Marks the subscription past due and writes the event-carrying entry.
    /// `DuplicateEvent` means another delivery already finished the opening.
    async fn finish_opening(
        &self,
        record: &DunningRecord,
        cmd: &PaymentFailedCommand,
        now: Timestamp,
    ) -> Result<AppendResult, DunningError> {
        self.subscriptions
            .set_status(&record.subscription_id, SubscriptionStatus::PastDue)
            .await?;

        let entry = AuditEntry::new(
            record.id,
            AuditAction::PaymentFailure,
            Actor::System,
            now,
            json!({
                "invoice_ref": cmd.gateway_invoice_ref,
                "amount_cents": cmd.amount_due.amount_cents(),
                "currency": cmd.amount_due.currency(),
                "attempt_count": cmd.metadata.attempt_count,
                "notified": record.reminder_count > 0,
            }),
        )
        .for_event(cmd.event_id.clone());
        Ok(self.audit.append(&entry).await?)
    }

    async fn suppress_failure(
        &self,
        active: &DunningRecord,
        cmd: &PaymentFailedCommand,
        now: Timestamp,
    ) -> Result<PaymentFailedOutcome, DunningError> {
        let entry = AuditEntry::new(
            active.id,
            AuditAction::PaymentFailure,
            Actor::System,
            now,
            json!({
                "suppressed": true,
                "reason": "active_record_exists",
                "invoice_ref": cmd.gateway_invoice_ref,
                "attempt_count": cmd.metadata.attempt_count,
            }),
        )
        .for_event(cmd.event_id.clone());
        if self.audit.append(&entry).await? == AppendResult::DuplicateEvent {
            return Ok(PaymentFailedOutcome::Duplicate);
        }

        tracing::info!(
            record_id = %active.id,
            subscription_id = %cmd.subscription_id,
            event_id = %cmd.event_id,
            "Payment failure suppressed, subscription already in recovery"
        );

        Ok(PaymentFailedOutcome::AlreadyInRecovery {
            record_id: active.id,
        })
    }

    async fn ignore_for_canceled_invoice(
        &self,
        canceled: &DunningRecord,
        cmd: &PaymentFailedCommand,
        now: Timestamp,
    ) -> Result<PaymentFailedOutcome, DunningError> {
        let entry = AuditEntry::new(
            canceled.id,
            AuditAction::InvariantWarning,
            Actor::System,
            now,
            json!({
                "reason": "invoice_already_canceled",
                "event_type": "payment_failed",
                "invoice_ref": cmd.gateway_invoice_ref,
            }),
        )
        .for_event(cmd.event_id.clone());
        if self.audit.append(&entry).await? == AppendResult::DuplicateEvent {
            return Ok(PaymentFailedOutcome::Duplicate);
        }

        tracing::warn!(
            record_id = %canceled.id,
            event_id = %cmd.event_id,
            "Payment failure for an invoice whose dunning already ended in cancellation"
        );

        Ok(PaymentFailedOutcome::InvoiceAlreadyCanceled {
            record_id: canceled.id,
        })
    }

    async fn archive_recovered(
        &self,
        mut record: DunningRecord,
        event_id: &EventId,
        now: Timestamp,
    ) -> Result<DunningRecord, DunningError> {
        let mut conflicts = 0;
        loop {
            let mut updated = record.clone();
            updated.recover(event_id.clone(), now)?;

            match self.records.update(&updated).await? {
                UpdateResult::Updated { version } => {
                    updated.version = version;
                    return Ok(updated);
                }
                UpdateResult::Conflict => {
                    conflicts += 1;
                    if conflicts > MAX_CONFLICT_RETRIES {
                        return Err(DunningError::conflict(record.id));
                    }
                    record = self.load(&record.id).await?;
                    if record.is_terminal() {
                        return Err(DunningError::already_terminal(record.id));
                    }
                }
            }
        }
    }

    /// Cancels the subscription, downgrades the user, then archives the
    /// record. The stage write happens only once both side effects stuck.
    async fn finish_terminal(
        &self,
        mut record: DunningRecord,
        action: NextAction,
        now: Timestamp,
        cause: TerminalCause,
    ) -> Result<AdvanceOutcome, DunningError> {
        let from = record.stage;

        self.subscriptions
            .cancel_for_record(&record.subscription_id, &record.id)
            .await
            .map_err(|e| {
                tracing::error!(record_id = %record.id, error = %e, "Subscription cancellation failed");
                DunningError::terminal_action_failed(record.id, "cancel_subscription", e.to_string())
            })?;

        self.users
            .downgrade_to_lowest(&record.user_id, &record.id)
            .await
            .map_err(|e| {
                tracing::error!(record_id = %record.id, error = %e, "User downgrade failed");
                DunningError::terminal_action_failed(record.id, "downgrade_user", e.to_string())
            })?;

        let notified = action.notify && self.notify(&record, action.stage).await;

        let mut conflicts = 0;
        loop {
            let mut updated = record.clone();
            updated.cancel(now)?;
            if notified {
                updated.record_notification(now);
            }

            match self.records.update(&updated).await? {
                UpdateResult::Updated { .. } => break,
                UpdateResult::Conflict => {
                    conflicts += 1;
                    record = self.load(&record.id).await?;
                    if record.is_terminal() {
                        tracing::warn!(
                            record_id = %record.id,
                            resolution = ?record.resolution,
                            "Record closed concurrently during cancellation"
                        );
                        return Ok(AdvanceOutcome::Superseded {
                            record_id: record.id,
                        });
                    }
                    if conflicts > MAX_CONFLICT_RETRIES {
                        return Err(DunningError::conflict(record.id));
                    }
                }
            }
        }

        let actor = cause.actor();
        let reason = cause.reason().map(str::to_string);

        self.append_trail(AuditEntry::new(
            record.id,
            AuditAction::SubscriptionCanceled,
            actor.clone(),
            now,
            json!({
                "from": from,
                "subscription_id": record.subscription_id,
                "notified": notified,
                "reason": reason,
            }),
        ))
        .await;

        self.append_trail(AuditEntry::new(
            record.id,
            AuditAction::UserDowngraded,
            actor.clone(),
            now,
            json!({ "user_id": record.user_id }),
        ))
        .await;

        match &cause {
            TerminalCause::Schedule => {}
            TerminalCause::ManualRetry { .. } => {
                self.append_trail(AuditEntry::new(
                    record.id,
                    AuditAction::ManualOverride,
                    actor,
                    now,
                    json!({ "operation": "retry", "from": from, "to": DunningStage::Canceled }),
                ))
                .await;
            }
            TerminalCause::ManualCancel { reason, .. } => {
                self.append_trail(AuditEntry::new(
                    record.id,
                    AuditAction::ManualOverride,
                    actor,
                    now,
                    json!({ "operation": "cancel", "from": from, "reason": reason }),
                ))
                .await;
            }
        }

        tracing::info!(
            record_id = %record.id,
            subscription_id = %record.subscription_id,
            from = %from,
            manual = !matches!(cause, TerminalCause::Schedule),
            "Dunning record canceled"
        );

        Ok(AdvanceOutcome::Canceled {
            record_id: record.id,
            from,
        })
    }
}

fn recovered_by(record: &DunningRecord, event_id: &EventId) -> bool {
    matches!(&record.resolution, Some(Resolution::Recovered { event_id: e }) if e == event_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryAuditLog, InMemoryDunningRecordStore, InMemorySubscriptionStore,
        InMemoryUserDirectory, RecordingNotificationGateway,
    };
    use crate::adapters::ManualClock;
    use crate::domain::foundation::{DomainError, Money};
    use crate::ports::{UserProfile, UserDirectory as _};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ════════════════════════════════════════════════════════════════
    // Fixture
    // ════════════════════════════════════════════════════════════════

    struct Fixture {
        engine: DunningEngine,
        records: Arc<InMemoryDunningRecordStore>,
        audit: Arc<InMemoryAuditLog>,
        notifications: Arc<RecordingNotificationGateway>,
        subscriptions: Arc<InMemorySubscriptionStore>,
        users: Arc<InMemoryUserDirectory>,
        clock: Arc<ManualClock>,
    }

    fn t0() -> Timestamp {
        Timestamp::from_unix_secs(1_704_067_200).unwrap() // 2024-01-01
    }

    async fn fixture() -> Fixture {
        fixture_with_store(Arc::new(InMemoryDunningRecordStore::new())).await
    }

    async fn fixture_with_store(records: Arc<InMemoryDunningRecordStore>) -> Fixture {
        let audit = Arc::new(InMemoryAuditLog::new());
        let notifications = Arc::new(RecordingNotificationGateway::new());
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let users = Arc::new(InMemoryUserDirectory::new("free"));
        users
            .insert(UserProfile {
                user_id: UserId::new("user_1").unwrap(),
                email: Some("ada@example.com".to_string()),
                display_name: Some("Ada".to_string()),
                role: "premium".to_string(),
            })
            .await;
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = DunningEngine::new(
            records.clone(),
            audit.clone(),
            notifications.clone(),
            subscriptions.clone(),
            users.clone(),
            clock.clone(),
            StagePolicy::default(),
        );
        Fixture {
            engine,
            records,
            audit,
            notifications,
            subscriptions,
            users,
            clock,
        }
    }

    fn sub() -> SubscriptionId {
        SubscriptionId::new("sub_1").unwrap()
    }

    fn operator() -> OperatorId {
        OperatorId::new("op_1").unwrap()
    }

    fn failed(event: &str, invoice: &str) -> PaymentFailedCommand {
        PaymentFailedCommand {
            event_id: EventId::new(event).unwrap(),
            subscription_id: sub(),
            user_id: UserId::new("user_1").unwrap(),
            amount_due: Money::new(4900, "USD").unwrap(),
            gateway_invoice_ref: invoice.to_string(),
            metadata: DunningMetadata {
                attempt_count: Some(1),
                ..DunningMetadata::default()
            },
        }
    }

    async fn open(f: &Fixture) -> DunningRecordId {
        match f.engine.on_payment_failed(failed("evt_1", "in_1")).await.unwrap() {
            PaymentFailedOutcome::Opened { record_id } => record_id,
            other => panic!("expected Opened, got {:?}", other),
        }
    }

    // ════════════════════════════════════════════════════════════════
    // on_payment_failed
    // ════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn payment_failure_opens_record_and_notifies() {
        let f = fixture().await;
        let id = open(&f).await;

        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::PaymentFailed);
        assert_eq!(record.reminder_count, 1);
        assert_eq!(record.metadata.attempt_count, Some(1));
        assert_eq!(record.next_action_at, Some(t0().add_days(3)));

        assert_eq!(f.notifications.sent_stages().await, vec![DunningStage::PaymentFailed]);
        let sent = f.notifications.sent().await;
        assert_eq!(sent[0].due_date_for_next_stage, Some(t0().add_days(3)));

        assert_eq!(f.subscriptions.status(&sub()).await, Some(SubscriptionStatus::PastDue));
        assert_eq!(f.audit.count_action(AuditAction::PaymentFailure).await, 1);
    }

    #[tokio::test]
    async fn duplicate_event_has_no_side_effects() {
        let f = fixture().await;
        open(&f).await;

        let outcome = f.engine.on_payment_failed(failed("evt_1", "in_1")).await.unwrap();
        assert_eq!(outcome, PaymentFailedOutcome::Duplicate);
        assert_eq!(f.notifications.sent().await.len(), 1);
        assert_eq!(f.audit.entries().await.len(), 1);
        assert_eq!(f.records.len().await, 1);
    }

    #[tokio::test]
    async fn second_failure_while_in_recovery_is_only_audited() {
        let f = fixture().await;
        let id = open(&f).await;

        let outcome = f.engine.on_payment_failed(failed("evt_2", "in_1")).await.unwrap();
        assert_eq!(outcome, PaymentFailedOutcome::AlreadyInRecovery { record_id: id });
        assert_eq!(f.records.len().await, 1);
        assert_eq!(f.notifications.sent().await.len(), 1);

        let trail = f.audit.list_for_record(&id).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].details["suppressed"], json!(true));

        // redelivery of the suppressed event is a duplicate
        let outcome = f.engine.on_payment_failed(failed("evt_2", "in_1")).await.unwrap();
        assert_eq!(outcome, PaymentFailedOutcome::Duplicate);
    }

    #[tokio::test]
    async fn notification_failure_does_not_block_opening() {
        let f = fixture().await;
        f.notifications.set_failing(true);

        let id = open(&f).await;
        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.reminder_count, 0);
        assert_eq!(f.audit.count_action(AuditAction::PaymentFailure).await, 1);
    }

    #[tokio::test]
    async fn interrupted_opening_is_completed_on_redelivery() {
        let f = fixture().await;
        f.subscriptions.set_fail_writes(true);

        let err = f.engine.on_payment_failed(failed("evt_1", "in_1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.records.len().await, 1);
        assert_eq!(f.audit.entries().await.len(), 0);

        f.subscriptions.set_fail_writes(false);
        let outcome = f.engine.on_payment_failed(failed("evt_1", "in_1")).await.unwrap();
        assert!(matches!(outcome, PaymentFailedOutcome::Opened { .. }));
        assert_eq!(f.records.len().await, 1);
        assert_eq!(f.notifications.sent().await.len(), 1);
        assert_eq!(f.subscriptions.status(&sub()).await, Some(SubscriptionStatus::PastDue));
        assert_eq!(f.audit.count_action(AuditAction::PaymentFailure).await, 1);
    }

    /// Delivers after a delay, so two processes can overlap on one event.
    struct SlowNotifier {
        inner: Arc<RecordingNotificationGateway>,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl NotificationGateway for SlowNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), DomainError> {
            tokio::time::sleep(self.delay).await;
            self.inner.send(notification).await
        }
    }

    #[tokio::test]
    async fn same_event_on_two_replicas_notifies_once() {
        let f = fixture().await;
        let notifier = Arc::new(SlowNotifier {
            inner: f.notifications.clone(),
            delay: std::time::Duration::from_millis(50),
        });
        // separate engines share the stores but not the in-process locks
        let replica = || {
            DunningEngine::new(
                f.records.clone(),
                f.audit.clone(),
                notifier.clone(),
                f.subscriptions.clone(),
                f.users.clone(),
                f.clock.clone(),
                StagePolicy::default(),
            )
        };
        let (a, b) = (replica(), replica());

        let (ra, rb) = tokio::join!(
            a.on_payment_failed(failed("evt_1", "in_1")),
            b.on_payment_failed(failed("evt_1", "in_1")),
        );
        let outcomes = [ra.unwrap(), rb.unwrap()];

        assert!(outcomes
            .iter()
            .any(|o| matches!(o, PaymentFailedOutcome::Opened { .. })));
        assert!(outcomes
            .iter()
            .all(|o| !matches!(o, PaymentFailedOutcome::AlreadyInRecovery { .. })));
        assert_eq!(f.notifications.sent().await.len(), 1);
        assert_eq!(f.records.len().await, 1);
        assert_eq!(f.audit.count_action(AuditAction::PaymentFailure).await, 1);

        let record = f
            .records
            .find_active_by_subscription(&sub())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.reminder_count, 1);
    }

    #[tokio::test]
    async fn second_failure_already_audited_elsewhere_is_a_duplicate() {
        let f = fixture().await;
        let id = open(&f).await;

        // another process recorded evt_2 between our dedupe check and append
        f.audit
            .append(
                &AuditEntry::new(id, AuditAction::PaymentFailure, Actor::System, t0(), json!({}))
                    .for_event(EventId::new("evt_2").unwrap()),
            )
            .await
            .unwrap();
        let active = f.records.find_by_id(&id).await.unwrap().unwrap();

        let outcome = f
            .engine
            .suppress_failure(&active, &failed("evt_2", "in_1"), t0())
            .await
            .unwrap();
        assert_eq!(outcome, PaymentFailedOutcome::Duplicate);
    }

    #[tokio::test]
    async fn failure_for_canceled_invoice_is_an_invariant_warning() {
        let f = fixture().await;
        let id = open(&f).await;
        f.engine.cancel_now(&id, operator(), "fraud").await.unwrap();

        let outcome = f.engine.on_payment_failed(failed("evt_late", "in_1")).await.unwrap();
        assert_eq!(outcome, PaymentFailedOutcome::InvoiceAlreadyCanceled { record_id: id });
        assert_eq!(f.audit.count_action(AuditAction::InvariantWarning).await, 1);
        assert_eq!(f.records.len().await, 1);
    }

    #[tokio::test]
    async fn new_invoice_after_cancellation_opens_new_record() {
        let f = fixture().await;
        let id = open(&f).await;
        f.engine.cancel_now(&id, operator(), "fraud").await.unwrap();

        let outcome = f.engine.on_payment_failed(failed("evt_new", "in_2")).await.unwrap();
        assert!(matches!(outcome, PaymentFailedOutcome::Opened { record_id } if record_id != id));
        assert_eq!(f.records.len().await, 2);
    }

    // ════════════════════════════════════════════════════════════════
    // advance
    // ════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn advance_before_due_is_a_no_op() {
        let f = fixture().await;
        let id = open(&f).await;
        let before = f.records.find_by_id(&id).await.unwrap().unwrap();

        for _ in 0..2 {
            let outcome = f
                .engine
                .advance(&id, t0().add_days(2), AdvanceTrigger::Scheduled)
                .await
                .unwrap();
            assert_eq!(
                outcome,
                AdvanceOutcome::NotDue {
                    record_id: id,
                    due_at: t0().add_days(3)
                }
            );
        }

        let after = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn advance_when_due_moves_one_stage_and_notifies() {
        let f = fixture().await;
        let id = open(&f).await;

        let outcome = f
            .engine
            .advance(&id, t0().add_days(3), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                record_id: id,
                from: DunningStage::PaymentFailed,
                to: DunningStage::FirstReminder
            }
        );

        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::FirstReminder);
        assert_eq!(record.reminder_count, 2);
        assert_eq!(record.next_action_at, Some(t0().add_days(7)));
        assert_eq!(
            f.notifications.sent_stages().await,
            vec![DunningStage::PaymentFailed, DunningStage::FirstReminder]
        );
        assert_eq!(f.audit.count_action(AuditAction::ReminderSent).await, 1);
    }

    #[tokio::test]
    async fn dormant_record_steps_only_once_per_call() {
        let f = fixture().await;
        let id = open(&f).await;

        let outcome = f
            .engine
            .advance(&id, t0().add_days(30), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Advanced { to: DunningStage::FirstReminder, .. }));
    }

    #[tokio::test]
    async fn notification_failure_still_advances() {
        let f = fixture().await;
        let id = open(&f).await;
        f.notifications.set_failing(true);

        f.engine
            .advance(&id, t0().add_days(3), AdvanceTrigger::Scheduled)
            .await
            .unwrap();

        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::FirstReminder);
        assert_eq!(record.reminder_count, 1);
    }

    #[tokio::test]
    async fn manual_retry_ignores_schedule_and_is_audited() {
        let f = fixture().await;
        let id = open(&f).await;

        let outcome = f
            .engine
            .advance(&id, t0(), AdvanceTrigger::Manual { operator: operator() })
            .await
            .unwrap();
        assert!(outcome.changed());

        let trail = f.audit.list_for_record(&id).await.unwrap();
        let overrides: Vec<&AuditEntry> = trail
            .iter()
            .filter(|e| e.action == AuditAction::ManualOverride)
            .collect();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].actor, Actor::Operator(operator()));
    }

    #[tokio::test]
    async fn walking_to_the_end_cancels_and_downgrades() {
        let f = fixture().await;
        let id = open(&f).await;

        for day in [3, 7, 12] {
            let outcome = f
                .engine
                .advance(&id, t0().add_days(day), AdvanceTrigger::Scheduled)
                .await
                .unwrap();
            assert!(matches!(outcome, AdvanceOutcome::Advanced { .. }));
        }
        let outcome = f
            .engine
            .advance(&id, t0().add_days(14), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Canceled {
                record_id: id,
                from: DunningStage::FinalWarning
            }
        );

        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::Canceled);
        assert_eq!(record.resolution, Some(Resolution::Canceled));
        assert_eq!(record.reminder_count, 5);
        assert_eq!(f.subscriptions.status(&sub()).await, Some(SubscriptionStatus::Canceled));
        let user = UserId::new("user_1").unwrap();
        assert_eq!(f.users.role_of(&user).await.as_deref(), Some("free"));
        assert_eq!(f.audit.count_action(AuditAction::SubscriptionCanceled).await, 1);
        assert_eq!(f.audit.count_action(AuditAction::UserDowngraded).await, 1);

        let again = f
            .engine
            .advance(&id, t0().add_days(20), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(again, AdvanceOutcome::AlreadyTerminal { record_id: id });
    }

    #[tokio::test]
    async fn failed_terminal_action_keeps_stage_and_is_retryable() {
        let f = fixture().await;
        let id = open(&f).await;
        for day in [3, 7, 12] {
            f.engine
                .advance(&id, t0().add_days(day), AdvanceTrigger::Scheduled)
                .await
                .unwrap();
        }

        f.users.set_fail_writes(true);
        let err = f
            .engine
            .advance(&id, t0().add_days(14), AdvanceTrigger::Scheduled)
            .await
            .unwrap_err();
        assert!(matches!(err, DunningError::TerminalActionFailed { ref action, .. } if action == "downgrade_user"));
        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::FinalWarning);

        // subscription cancellation already happened; the replay must not repeat it
        f.users.set_fail_writes(false);
        f.engine
            .advance(&id, t0().add_days(14), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(f.subscriptions.cancellations().await, 1);
        assert_eq!(f.users.downgrades().await, 1);
        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::Canceled);
    }

    #[tokio::test]
    async fn advance_unknown_record_is_not_found() {
        let f = fixture().await;
        let missing = DunningRecordId::new();
        let err = f
            .engine
            .advance(&missing, t0(), AdvanceTrigger::Scheduled)
            .await
            .unwrap_err();
        assert_eq!(err, DunningError::NotFound(missing));
    }

    // ════════════════════════════════════════════════════════════════
    // cancel_now
    // ════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn cancel_now_jumps_to_canceled_with_reason() {
        let f = fixture().await;
        let id = open(&f).await;
        f.clock.advance_days(4);
        f.engine
            .advance(&id, f.clock.now(), AdvanceTrigger::Scheduled)
            .await
            .unwrap();

        let outcome = f.engine.cancel_now(&id, operator(), "customer request").await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Canceled {
                record_id: id,
                from: DunningStage::FirstReminder
            }
        );

        let trail = f.audit.list_for_record(&id).await.unwrap();
        let manual = trail
            .iter()
            .find(|e| e.action == AuditAction::ManualOverride)
            .unwrap();
        assert_eq!(manual.details["reason"], json!("customer request"));
        assert_eq!(manual.details["operation"], json!("cancel"));
        assert_eq!(f.subscriptions.cancellations().await, 1);
        // the forced action carries the cancellation notice
        assert_eq!(
            f.notifications.sent_stages().await.last(),
            Some(&DunningStage::Canceled)
        );
        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.reminder_count, 3);
    }

    #[tokio::test]
    async fn cancel_now_requires_reason() {
        let f = fixture().await;
        let id = open(&f).await;
        let err = f.engine.cancel_now(&id, operator(), "  ").await.unwrap_err();
        assert!(matches!(err, DunningError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn cancel_now_twice_applies_side_effects_once() {
        let f = fixture().await;
        let id = open(&f).await;
        f.engine.cancel_now(&id, operator(), "abuse").await.unwrap();
        let second = f.engine.cancel_now(&id, operator(), "abuse").await.unwrap();

        assert_eq!(second, AdvanceOutcome::AlreadyTerminal { record_id: id });
        assert_eq!(f.subscriptions.cancellations().await, 1);
        assert_eq!(f.users.downgrades().await, 1);
    }

    // ════════════════════════════════════════════════════════════════
    // on_payment_recovered
    // ════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn recovery_archives_and_restores_subscription() {
        let f = fixture().await;
        let id = open(&f).await;
        f.clock.advance_days(5);

        let evt = EventId::new("evt_paid").unwrap();
        let outcome = f.engine.on_payment_recovered(&sub(), &evt).await.unwrap();
        assert_eq!(outcome, PaymentRecoveredOutcome::Recovered { record_id: id });

        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert!(record.is_archived());
        assert_eq!(record.stage, DunningStage::PaymentFailed);
        assert_eq!(f.subscriptions.status(&sub()).await, Some(SubscriptionStatus::Active));

        let again = f.engine.on_payment_recovered(&sub(), &evt).await.unwrap();
        assert_eq!(again, PaymentRecoveredOutcome::Duplicate);

        let outcome = f
            .engine
            .advance(&id, t0().add_days(30), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(outcome, AdvanceOutcome::AlreadyTerminal { record_id: id });
    }

    #[tokio::test]
    async fn recovery_without_record_is_a_no_op() {
        let f = fixture().await;
        let outcome = f
            .engine
            .on_payment_recovered(&sub(), &EventId::new("evt_paid").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, PaymentRecoveredOutcome::NoActiveRecord);
        assert!(f.audit.entries().await.is_empty());
        assert_eq!(f.subscriptions.status(&sub()).await, None);
    }

    #[tokio::test]
    async fn interrupted_recovery_is_completed_on_redelivery() {
        let f = fixture().await;
        let id = open(&f).await;
        let evt = EventId::new("evt_paid").unwrap();

        f.subscriptions.set_fail_writes(true);
        assert!(f.engine.on_payment_recovered(&sub(), &evt).await.is_err());
        assert!(f.records.find_by_id(&id).await.unwrap().unwrap().is_archived());

        f.subscriptions.set_fail_writes(false);
        let outcome = f.engine.on_payment_recovered(&sub(), &evt).await.unwrap();
        assert_eq!(outcome, PaymentRecoveredOutcome::Recovered { record_id: id });
        assert_eq!(f.subscriptions.status(&sub()).await, Some(SubscriptionStatus::Active));
        assert_eq!(f.audit.count_action(AuditAction::PaymentRecovered).await, 1);
    }

    // ════════════════════════════════════════════════════════════════
    // Version conflicts
    // ════════════════════════════════════════════════════════════════

    /// Store wrapper that reports a conflict on the first N updates after
    /// letting a concurrent writer's change through.
    struct ConflictingStore {
        inner: Arc<InMemoryDunningRecordStore>,
        conflicts_left: AtomicU32,
        concurrent_stage: DunningStage,
    }

    #[async_trait]
    impl DunningRecordStore for ConflictingStore {
        async fn insert(&self, r: &DunningRecord) -> Result<InsertResult, DomainError> {
            self.inner.insert(r).await
        }
        async fn find_by_id(&self, id: &DunningRecordId) -> Result<Option<DunningRecord>, DomainError> {
            self.inner.find_by_id(id).await
        }
        async fn find_active_by_subscription(
            &self,
            s: &SubscriptionId,
        ) -> Result<Option<DunningRecord>, DomainError> {
            self.inner.find_active_by_subscription(s).await
        }
        async fn find_latest_by_subscription(
            &self,
            s: &SubscriptionId,
        ) -> Result<Option<DunningRecord>, DomainError> {
            self.inner.find_latest_by_subscription(s).await
        }
        async fn update(&self, r: &DunningRecord) -> Result<UpdateResult, DomainError> {
            if self.conflicts_left.load(Ordering::SeqCst) > 0 {
                self.conflicts_left.fetch_sub(1, Ordering::SeqCst);
                let mut concurrent = self.inner.find_by_id(&r.id).await?.unwrap();
                concurrent.stage = self.concurrent_stage;
                self.inner.update(&concurrent).await?;
                return Ok(UpdateResult::Conflict);
            }
            self.inner.update(r).await
        }
        async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<DunningRecord>, DomainError> {
            self.inner.find_due(now, limit).await
        }
        async fn list(
            &self,
            filter: crate::ports::ListFilter,
            page: crate::ports::Page,
        ) -> Result<crate::ports::RecordPage, DomainError> {
            self.inner.list(filter, page).await
        }
        async fn stats(&self) -> Result<crate::ports::DunningStats, DomainError> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn losing_a_race_to_the_same_stage_is_superseded_not_doubled() {
        let inner = Arc::new(InMemoryDunningRecordStore::new());
        let f = fixture_with_store(inner.clone()).await;
        let id = open(&f).await;

        let conflicting = Arc::new(ConflictingStore {
            inner: inner.clone(),
            conflicts_left: AtomicU32::new(1),
            concurrent_stage: DunningStage::FirstReminder,
        });
        let engine = DunningEngine::new(
            conflicting,
            f.audit.clone(),
            f.notifications.clone(),
            f.subscriptions.clone(),
            f.users.clone(),
            f.clock.clone(),
            StagePolicy::default(),
        );

        let outcome = engine
            .advance(&id, t0().add_days(3), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(outcome, AdvanceOutcome::Superseded { record_id: id });
        let record = inner.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::FirstReminder);
        assert_eq!(f.audit.count_action(AuditAction::ReminderSent).await, 0);
    }

    #[tokio::test]
    async fn conflict_on_unrelated_field_retries_and_succeeds() {
        let inner = Arc::new(InMemoryDunningRecordStore::new());
        let f = fixture_with_store(inner.clone()).await;
        let id = open(&f).await;

        let conflicting = Arc::new(ConflictingStore {
            inner: inner.clone(),
            conflicts_left: AtomicU32::new(1),
            concurrent_stage: DunningStage::PaymentFailed,
        });
        let engine = DunningEngine::new(
            conflicting,
            f.audit.clone(),
            f.notifications.clone(),
            f.subscriptions.clone(),
            f.users.clone(),
            f.clock.clone(),
            StagePolicy::default(),
        );

        let outcome = engine
            .advance(&id, t0().add_days(3), AdvanceTrigger::Scheduled)
            .await
            .unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Advanced { .. }));
        // notification is not re-sent for the retried write
        assert_eq!(f.notifications.sent().await.len(), 2);
        // insert, opening notice, concurrent write, retried advance
        assert_eq!(inner.find_by_id(&id).await.unwrap().unwrap().version, 4);
    }

    #[tokio::test]
    async fn lowest_role_is_applied_even_for_unknown_user() {
        let f = fixture().await;
        let mut cmd = failed("evt_x", "in_x");
        cmd.user_id = UserId::new("ghost").unwrap();
        let id = match f.engine.on_payment_failed(cmd).await.unwrap() {
            PaymentFailedOutcome::Opened { record_id } => record_id,
            other => panic!("unexpected {:?}", other),
        };
        f.engine.cancel_now(&id, operator(), "test").await.unwrap();
        let ghost = f.users.find(&UserId::new("ghost").unwrap()).await.unwrap().unwrap();
        assert_eq!(ghost.role, "free");
    }
}
