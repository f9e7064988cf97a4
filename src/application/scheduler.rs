//! Scheduler - background service that advances overdue dunning records.
//!
//! Each run queries the record store for active records whose next stage is
//! due and drives them through [`DunningEngine::advance`]. A record that was
//! dormant past several stage boundaries is advanced repeatedly within the
//! same run, one stage per call, so every intermediate reminder is sent and
//! audited.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 1h | Time between runs |
//! | `batch_size` | 100 | Max due records examined per run |
//! | `batch_timeout` | 5m | Wall-clock budget per run |
//! | `concurrency` | 1 | Records processed in parallel |
//!
//! ## Graceful Shutdown
//!
//! On shutdown the scheduler moves to `Stopping`, lets the in-flight run
//! finish, then stops. A run never starts once shutdown was requested.
//!
//! The batch timeout is checked between engine calls, never around one, so
//! a transition that has started always writes its stage and audit entry.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::domain::dunning::{DunningRecord, DunningStage};
use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{Clock, DunningRecordStore};

use super::dunning_engine::{AdvanceOutcome, AdvanceTrigger, DunningEngine};

/// Upper bound on advances per record per run: one per remaining stage.
const MAX_STEPS_PER_RECORD: usize = DunningStage::ALL.len();

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub batch_size: u32,
    pub batch_timeout: Duration,
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            batch_size: 100,
            batch_timeout: Duration::from_secs(5 * 60),
            concurrency: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Lifecycle of the scheduler process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            3 => SchedulerState::Stopped,
            _ => SchedulerState::Idle,
        }
    }
}

/// Counts for one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Due records picked up.
    pub examined: usize,
    /// Non-terminal stage transitions.
    pub advanced: usize,
    pub canceled: usize,
    /// Records left alone because another writer got there first or they
    /// were no longer due.
    pub skipped: usize,
    pub errors: usize,
    /// Records not reached before the batch timeout. A record whose
    /// transition was already under way finishes it and is not counted.
    pub timed_out: usize,
}

impl RunSummary {
    fn merge(&mut self, other: RecordResult) {
        self.advanced += other.advanced;
        self.canceled += other.canceled;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.timed_out += other.timed_out;
    }
}

#[derive(Debug, Default)]
struct RecordResult {
    advanced: usize,
    canceled: usize,
    skipped: usize,
    errors: usize,
    timed_out: usize,
}

pub struct Scheduler {
    engine: Arc<DunningEngine>,
    records: Arc<dyn DunningRecordStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    state: AtomicU8,
}

impl Scheduler {
    pub fn new(
        engine: Arc<DunningEngine>,
        records: Arc<dyn DunningRecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(engine, records, clock, SchedulerConfig::default())
    }

    pub fn with_config(
        engine: Arc<DunningEngine>,
        records: Arc<dyn DunningRecordStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            records,
            clock,
            config,
            state: AtomicU8::new(SchedulerState::Idle as u8),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Runs until the shutdown signal flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Dunning scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => break,

                _ = interval.tick() => {
                    let run = self.run_once();
                    tokio::pin!(run);

                    // shutdown during a run drains it instead of dropping it
                    let result = tokio::select! {
                        result = &mut run => result,
                        _ = shutdown_requested(&mut shutdown) => {
                            self.set_state(SchedulerState::Stopping);
                            tracing::info!("Dunning scheduler stopping, draining in-flight run");
                            run.await
                        }
                    };

                    if let Err(e) = result {
                        tracing::error!(error = %e, "Dunning scheduler run failed");
                    }
                }
            }
        }

        if self.state() != SchedulerState::Stopping {
            self.set_state(SchedulerState::Stopping);
            tracing::info!("Dunning scheduler stopping");
        }
        self.set_state(SchedulerState::Stopped);
    }

    /// Runs exactly one batch. Errors only when the due query itself fails.
    pub async fn run_once(&self) -> Result<RunSummary, DomainError> {
        // a drain already marked Stopping keeps that state
        let _ = self.state.compare_exchange(
            SchedulerState::Idle as u8,
            SchedulerState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let result = self.process_batch().await;
        if self.state() == SchedulerState::Running {
            self.set_state(SchedulerState::Idle);
        }
        result
    }

    async fn process_batch(&self) -> Result<RunSummary, DomainError> {
        let started = Instant::now();
        let deadline = started + self.config.batch_timeout;
        let now = self.clock.now();

        let due = self.records.find_due(now, self.config.batch_size).await?;
        let mut summary = RunSummary {
            examined: due.len(),
            ..RunSummary::default()
        };

        let results: Vec<RecordResult> = stream::iter(due)
            .map(|record| self.process_record(record, now, deadline))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in results {
            summary.merge(result);
        }

        if summary.timed_out > 0 {
            tracing::warn!(
                timed_out = summary.timed_out,
                timeout_secs = self.config.batch_timeout.as_secs(),
                "Dunning scheduler batch timed out, remaining records deferred"
            );
        }

        tracing::info!(
            examined = summary.examined,
            advanced = summary.advanced,
            canceled = summary.canceled,
            skipped = summary.skipped,
            errors = summary.errors,
            timed_out = summary.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dunning scheduler run complete"
        );

        Ok(summary)
    }

    async fn process_record(
        &self,
        record: DunningRecord,
        now: Timestamp,
        deadline: Instant,
    ) -> RecordResult {
        let mut result = RecordResult::default();

        for _ in 0..MAX_STEPS_PER_RECORD {
            // checked between steps only; a started transition always completes
            if Instant::now() >= deadline {
                if result.advanced == 0 {
                    result.timed_out += 1;
                }
                return result;
            }

            match self.engine.advance(&record.id, now, AdvanceTrigger::Scheduled).await {
                Err(e) => {
                    tracing::warn!(
                        record_id = %record.id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to advance dunning record"
                    );
                    result.errors += 1;
                    return result;
                }
                Ok(AdvanceOutcome::Advanced { .. }) => {
                    result.advanced += 1;
                }
                Ok(AdvanceOutcome::Canceled { .. }) => {
                    result.canceled += 1;
                    return result;
                }
                Ok(_) => {
                    if result.advanced == 0 {
                        result.skipped += 1;
                    }
                    return result;
                }
            }
        }

        result
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryAuditLog, InMemoryDunningRecordStore, InMemorySubscriptionStore,
        InMemoryUserDirectory, RecordingNotificationGateway,
    };
    use crate::adapters::ManualClock;
    use crate::application::dunning_engine::{PaymentFailedCommand, PaymentFailedOutcome};
    use crate::domain::dunning::{AuditAction, AuditEntry, DunningMetadata, StagePolicy};
    use crate::domain::foundation::{DunningRecordId, EventId, Money, SubscriptionId, UserId};
    use crate::ports::{AppendResult, AuditLog};
    use async_trait::async_trait;

    struct Fixture {
        scheduler: Scheduler,
        engine: Arc<DunningEngine>,
        records: Arc<InMemoryDunningRecordStore>,
        audit: Arc<InMemoryAuditLog>,
        notifications: Arc<RecordingNotificationGateway>,
        subscriptions: Arc<InMemorySubscriptionStore>,
        clock: Arc<ManualClock>,
    }

    fn t0() -> Timestamp {
        Timestamp::from_unix_secs(1_704_067_200).unwrap()
    }

    /// Sleeps before writing a stage transition entry.
    struct SlowAuditLog {
        inner: Arc<InMemoryAuditLog>,
        delay: Duration,
    }

    #[async_trait]
    impl AuditLog for SlowAuditLog {
        async fn append(&self, entry: &AuditEntry) -> Result<AppendResult, DomainError> {
            if entry.action == AuditAction::ReminderSent {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.append(entry).await
        }
        async fn exists_for_event(&self, event_id: &EventId) -> Result<bool, DomainError> {
            self.inner.exists_for_event(event_id).await
        }
        async fn list_for_record(
            &self,
            record_id: &DunningRecordId,
        ) -> Result<Vec<AuditEntry>, DomainError> {
            self.inner.list_for_record(record_id).await
        }
    }

    fn fixture(config: SchedulerConfig) -> Fixture {
        fixture_with_audit_delay(config, Duration::ZERO)
    }

    fn fixture_with_audit_delay(config: SchedulerConfig, delay: Duration) -> Fixture {
        let records = Arc::new(InMemoryDunningRecordStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let notifications = Arc::new(RecordingNotificationGateway::new());
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = Arc::new(DunningEngine::new(
            records.clone(),
            Arc::new(SlowAuditLog {
                inner: audit.clone(),
                delay,
            }),
            notifications.clone(),
            subscriptions.clone(),
            Arc::new(InMemoryUserDirectory::new("free")),
            clock.clone(),
            StagePolicy::default(),
        ));
        let scheduler = Scheduler::with_config(engine.clone(), records.clone(), clock.clone(), config);
        Fixture {
            scheduler,
            engine,
            records,
            audit,
            notifications,
            subscriptions,
            clock,
        }
    }

    async fn open(f: &Fixture, sub: &str) -> DunningRecordId {
        let cmd = PaymentFailedCommand {
            event_id: EventId::new(format!("evt_{}", sub)).unwrap(),
            subscription_id: SubscriptionId::new(sub).unwrap(),
            user_id: UserId::new(format!("user_{}", sub)).unwrap(),
            amount_due: Money::new(1500, "EUR").unwrap(),
            gateway_invoice_ref: format!("in_{}", sub),
            metadata: DunningMetadata::default(),
        };
        match f.engine.on_payment_failed(cmd).await.unwrap() {
            PaymentFailedOutcome::Opened { record_id } => record_id,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_before_anything_is_due_does_nothing() {
        let f = fixture(SchedulerConfig::default());
        open(&f, "sub_1").await;
        f.clock.advance_days(1);

        let summary = f.scheduler.run_once().await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn due_record_moves_one_stage() {
        let f = fixture(SchedulerConfig::default());
        let id = open(&f, "sub_1").await;
        f.clock.advance_days(3);

        let summary = f.scheduler.run_once().await.unwrap();
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.advanced, 1);

        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::FirstReminder);
    }

    #[tokio::test]
    async fn dormant_record_walks_every_stage_in_one_run() {
        let f = fixture(SchedulerConfig::default());
        let id = open(&f, "sub_1").await;
        f.clock.advance_days(30);

        let summary = f.scheduler.run_once().await.unwrap();
        assert_eq!(summary.advanced, 3);
        assert_eq!(summary.canceled, 1);

        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::Canceled);
        assert_eq!(
            f.notifications.sent_stages().await,
            vec![
                DunningStage::PaymentFailed,
                DunningStage::FirstReminder,
                DunningStage::SecondReminder,
                DunningStage::FinalWarning,
                DunningStage::Canceled,
            ]
        );

        let again = f.scheduler.run_once().await.unwrap();
        assert_eq!(again.examined, 0);
    }

    #[tokio::test]
    async fn one_failing_record_does_not_abort_the_batch() {
        let f = fixture(SchedulerConfig::default());
        open(&f, "sub_a").await;
        open(&f, "sub_b").await;
        f.clock.advance_days(14);
        // both reach the terminal step; cancellation fails for everyone
        f.subscriptions.set_fail_writes(true);

        let summary = f.scheduler.run_once().await.unwrap();
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.advanced, 6);
        assert_eq!(summary.errors, 2);

        f.subscriptions.set_fail_writes(false);
        let summary = f.scheduler.run_once().await.unwrap();
        assert_eq!(summary.canceled, 2);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn batch_size_bounds_each_run() {
        let f = fixture(SchedulerConfig::default().with_batch_size(2));
        for i in 0..5 {
            open(&f, &format!("sub_{}", i)).await;
        }
        f.clock.advance_days(3);

        assert_eq!(f.scheduler.run_once().await.unwrap().advanced, 2);
        assert_eq!(f.scheduler.run_once().await.unwrap().advanced, 2);
        assert_eq!(f.scheduler.run_once().await.unwrap().advanced, 1);
        assert_eq!(f.scheduler.run_once().await.unwrap().examined, 0);
    }

    #[tokio::test]
    async fn concurrent_workers_process_everything_once() {
        let f = fixture(SchedulerConfig::default().with_concurrency(4));
        for i in 0..10 {
            open(&f, &format!("sub_{}", i)).await;
        }
        f.clock.advance_days(3);

        let summary = f.scheduler.run_once().await.unwrap();
        assert_eq!(summary.advanced, 10);
        // 10 opening notices plus 10 first reminders
        assert_eq!(f.notifications.sent().await.len(), 20);
    }

    #[tokio::test]
    async fn zero_timeout_defers_the_whole_batch() {
        let f = fixture(SchedulerConfig::default().with_batch_timeout(Duration::ZERO));
        let id = open(&f, "sub_1").await;
        f.clock.advance_days(3);

        let summary = f.scheduler.run_once().await.unwrap();
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.advanced, 0);
        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::PaymentFailed);
    }

    #[tokio::test]
    async fn timeout_never_cuts_a_transition_short() {
        let f = fixture_with_audit_delay(
            SchedulerConfig::default().with_batch_timeout(Duration::from_millis(100)),
            Duration::from_millis(300),
        );
        open(&f, "sub_1").await;
        open(&f, "sub_2").await;
        f.clock.advance_days(3);

        let summary = f.scheduler.run_once().await.unwrap();
        // the first record finishes past the deadline, the second is deferred
        assert_eq!(summary.advanced, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(f.audit.count_action(AuditAction::ReminderSent).await, 1);

        let mut first_reminders = 0;
        for sub in ["sub_1", "sub_2"] {
            let record = f
                .records
                .find_active_by_subscription(&SubscriptionId::new(sub).unwrap())
                .await
                .unwrap()
                .unwrap();
            if record.stage == DunningStage::FirstReminder {
                first_reminders += 1;
            }
        }
        assert_eq!(first_reminders, 1);

        let next = f.scheduler.run_once().await.unwrap();
        assert_eq!(next.advanced, 1);
        assert_eq!(f.audit.count_action(AuditAction::ReminderSent).await, 2);
    }

    #[tokio::test]
    async fn shutdown_during_a_run_is_observable_as_stopping() {
        let f = fixture_with_audit_delay(
            SchedulerConfig::default().with_interval(Duration::from_millis(10)),
            Duration::from_millis(300),
        );
        let id = open(&f, "sub_1").await;
        f.clock.advance_days(3);

        let scheduler = Arc::new(f.scheduler);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopping);

        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::FirstReminder);
        assert_eq!(f.audit.count_action(AuditAction::ReminderSent).await, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let f = fixture(SchedulerConfig::default().with_interval(Duration::from_millis(10)));
        let id = open(&f, "sub_1").await;
        f.clock.advance_days(3);

        let scheduler = Arc::new(f.scheduler);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        let record = f.records.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, DunningStage::FirstReminder);
    }

    #[test]
    fn config_defaults_are_reasonable() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.concurrency, 1);
        assert_eq!(SchedulerConfig::default().with_concurrency(0).concurrency, 1);
    }
}
