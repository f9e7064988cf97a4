//! Stage policy: pure scheduling rules for the recovery workflow.
//!
//! Every stage is due a fixed number of days after the record was created.
//! The policy only ever proposes the single next stage; a record that has
//! been dormant across several boundaries is walked through each of them
//! by repeated calls, so every reminder and audit entry is still produced.

use crate::domain::foundation::{Timestamp, ValidationError};
use serde::{Deserialize, Serialize};

use super::{DunningRecord, DunningStage};

/// Day offsets from the record's creation, one per stage after the first.
///
/// `PaymentFailed` is always day 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOffsets {
    pub first_reminder_days: i64,
    pub second_reminder_days: i64,
    pub final_warning_days: i64,
    pub cancel_days: i64,
}

impl Default for StageOffsets {
    fn default() -> Self {
        Self {
            first_reminder_days: 3,
            second_reminder_days: 7,
            final_warning_days: 12,
            cancel_days: 14,
        }
    }
}

impl StageOffsets {
    /// Validated constructor. Offsets must be non-negative and
    /// non-decreasing in stage order.
    pub fn new(
        first_reminder_days: i64,
        second_reminder_days: i64,
        final_warning_days: i64,
        cancel_days: i64,
    ) -> Result<Self, ValidationError> {
        let offsets = Self {
            first_reminder_days,
            second_reminder_days,
            final_warning_days,
            cancel_days,
        };
        offsets.validate()?;
        Ok(offsets)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let ordered = [
            ("first_reminder_days", self.first_reminder_days),
            ("second_reminder_days", self.second_reminder_days),
            ("final_warning_days", self.final_warning_days),
            ("cancel_days", self.cancel_days),
        ];
        let mut previous = 0;
        for (field, days) in ordered {
            if days < previous {
                return Err(ValidationError::out_of_range(field, previous, 3650, days));
            }
            previous = days;
        }
        if self.cancel_days > 3650 {
            return Err(ValidationError::out_of_range(
                "cancel_days",
                0,
                3650,
                self.cancel_days,
            ));
        }
        Ok(())
    }

    /// Days after creation at which `stage` becomes due.
    pub fn days_for(&self, stage: DunningStage) -> i64 {
        match stage {
            DunningStage::PaymentFailed => 0,
            DunningStage::FirstReminder => self.first_reminder_days,
            DunningStage::SecondReminder => self.second_reminder_days,
            DunningStage::FinalWarning => self.final_warning_days,
            DunningStage::Canceled => self.cancel_days,
        }
    }
}

/// What the engine should do next for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextAction {
    /// Stage the record would move to.
    pub stage: DunningStage,

    /// When that stage becomes due.
    pub due_at: Timestamp,

    /// Whether the user gets a notification for the stage.
    pub notify: bool,

    /// Whether reaching the stage cancels the subscription and downgrades the user.
    pub terminal: bool,

    /// `now >= due_at`.
    pub due: bool,
}

/// Maps (stage, created_at, now) to the next action. Stateless apart from
/// the offsets fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StagePolicy {
    offsets: StageOffsets,
}

impl StagePolicy {
    pub fn new(offsets: StageOffsets) -> Self {
        Self { offsets }
    }

    pub fn offsets(&self) -> &StageOffsets {
        &self.offsets
    }

    /// Due time of `stage` for a record created at `created_at`.
    pub fn due_at(&self, stage: DunningStage, created_at: Timestamp) -> Timestamp {
        created_at.add_days(self.offsets.days_for(stage))
    }

    /// Due time of the stage after `stage`, or `None` at the end of the workflow.
    pub fn next_due_at(&self, stage: DunningStage, created_at: Timestamp) -> Option<Timestamp> {
        stage.next().map(|next| self.due_at(next, created_at))
    }

    /// Computes the next action for a stage. `None` once the stage is terminal.
    pub fn next_action_for(
        &self,
        stage: DunningStage,
        created_at: Timestamp,
        now: Timestamp,
    ) -> Option<NextAction> {
        let target = stage.next()?;
        let due_at = self.due_at(target, created_at);
        Some(NextAction {
            stage: target,
            due_at,
            notify: true,
            terminal: target == DunningStage::Canceled,
            due: now >= due_at,
        })
    }

    /// Computes the next action for a record. Archived records have none.
    pub fn next_action(&self, record: &DunningRecord, now: Timestamp) -> Option<NextAction> {
        if record.is_archived() {
            return None;
        }
        self.next_action_for(record.stage, record.created_at, now)
    }

    /// The day-0 notice sent when a record is opened.
    pub fn open_action(&self, now: Timestamp) -> NextAction {
        NextAction {
            stage: DunningStage::PaymentFailed,
            due_at: now,
            notify: true,
            terminal: false,
            due: true,
        }
    }

    /// Forced cancellation, due immediately regardless of the schedule.
    pub fn cancel_now(&self, now: Timestamp) -> NextAction {
        NextAction {
            stage: DunningStage::Canceled,
            due_at: now,
            notify: true,
            terminal: true,
            due: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t0() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000).unwrap()
    }

    #[test]
    fn default_offsets_are_3_7_12_14() {
        let o = StageOffsets::default();
        assert_eq!(o.days_for(DunningStage::PaymentFailed), 0);
        assert_eq!(o.days_for(DunningStage::FirstReminder), 3);
        assert_eq!(o.days_for(DunningStage::SecondReminder), 7);
        assert_eq!(o.days_for(DunningStage::FinalWarning), 12);
        assert_eq!(o.days_for(DunningStage::Canceled), 14);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn decreasing_offsets_are_rejected() {
        assert!(StageOffsets::new(3, 2, 12, 14).is_err());
        assert!(StageOffsets::new(-1, 7, 12, 14).is_err());
        assert!(StageOffsets::new(3, 7, 12, 11).is_err());
    }

    #[test]
    fn equal_offsets_are_allowed() {
        assert!(StageOffsets::new(0, 0, 0, 0).is_ok());
        assert!(StageOffsets::new(3, 3, 12, 12).is_ok());
    }

    #[test]
    fn not_due_before_first_reminder_offset() {
        let policy = StagePolicy::default();
        let action = policy
            .next_action_for(DunningStage::PaymentFailed, t0(), t0().add_days(2))
            .unwrap();
        assert_eq!(action.stage, DunningStage::FirstReminder);
        assert_eq!(action.due_at, t0().add_days(3));
        assert!(!action.due);
        assert!(action.notify);
        assert!(!action.terminal);
    }

    #[test]
    fn due_exactly_at_offset() {
        let policy = StagePolicy::default();
        let action = policy
            .next_action_for(DunningStage::PaymentFailed, t0(), t0().add_days(3))
            .unwrap();
        assert!(action.due);
    }

    #[test]
    fn final_warning_leads_to_terminal_cancellation() {
        let policy = StagePolicy::default();
        let action = policy
            .next_action_for(DunningStage::FinalWarning, t0(), t0().add_days(14))
            .unwrap();
        assert_eq!(action.stage, DunningStage::Canceled);
        assert!(action.terminal);
        assert!(action.notify);
        assert!(action.due);
    }

    #[test]
    fn dormant_record_still_steps_one_stage() {
        let policy = StagePolicy::default();
        let action = policy
            .next_action_for(DunningStage::PaymentFailed, t0(), t0().add_days(30))
            .unwrap();
        assert_eq!(action.stage, DunningStage::FirstReminder);
    }

    #[test]
    fn canceled_has_no_next_action() {
        let policy = StagePolicy::default();
        assert!(policy
            .next_action_for(DunningStage::Canceled, t0(), t0().add_days(100))
            .is_none());
        assert!(policy.next_due_at(DunningStage::Canceled, t0()).is_none());
    }

    #[test]
    fn cancel_now_is_due_immediately() {
        let action = StagePolicy::default().cancel_now(t0());
        assert_eq!(action.stage, DunningStage::Canceled);
        assert!(action.due && action.terminal && action.notify);
    }

    #[test]
    fn open_action_is_the_day_zero_notice() {
        let action = StagePolicy::default().open_action(t0());
        assert_eq!(action.stage, DunningStage::PaymentFailed);
        assert_eq!(action.due_at, t0());
        assert!(action.notify && !action.terminal);
    }

    fn arb_offsets() -> impl Strategy<Value = StageOffsets> {
        (0i64..30, 0i64..30, 0i64..30, 0i64..30).prop_map(|(a, b, c, d)| {
            let mut v = [a, b, c, d];
            v.sort();
            StageOffsets {
                first_reminder_days: v[0],
                second_reminder_days: v[1],
                final_warning_days: v[2],
                cancel_days: v[3],
            }
        })
    }

    fn arb_stage() -> impl Strategy<Value = DunningStage> {
        (0usize..5).prop_map(|i| DunningStage::ALL[i])
    }

    proptest! {
        #[test]
        fn due_dates_never_decrease(offsets in arb_offsets()) {
            let policy = StagePolicy::new(offsets);
            prop_assert!(offsets.validate().is_ok());
            for pair in DunningStage::ALL.windows(2) {
                prop_assert!(policy.due_at(pair[0], t0()) <= policy.due_at(pair[1], t0()));
            }
        }

        #[test]
        fn next_action_is_always_exactly_one_step(
            offsets in arb_offsets(),
            stage in arb_stage(),
            elapsed_hours in 0i64..(24 * 60),
        ) {
            let policy = StagePolicy::new(offsets);
            let now = t0().add_hours(elapsed_hours);
            match policy.next_action_for(stage, t0(), now) {
                Some(action) => {
                    prop_assert_eq!(action.stage.index(), stage.index() + 1);
                    prop_assert_eq!(action.terminal, action.stage == DunningStage::Canceled);
                    prop_assert_eq!(action.due, now >= action.due_at);
                }
                None => prop_assert_eq!(stage, DunningStage::Canceled),
            }
        }

        #[test]
        fn repeated_steps_reach_the_due_stage_in_order(
            offsets in arb_offsets(),
            elapsed_days in 0i64..60,
        ) {
            let policy = StagePolicy::new(offsets);
            let now = t0().add_days(elapsed_days);
            let mut stage = DunningStage::PaymentFailed;
            let mut visited = vec![stage];
            while let Some(action) = policy.next_action_for(stage, t0(), now) {
                if !action.due {
                    break;
                }
                stage = action.stage;
                visited.push(stage);
            }
            for (i, s) in visited.iter().enumerate() {
                prop_assert_eq!(s.index(), i);
            }
            prop_assert_eq!(stage == DunningStage::Canceled, elapsed_days >= offsets.cancel_days);
        }
    }
}
