//! Dunning stage state machine.
//!
//! The recovery workflow is a single linear sequence. A record moves one
//! stage forward at a time, or jumps straight to `Canceled` when an
//! operator forces cancellation.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stage of a subscription in the recovery workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunningStage {
    /// The payment just failed; the first notice goes out immediately.
    PaymentFailed,

    FirstReminder,

    SecondReminder,

    /// Last notice before the subscription is canceled.
    FinalWarning,

    /// Subscription canceled and user downgraded. Terminal.
    Canceled,
}

impl DunningStage {
    /// All stages in workflow order.
    pub const ALL: [DunningStage; 5] = [
        DunningStage::PaymentFailed,
        DunningStage::FirstReminder,
        DunningStage::SecondReminder,
        DunningStage::FinalWarning,
        DunningStage::Canceled,
    ];

    /// Position of this stage in the sequence, starting at 0.
    pub fn index(&self) -> usize {
        match self {
            DunningStage::PaymentFailed => 0,
            DunningStage::FirstReminder => 1,
            DunningStage::SecondReminder => 2,
            DunningStage::FinalWarning => 3,
            DunningStage::Canceled => 4,
        }
    }

    /// The stage that follows this one, or `None` for `Canceled`.
    pub fn next(&self) -> Option<DunningStage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Storage and API representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DunningStage::PaymentFailed => "payment_failed",
            DunningStage::FirstReminder => "first_reminder",
            DunningStage::SecondReminder => "second_reminder",
            DunningStage::FinalWarning => "final_warning",
            DunningStage::Canceled => "canceled",
        }
    }
}

impl fmt::Display for DunningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DunningStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_failed" => Ok(DunningStage::PaymentFailed),
            "first_reminder" => Ok(DunningStage::FirstReminder),
            "second_reminder" => Ok(DunningStage::SecondReminder),
            "final_warning" => Ok(DunningStage::FinalWarning),
            "canceled" => Ok(DunningStage::Canceled),
            other => Err(format!("unknown dunning stage: {}", other)),
        }
    }
}

impl StateMachine for DunningStage {
    fn can_transition_to(&self, target: &Self) -> bool {
        if *self == DunningStage::Canceled {
            return false;
        }
        // one step forward, or forced cancellation from anywhere
        self.next() == Some(*target) || *target == DunningStage::Canceled
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use DunningStage::*;
        match self {
            PaymentFailed => vec![FirstReminder, Canceled],
            FirstReminder => vec![SecondReminder, Canceled],
            SecondReminder => vec![FinalWarning, Canceled],
            FinalWarning => vec![Canceled],
            Canceled => vec![],
        }
    }
}
