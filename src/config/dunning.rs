//! Dunning workflow configuration

use serde::Deserialize;

use crate::domain::dunning::{StageOffsets, StagePolicy};

use super::error::ValidationError;

/// Stage offsets in days after the first failure, and the role a canceled
/// user is downgraded to.
#[derive(Debug, Clone, Deserialize)]
pub struct DunningConfig {
    #[serde(default = "default_first_reminder")]
    pub first_reminder_days: i64,

    #[serde(default = "default_second_reminder")]
    pub second_reminder_days: i64,

    #[serde(default = "default_final_warning")]
    pub final_warning_days: i64,

    #[serde(default = "default_cancel")]
    pub cancel_days: i64,

    #[serde(default = "default_lowest_role")]
    pub lowest_role: String,
}

impl DunningConfig {
    pub fn offsets(&self) -> Result<StageOffsets, ValidationError> {
        StageOffsets::new(
            self.first_reminder_days,
            self.second_reminder_days,
            self.final_warning_days,
            self.cancel_days,
        )
        .map_err(|e| ValidationError::InvalidStageOffsets(e.to_string()))
    }

    pub fn policy(&self) -> Result<StagePolicy, ValidationError> {
        Ok(StagePolicy::new(self.offsets()?))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.offsets()?;
        if self.lowest_role.trim().is_empty() {
            return Err(ValidationError::MissingRequired("DUNNING__LOWEST_ROLE"));
        }
        Ok(())
    }
}

impl Default for DunningConfig {
    fn default() -> Self {
        Self {
            first_reminder_days: default_first_reminder(),
            second_reminder_days: default_second_reminder(),
            final_warning_days: default_final_warning(),
            cancel_days: default_cancel(),
            lowest_role: default_lowest_role(),
        }
    }
}

fn default_first_reminder() -> i64 {
    3
}

fn default_second_reminder() -> i64 {
    7
}

fn default_final_warning() -> i64 {
    12
}

fn default_cancel() -> i64 {
    14
}

fn default_lowest_role() -> String {
    "free".to_string()
}
