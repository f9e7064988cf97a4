//! RetryAccountHandler - Command handler for an operator-forced advance.

use std::sync::Arc;

use crate::application::dunning_engine::{AdvanceOutcome, AdvanceTrigger, DunningEngine};
use crate::domain::dunning::DunningError;
use crate::domain::foundation::{DunningRecordId, OperatorId};

#[derive(Debug, Clone)]
pub struct RetryAccountCommand {
    pub record_id: DunningRecordId,
    pub operator: OperatorId,
}

pub type RetryAccountResult = AdvanceOutcome;

/// Advances the record one stage now, ignoring its due date.
pub struct RetryAccountHandler {
    engine: Arc<DunningEngine>,
}

impl RetryAccountHandler {
    pub fn new(engine: Arc<DunningEngine>) -> Self {
        Self { engine }
    }

    pub async fn handle(&self, cmd: RetryAccountCommand) -> Result<RetryAccountResult, DunningError> {
        let now = self.engine.now();
        self.engine
            .advance(
                &cmd.record_id,
                now,
                AdvanceTrigger::Manual {
                    operator: cmd.operator,
                },
            )
            .await
    }
}
