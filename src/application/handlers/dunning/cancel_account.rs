//! CancelAccountHandler - Command handler for an operator-forced cancellation.

use std::sync::Arc;

use crate::application::dunning_engine::{AdvanceOutcome, DunningEngine};
use crate::domain::dunning::DunningError;
use crate::domain::foundation::{DunningRecordId, OperatorId};

#[derive(Debug, Clone)]
pub struct CancelAccountCommand {
    pub record_id: DunningRecordId,
    pub operator: OperatorId,
    /// Required; recorded on the manual override audit entry.
    pub reason: String,
}

pub type CancelAccountResult = AdvanceOutcome;

/// Cancels immediately through the engine's terminal path.
pub struct CancelAccountHandler {
    engine: Arc<DunningEngine>,
}

impl CancelAccountHandler {
    pub fn new(engine: Arc<DunningEngine>) -> Self {
        Self { engine }
    }

    pub async fn handle(&self, cmd: CancelAccountCommand) -> Result<CancelAccountResult, DunningError> {
        self.engine
            .cancel_now(&cmd.record_id, cmd.operator, cmd.reason)
            .await
    }
}
