//! GetDunningStatsHandler - Query handler for admin statistics.

use std::sync::Arc;

use crate::domain::dunning::DunningError;
use crate::ports::{DunningRecordStore, DunningStats};

/// Admin-only query for the recovery dashboard.
#[derive(Debug, Clone)]
pub struct GetDunningStatsQuery;

pub type GetDunningStatsResult = DunningStats;

pub struct GetDunningStatsHandler {
    records: Arc<dyn DunningRecordStore>,
}

impl GetDunningStatsHandler {
    pub fn new(records: Arc<dyn DunningRecordStore>) -> Self {
        Self { records }
    }

    pub async fn handle(
        &self,
        _query: GetDunningStatsQuery,
    ) -> Result<GetDunningStatsResult, DunningError> {
        self.records
            .stats()
            .await
            .map_err(|e| DunningError::infrastructure(e.to_string()))
    }
}
