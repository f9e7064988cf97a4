//! ListAccountsHandler - Query handler for accounts in recovery.
//!
//! Reads straight from the record store; the engine is not involved.

use std::sync::Arc;

use crate::domain::dunning::{DunningError, DunningRecord, DunningStage};
use crate::domain::foundation::UserId;
use crate::ports::{DunningRecordStore, ListFilter, Page, UserDirectory};

/// Query for one page of dunning records.
#[derive(Debug, Clone, Default)]
pub struct ListAccountsQuery {
    /// Restrict to one stage (archived records included).
    pub stage: Option<DunningStage>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// A record joined with the user's display fields.
#[derive(Debug, Clone)]
pub struct AccountSummary {
    pub record: DunningRecord,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListAccountsResult {
    pub accounts: Vec<AccountSummary>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

pub struct ListAccountsHandler {
    records: Arc<dyn DunningRecordStore>,
    users: Arc<dyn UserDirectory>,
}

impl ListAccountsHandler {
    pub fn new(records: Arc<dyn DunningRecordStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { records, users }
    }

    pub async fn handle(&self, query: ListAccountsQuery) -> Result<ListAccountsResult, DunningError> {
        let page = Page::new(query.page, query.per_page);
        let result = self
            .records
            .list(ListFilter { stage: query.stage }, page)
            .await?;

        let mut user_ids: Vec<UserId> = result.records.iter().map(|r| r.user_id.clone()).collect();
        user_ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        user_ids.dedup();

        // display fields are optional; a directory outage should not hide the queue
        let profiles = match self.users.find_many(&user_ids).await {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::warn!(error = %e, "User lookup failed for account listing");
                Default::default()
            }
        };

        let accounts = result
            .records
            .into_iter()
            .map(|record| {
                let profile = profiles.get(&record.user_id);
                AccountSummary {
                    display_name: profile.and_then(|p| p.display_name.clone()),
                    email: profile.and_then(|p| p.email.clone()),
                    record,
                }
            })
            .collect();

        Ok(ListAccountsResult {
            accounts,
            total: result.total,
            page: page.page,
            per_page: page.per_page,
        })
    }
}
