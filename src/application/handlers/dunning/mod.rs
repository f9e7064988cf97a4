//! Dunning handlers.
//!
//! ## Commands
//! - Processing gateway webhooks
//! - Forcing a retry (one-stage advance)
//! - Forcing a cancellation
//!
//! ## Queries
//! - Listing accounts in recovery
//! - Inspecting one account with its audit trail
//! - Recovery statistics (admin)

mod cancel_account;
mod get_account;
mod get_dunning_stats;
mod handle_gateway_webhook;
mod list_accounts;
mod retry_account;

// Commands
pub use cancel_account::{CancelAccountCommand, CancelAccountHandler, CancelAccountResult};
pub use handle_gateway_webhook::{
    HandleGatewayWebhookCommand, HandleGatewayWebhookHandler, HandleGatewayWebhookResult,
};
pub use retry_account::{RetryAccountCommand, RetryAccountHandler, RetryAccountResult};

// Queries
pub use get_account::{AccountDetail, GetAccountHandler, GetAccountQuery, GetAccountResult};
pub use get_dunning_stats::{GetDunningStatsHandler, GetDunningStatsQuery, GetDunningStatsResult};
pub use list_accounts::{AccountSummary, ListAccountsHandler, ListAccountsQuery, ListAccountsResult};
