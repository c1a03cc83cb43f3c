//! Command side: the write-path handlers.
//!
//! Every handler follows the same protocol: publish `Attempted`, validate,
//! verify ownership, check preconditions, do the work, then publish exactly
//! one of `Succeeded`/`Failed` before returning. Business failures are
//! returned as typed errors, never panics; storage failures inside the
//! guarded persistence region translate to the handler's database error.
//!
//! Per-record failures inside a sync loop are isolated: they increment the
//! outcome's `errors` counter and the loop continues with the next record.

pub mod connect;
pub mod disconnect;
pub mod import_file;
pub mod normalize;
pub mod refresh_tokens;
pub mod sync_accounts;
pub mod sync_holdings;
pub mod sync_transactions;

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use crate::domain::{Currency, ProviderCredentials};

pub use connect::{ConnectProviderError, ConnectProviderHandler};
pub use disconnect::{DisconnectProviderError, DisconnectProviderHandler};
pub use import_file::{ImportFromFileError, ImportFromFileHandler};
pub use refresh_tokens::{RefreshProviderTokensError, RefreshProviderTokensHandler};
pub use sync_accounts::{SyncAccountsError, SyncAccountsHandler};
pub use sync_holdings::{SyncHoldingsError, SyncHoldingsHandler};
pub use sync_transactions::{SyncTransactionsError, SyncTransactionsHandler};

// ---------------------------------------------------------------------------
// Commands (immutable inputs)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectProvider {
	pub user_id: Uuid,
	pub provider_id: Uuid,
	pub provider_slug: String,
	/// Already sealed by the cipher; `None` means the caller never obtained
	/// credentials and the command must fail validation.
	pub credentials: Option<ProviderCredentials>,
	pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DisconnectProvider {
	pub user_id: Uuid,
	pub connection_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct RefreshProviderTokens {
	pub user_id: Uuid,
	pub connection_id: Uuid,
	pub credentials: ProviderCredentials,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncAccounts {
	pub user_id: Uuid,
	pub connection_id: Uuid,
	pub force: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncHoldings {
	pub user_id: Uuid,
	pub account_id: Uuid,
	pub force: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncTransactions {
	pub user_id: Uuid,
	pub connection_id: Uuid,
	pub account_id: Option<Uuid>,
	pub start_date: Option<NaiveDate>,
	pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct ImportFromFile {
	pub user_id: Uuid,
	pub provider_slug: String,
	pub file_name: String,
	pub file_format: String,
	pub file_content: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Policies (engine-level, from settings)
// ---------------------------------------------------------------------------

/// Sync pacing. The minimum interval is an engine policy, not a provider
/// limit: it protects providers from hammering regardless of their own
/// quotas. `force` bypasses it.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
	pub min_sync_interval: Duration,
	pub default_sync_window: Duration,
}

impl Default for SyncPolicy {
	fn default() -> Self {
		Self { min_sync_interval: Duration::minutes(5), default_sync_window: Duration::days(30) }
	}
}

/// File-import progress cadence: emit after every `record_interval` records
/// or whenever progress advanced by `percent_interval` points, whichever
/// comes first. The terminal record is reported by `Succeeded` alone.
#[derive(Debug, Clone, Copy)]
pub struct ProgressPolicy {
	pub record_interval: usize,
	pub percent_interval: u8,
}

impl Default for ProgressPolicy {
	fn default() -> Self {
		Self { record_interval: 100, percent_interval: 5 }
	}
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
	pub account_id: Uuid,
	pub previous: BigDecimal,
	pub current: BigDecimal,
	pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncAccountsOutcome {
	pub created: usize,
	pub updated: usize,
	pub unchanged: usize,
	pub errors: usize,
	pub message: String,
	pub balance_changes: Vec<BalanceChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncHoldingsOutcome {
	pub created: usize,
	pub updated: usize,
	pub unchanged: usize,
	pub deactivated: usize,
	pub errors: usize,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncTransactionsOutcome {
	pub created: usize,
	pub updated: usize,
	pub unchanged: usize,
	pub errors: usize,
	pub accounts_synced: usize,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
	pub connection_id: Uuid,
	pub accounts_created: usize,
	pub accounts_updated: usize,
	pub transactions_created: usize,
	pub transactions_skipped: usize,
	pub message: String,
}
