//! Persistence ports.
//!
//! Each entity family gets an async store trait with domain-aligned finders.
//! Adapters own the entity ↔ row mapping ([`rows`]); the in-memory adapter
//! ([`memory`]) backs single-process deployments and is the substrate the
//! test suites run on. `save` is an upsert: insert when the id is unknown,
//! field-level update otherwise. Ids and ownership-chain foreign keys are
//! never overwritten by an update.

pub mod memory;
pub mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
	Account, AccountType, BalanceSnapshot, Holding, ProviderConnection, SnapshotSource,
	Transaction, TransactionType,
};

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("row cannot be decoded: {0}")]
	Corrupt(String),
	#[error("conflict: {0}")]
	Conflict(String),
	#[error("storage backend error: {0}")]
	Backend(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionStore: Send + Sync {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<ProviderConnection>, StoreError>;

	async fn find_by_user_id(&self, user_id: Uuid)
		-> Result<Vec<ProviderConnection>, StoreError>;

	async fn find_by_user_and_provider(
		&self,
		user_id: Uuid,
		provider_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError>;

	async fn find_active_by_user(
		&self,
		user_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError>;

	/// Active connections whose credentials expire within `within` of `now`.
	/// Feeds proactive token refresh.
	async fn find_expiring_soon(
		&self,
		now: DateTime<Utc>,
		within: Duration,
	) -> Result<Vec<ProviderConnection>, StoreError>;

	async fn save(&self, connection: &ProviderConnection) -> Result<(), StoreError>;

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

	async fn find_by_connection_id(
		&self,
		connection_id: Uuid,
		active_only: bool,
	) -> Result<Vec<Account>, StoreError>;

	/// All of a user's accounts, joined through the connection chain.
	async fn find_by_user_id(
		&self,
		user_id: Uuid,
		active_only: bool,
		account_type: Option<AccountType>,
	) -> Result<Vec<Account>, StoreError>;

	async fn find_by_provider_account_id(
		&self,
		connection_id: Uuid,
		provider_account_id: &str,
	) -> Result<Option<Account>, StoreError>;

	async fn find_needing_sync(
		&self,
		now: DateTime<Utc>,
		threshold: Duration,
	) -> Result<Vec<Account>, StoreError>;

	async fn save(&self, account: &Account) -> Result<(), StoreError>;

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransactionStore: Send + Sync {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;

	/// Ordered by transaction date, most recent first.
	async fn find_by_account_id(
		&self,
		account_id: Uuid,
		limit: usize,
		offset: usize,
	) -> Result<Vec<Transaction>, StoreError>;

	async fn find_by_account_and_type(
		&self,
		account_id: Uuid,
		transaction_type: TransactionType,
		limit: usize,
		offset: usize,
	) -> Result<Vec<Transaction>, StoreError>;

	/// Ordered by transaction date ascending.
	async fn find_by_date_range(
		&self,
		account_id: Uuid,
		start: NaiveDate,
		end: NaiveDate,
	) -> Result<Vec<Transaction>, StoreError>;

	async fn find_by_provider_transaction_id(
		&self,
		account_id: Uuid,
		provider_transaction_id: &str,
	) -> Result<Option<Transaction>, StoreError>;

	async fn find_security_transactions(
		&self,
		account_id: Uuid,
		symbol: &str,
		limit: usize,
	) -> Result<Vec<Transaction>, StoreError>;

	async fn save(&self, transaction: &Transaction) -> Result<(), StoreError>;

	async fn save_many(&self, transactions: &[Transaction]) -> Result<(), StoreError>;

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait HoldingStore: Send + Sync {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<Holding>, StoreError>;

	async fn find_by_account_and_symbol(
		&self,
		account_id: Uuid,
		symbol: &str,
	) -> Result<Option<Holding>, StoreError>;

	async fn find_by_provider_holding_id(
		&self,
		account_id: Uuid,
		provider_holding_id: &str,
	) -> Result<Option<Holding>, StoreError>;

	async fn list_by_account(
		&self,
		account_id: Uuid,
		active_only: bool,
	) -> Result<Vec<Holding>, StoreError>;

	async fn list_by_user(
		&self,
		user_id: Uuid,
		active_only: bool,
	) -> Result<Vec<Holding>, StoreError>;

	async fn save(&self, holding: &Holding) -> Result<(), StoreError>;

	async fn save_many(&self, holdings: &[Holding]) -> Result<(), StoreError>;

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

	/// Remove every holding of an account, returning the count removed.
	async fn delete_by_account(&self, account_id: Uuid) -> Result<usize, StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<BalanceSnapshot>, StoreError>;

	/// Ordered by capture time, most recent first.
	async fn find_by_account_id(
		&self,
		account_id: Uuid,
		source: Option<SnapshotSource>,
		limit: Option<usize>,
	) -> Result<Vec<BalanceSnapshot>, StoreError>;

	/// Ordered by capture time ascending.
	async fn find_by_account_id_in_range(
		&self,
		account_id: Uuid,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		source: Option<SnapshotSource>,
	) -> Result<Vec<BalanceSnapshot>, StoreError>;

	async fn find_latest_by_account_id(
		&self,
		account_id: Uuid,
	) -> Result<Option<BalanceSnapshot>, StoreError>;

	/// Snapshots across all of a user's accounts, ascending by capture time.
	async fn find_by_user_id_in_range(
		&self,
		user_id: Uuid,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		source: Option<SnapshotSource>,
	) -> Result<Vec<BalanceSnapshot>, StoreError>;

	/// The most recent snapshot of each of the user's accounts.
	async fn find_latest_by_user_id(
		&self,
		user_id: Uuid,
	) -> Result<Vec<BalanceSnapshot>, StoreError>;

	/// Snapshots are immutable: `save` is insert-only and a duplicate id is a
	/// conflict.
	async fn save(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError>;

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

	async fn count_by_account_id(&self, account_id: Uuid) -> Result<usize, StoreError>;
}
