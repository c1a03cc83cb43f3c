//! In-memory store adapter.
//!
//! Keeps row representations in `RwLock`-guarded maps, so the entity ↔ row
//! mapping in [`rows`](super::rows) is exercised on every read and write
//! exactly as a relational adapter would. Used as the test substrate and for
//! single-process deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use itertools::Itertools;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
	rows::{AccountRow, ConnectionRow, HoldingRow, SnapshotRow, TransactionRow},
	AccountStore, ConnectionStore, HoldingStore, SnapshotStore, StoreError, TransactionStore,
};
use crate::domain::{
	Account, AccountType, BalanceSnapshot, Holding, ProviderConnection, SnapshotSource,
	Transaction, TransactionType,
};

#[derive(Default)]
pub struct MemoryStore {
	connections: RwLock<BTreeMap<Uuid, ConnectionRow>>,
	accounts: RwLock<BTreeMap<Uuid, AccountRow>>,
	transactions: RwLock<BTreeMap<Uuid, TransactionRow>>,
	holdings: RwLock<BTreeMap<Uuid, HoldingRow>>,
	snapshots: RwLock<BTreeMap<Uuid, SnapshotRow>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	async fn connection_user(&self, connection_id: Uuid) -> Option<Uuid> {
		self.connections.read().await.get(&connection_id).map(|row| row.user_id)
	}

	async fn account_ids_of_user(&self, user_id: Uuid) -> Vec<Uuid> {
		let connections = self.connections.read().await;
		self.accounts
			.read()
			.await
			.values()
			.filter(|account| {
				connections
					.get(&account.connection_id)
					.is_some_and(|connection| connection.user_id == user_id)
			})
			.map(|account| account.id)
			.collect()
	}
}

#[async_trait]
impl ConnectionStore for MemoryStore {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<ProviderConnection>, StoreError> {
		self.connections.read().await.get(&id).cloned().map(TryInto::try_into).transpose()
	}

	async fn find_by_user_id(
		&self,
		user_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		self.connections
			.read()
			.await
			.values()
			.filter(|row| row.user_id == user_id)
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_by_user_and_provider(
		&self,
		user_id: Uuid,
		provider_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		self.connections
			.read()
			.await
			.values()
			.filter(|row| row.user_id == user_id && row.provider_id == provider_id)
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_active_by_user(
		&self,
		user_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		self.connections
			.read()
			.await
			.values()
			.filter(|row| row.user_id == user_id && row.status == "active")
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_expiring_soon(
		&self,
		now: DateTime<Utc>,
		within: Duration,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		let horizon = now + within;
		self.connections
			.read()
			.await
			.values()
			.filter(|row| {
				row.status == "active" &&
					row.credentials_expires_at
						.is_some_and(|expires_at| expires_at <= horizon)
			})
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn save(&self, connection: &ProviderConnection) -> Result<(), StoreError> {
		let mut row = ConnectionRow::from(connection);
		let mut connections = self.connections.write().await;
		if let Some(existing) = connections.get(&row.id) {
			// Identity and ownership columns are immutable once written.
			row.user_id = existing.user_id;
			row.provider_id = existing.provider_id;
			row.created_at = existing.created_at;
		}
		connections.insert(row.id, row);
		Ok(())
	}

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
		Ok(self.connections.write().await.remove(&id).is_some())
	}
}

#[async_trait]
impl AccountStore for MemoryStore {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
		self.accounts.read().await.get(&id).cloned().map(TryInto::try_into).transpose()
	}

	async fn find_by_connection_id(
		&self,
		connection_id: Uuid,
		active_only: bool,
	) -> Result<Vec<Account>, StoreError> {
		self.accounts
			.read()
			.await
			.values()
			.filter(|row| row.connection_id == connection_id && (!active_only || row.is_active))
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_by_user_id(
		&self,
		user_id: Uuid,
		active_only: bool,
		account_type: Option<AccountType>,
	) -> Result<Vec<Account>, StoreError> {
		let user_accounts = self.account_ids_of_user(user_id).await;
		self.accounts
			.read()
			.await
			.values()
			.filter(|row| user_accounts.contains(&row.id))
			.filter(|row| !active_only || row.is_active)
			.filter(|row| {
				account_type.is_none_or(|wanted| row.account_type == wanted.as_str())
			})
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_by_provider_account_id(
		&self,
		connection_id: Uuid,
		provider_account_id: &str,
	) -> Result<Option<Account>, StoreError> {
		self.accounts
			.read()
			.await
			.values()
			.find(|row| {
				row.connection_id == connection_id &&
					row.provider_account_id == provider_account_id
			})
			.cloned()
			.map(TryInto::try_into)
			.transpose()
	}

	async fn find_needing_sync(
		&self,
		now: DateTime<Utc>,
		threshold: Duration,
	) -> Result<Vec<Account>, StoreError> {
		self.accounts
			.read()
			.await
			.values()
			.filter(|row| {
				row.is_active &&
					row.last_synced_at.is_none_or(|last| now - last > threshold)
			})
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn save(&self, account: &Account) -> Result<(), StoreError> {
		let mut row = AccountRow::from(account);
		let mut accounts = self.accounts.write().await;
		if let Some(existing) = accounts.get(&row.id) {
			row.connection_id = existing.connection_id;
			row.created_at = existing.created_at;
		}
		accounts.insert(row.id, row);
		Ok(())
	}

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
		Ok(self.accounts.write().await.remove(&id).is_some())
	}
}

#[async_trait]
impl TransactionStore for MemoryStore {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
		self.transactions.read().await.get(&id).cloned().map(TryInto::try_into).transpose()
	}

	async fn find_by_account_id(
		&self,
		account_id: Uuid,
		limit: usize,
		offset: usize,
	) -> Result<Vec<Transaction>, StoreError> {
		self.transactions
			.read()
			.await
			.values()
			.filter(|row| row.account_id == account_id)
			.cloned()
			.sorted_by(|a, b| (b.transaction_date, b.id).cmp(&(a.transaction_date, a.id)))
			.skip(offset)
			.take(limit)
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_by_account_and_type(
		&self,
		account_id: Uuid,
		transaction_type: TransactionType,
		limit: usize,
		offset: usize,
	) -> Result<Vec<Transaction>, StoreError> {
		self.transactions
			.read()
			.await
			.values()
			.filter(|row| {
				row.account_id == account_id &&
					row.transaction_type == transaction_type.as_str()
			})
			.cloned()
			.sorted_by(|a, b| (b.transaction_date, b.id).cmp(&(a.transaction_date, a.id)))
			.skip(offset)
			.take(limit)
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_by_date_range(
		&self,
		account_id: Uuid,
		start: NaiveDate,
		end: NaiveDate,
	) -> Result<Vec<Transaction>, StoreError> {
		self.transactions
			.read()
			.await
			.values()
			.filter(|row| {
				row.account_id == account_id &&
					row.transaction_date >= start && row.transaction_date <= end
			})
			.cloned()
			.sorted_by(|a, b| (a.transaction_date, a.id).cmp(&(b.transaction_date, b.id)))
			.map(TryInto::try_into)
			.collect()
	}

	async fn find_by_provider_transaction_id(
		&self,
		account_id: Uuid,
		provider_transaction_id: &str,
	) -> Result<Option<Transaction>, StoreError> {
		self.transactions
			.read()
			.await
			.values()
			.find(|row| {
				row.account_id == account_id &&
					row.provider_transaction_id == provider_transaction_id
			})
			.cloned()
			.map(TryInto::try_into)
			.transpose()
	}

	async fn find_security_transactions(
		&self,
		account_id: Uuid,
		symbol: &str,
		limit: usize,
	) -> Result<Vec<Transaction>, StoreError> {
		self.transactions
			.read()
			.await
			.values()
			.filter(|row| row.account_id == account_id && row.symbol.as_deref() == Some(symbol))
			.cloned()
			.sorted_by(|a, b| (b.transaction_date, b.id).cmp(&(a.transaction_date, a.id)))
			.take(limit)
			.map(TryInto::try_into)
			.collect()
	}

	async fn save(&self, transaction: &Transaction) -> Result<(), StoreError> {
		let mut row = TransactionRow::from(transaction);
		let mut transactions = self.transactions.write().await;
		if let Some(existing) = transactions.get(&row.id) {
			row.account_id = existing.account_id;
			row.created_at = existing.created_at;
		}
		transactions.insert(row.id, row);
		Ok(())
	}

	async fn save_many(&self, batch: &[Transaction]) -> Result<(), StoreError> {
		let mut transactions = self.transactions.write().await;
		for transaction in batch {
			let mut row = TransactionRow::from(transaction);
			if let Some(existing) = transactions.get(&row.id) {
				row.account_id = existing.account_id;
				row.created_at = existing.created_at;
			}
			transactions.insert(row.id, row);
		}
		Ok(())
	}

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
		Ok(self.transactions.write().await.remove(&id).is_some())
	}
}

#[async_trait]
impl HoldingStore for MemoryStore {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<Holding>, StoreError> {
		self.holdings.read().await.get(&id).cloned().map(TryInto::try_into).transpose()
	}

	async fn find_by_account_and_symbol(
		&self,
		account_id: Uuid,
		symbol: &str,
	) -> Result<Option<Holding>, StoreError> {
		self.holdings
			.read()
			.await
			.values()
			.find(|row| row.account_id == account_id && row.symbol == symbol)
			.cloned()
			.map(TryInto::try_into)
			.transpose()
	}

	async fn find_by_provider_holding_id(
		&self,
		account_id: Uuid,
		provider_holding_id: &str,
	) -> Result<Option<Holding>, StoreError> {
		self.holdings
			.read()
			.await
			.values()
			.find(|row| {
				row.account_id == account_id && row.provider_holding_id == provider_holding_id
			})
			.cloned()
			.map(TryInto::try_into)
			.transpose()
	}

	async fn list_by_account(
		&self,
		account_id: Uuid,
		active_only: bool,
	) -> Result<Vec<Holding>, StoreError> {
		self.holdings
			.read()
			.await
			.values()
			.filter(|row| row.account_id == account_id && (!active_only || row.is_active))
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn list_by_user(
		&self,
		user_id: Uuid,
		active_only: bool,
	) -> Result<Vec<Holding>, StoreError> {
		let user_accounts = self.account_ids_of_user(user_id).await;
		self.holdings
			.read()
			.await
			.values()
			.filter(|row| user_accounts.contains(&row.account_id))
			.filter(|row| !active_only || row.is_active)
			.cloned()
			.map(TryInto::try_into)
			.collect()
	}

	async fn save(&self, holding: &Holding) -> Result<(), StoreError> {
		let mut row = HoldingRow::from(holding);
		let mut holdings = self.holdings.write().await;
		if let Some(existing) = holdings.get(&row.id) {
			row.account_id = existing.account_id;
			row.created_at = existing.created_at;
		}
		holdings.insert(row.id, row);
		Ok(())
	}

	async fn save_many(&self, batch: &[Holding]) -> Result<(), StoreError> {
		let mut holdings = self.holdings.write().await;
		for holding in batch {
			let mut row = HoldingRow::from(holding);
			if let Some(existing) = holdings.get(&row.id) {
				row.account_id = existing.account_id;
				row.created_at = existing.created_at;
			}
			holdings.insert(row.id, row);
		}
		Ok(())
	}

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
		Ok(self.holdings.write().await.remove(&id).is_some())
	}

	async fn delete_by_account(&self, account_id: Uuid) -> Result<usize, StoreError> {
		let mut holdings = self.holdings.write().await;
		let doomed: Vec<Uuid> = holdings
			.values()
			.filter(|row| row.account_id == account_id)
			.map(|row| row.id)
			.collect();
		for id in &doomed {
			holdings.remove(id);
		}
		Ok(doomed.len())
	}
}

#[async_trait]
impl SnapshotStore for MemoryStore {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<BalanceSnapshot>, StoreError> {
		self.snapshots.read().await.get(&id).cloned().map(TryInto::try_into).transpose()
	}

	async fn find_by_account_id(
		&self,
		account_id: Uuid,
		source: Option<SnapshotSource>,
		limit: Option<usize>,
	) -> Result<Vec<BalanceSnapshot>, StoreError> {
		let mut rows: Vec<SnapshotRow> = self
			.snapshots
			.read()
			.await
			.values()
			.filter(|row| row.account_id == account_id)
			.filter(|row| source.is_none_or(|wanted| row.source == wanted.as_str()))
			.cloned()
			.collect();
		rows.sort_by(|a, b| (b.captured_at, b.id).cmp(&(a.captured_at, a.id)));
		if let Some(limit) = limit {
			rows.truncate(limit);
		}
		rows.into_iter().map(TryInto::try_into).collect()
	}

	async fn find_by_account_id_in_range(
		&self,
		account_id: Uuid,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		source: Option<SnapshotSource>,
	) -> Result<Vec<BalanceSnapshot>, StoreError> {
		let mut rows: Vec<SnapshotRow> = self
			.snapshots
			.read()
			.await
			.values()
			.filter(|row| {
				row.account_id == account_id &&
					row.captured_at >= start && row.captured_at <= end
			})
			.filter(|row| source.is_none_or(|wanted| row.source == wanted.as_str()))
			.cloned()
			.collect();
		rows.sort_by(|a, b| (a.captured_at, a.id).cmp(&(b.captured_at, b.id)));
		rows.into_iter().map(TryInto::try_into).collect()
	}

	async fn find_latest_by_account_id(
		&self,
		account_id: Uuid,
	) -> Result<Option<BalanceSnapshot>, StoreError> {
		self.snapshots
			.read()
			.await
			.values()
			.filter(|row| row.account_id == account_id)
			.max_by_key(|row| (row.captured_at, row.id))
			.cloned()
			.map(TryInto::try_into)
			.transpose()
	}

	async fn find_by_user_id_in_range(
		&self,
		user_id: Uuid,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		source: Option<SnapshotSource>,
	) -> Result<Vec<BalanceSnapshot>, StoreError> {
		let user_accounts = self.account_ids_of_user(user_id).await;
		let mut rows: Vec<SnapshotRow> = self
			.snapshots
			.read()
			.await
			.values()
			.filter(|row| {
				user_accounts.contains(&row.account_id) &&
					row.captured_at >= start && row.captured_at <= end
			})
			.filter(|row| source.is_none_or(|wanted| row.source == wanted.as_str()))
			.cloned()
			.collect();
		rows.sort_by(|a, b| (a.captured_at, a.id).cmp(&(b.captured_at, b.id)));
		rows.into_iter().map(TryInto::try_into).collect()
	}

	async fn find_latest_by_user_id(
		&self,
		user_id: Uuid,
	) -> Result<Vec<BalanceSnapshot>, StoreError> {
		let user_accounts = self.account_ids_of_user(user_id).await;
		let snapshots = self.snapshots.read().await;
		user_accounts
			.into_iter()
			.filter_map(|account_id| {
				snapshots
					.values()
					.filter(|row| row.account_id == account_id)
					.max_by_key(|row| (row.captured_at, row.id))
					.cloned()
			})
			.map(TryInto::try_into)
			.collect()
	}

	async fn save(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError> {
		let row = SnapshotRow::from(snapshot);
		let mut snapshots = self.snapshots.write().await;
		if snapshots.contains_key(&row.id) {
			return Err(StoreError::Conflict(format!("snapshot {} already exists", row.id)))
		}
		snapshots.insert(row.id, row);
		Ok(())
	}

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
		Ok(self.snapshots.write().await.remove(&id).is_some())
	}

	async fn count_by_account_id(&self, account_id: Uuid) -> Result<usize, StoreError> {
		Ok(self
			.snapshots
			.read()
			.await
			.values()
			.filter(|row| row.account_id == account_id)
			.count())
	}
}
