//! Transaction queries.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
	domain::{Transaction, TransactionType},
	ownership::{OwnershipError, OwnershipVerifier},
	store::TransactionStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionQueryError {
	#[error("TRANSACTION_NOT_FOUND: transaction not found")]
	TransactionNotFound,
	#[error("ACCOUNT_NOT_FOUND: account not found")]
	AccountNotFound,
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: not owned by user")]
	NotOwnedByUser,
	#[error("INVALID_DATE_RANGE: start date must be before end date")]
	InvalidDateRange,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl From<OwnershipError> for TransactionQueryError {
	fn from(error: OwnershipError) -> Self {
		match error {
			OwnershipError::TransactionNotFound => TransactionQueryError::TransactionNotFound,
			OwnershipError::AccountNotFound => TransactionQueryError::AccountNotFound,
			OwnershipError::ConnectionNotFound => TransactionQueryError::ConnectionNotFound,
			OwnershipError::NotOwnedByUser => TransactionQueryError::NotOwnedByUser,
			OwnershipError::HoldingNotFound => TransactionQueryError::TransactionNotFound,
			OwnershipError::Store(detail) => TransactionQueryError::Database(detail),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionView {
	pub id: Uuid,
	pub account_id: Uuid,
	pub provider_transaction_id: String,
	pub transaction_type: String,
	pub subtype: String,
	pub status: String,
	pub amount: BigDecimal,
	pub currency: String,
	pub description: String,
	pub asset_type: Option<String>,
	pub symbol: Option<String>,
	pub security_name: Option<String>,
	pub quantity: Option<BigDecimal>,
	pub unit_price: Option<BigDecimal>,
	pub commission: Option<BigDecimal>,
	pub is_credit: bool,
	pub transaction_date: NaiveDate,
	pub settlement_date: Option<NaiveDate>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionView {
	fn from(transaction: &Transaction) -> Self {
		Self {
			id: transaction.id,
			account_id: transaction.account_id,
			provider_transaction_id: transaction.provider_transaction_id.clone(),
			transaction_type: transaction.transaction_type.as_str().to_string(),
			subtype: transaction.subtype.as_str().to_string(),
			status: transaction.status().as_str().to_string(),
			amount: transaction.amount().amount().clone(),
			currency: transaction.amount().currency().as_str().to_string(),
			description: transaction.description.clone(),
			asset_type: transaction.asset_type.map(|t| t.as_str().to_string()),
			symbol: transaction.symbol.clone(),
			security_name: transaction.security_name.clone(),
			quantity: transaction.quantity.clone(),
			unit_price: transaction.unit_price().map(|m| m.amount().clone()),
			commission: transaction.commission().map(|m| m.amount().clone()),
			is_credit: transaction.is_credit(),
			transaction_date: transaction.transaction_date,
			settlement_date: transaction.settlement_date,
			created_at: transaction.created_at,
			updated_at: transaction.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionListView {
	pub transactions: Vec<TransactionView>,
	pub total_count: usize,
	/// True when the page was filled to `limit`: another page may exist.
	pub has_more: bool,
}

fn list_view(transactions: Vec<Transaction>, limit: Option<usize>) -> TransactionListView {
	let views: Vec<TransactionView> = transactions.iter().map(TransactionView::from).collect();
	TransactionListView {
		total_count: views.len(),
		has_more: limit.is_some_and(|limit| views.len() == limit),
		transactions: views,
	}
}

#[derive(Debug, Clone, Copy)]
pub struct GetTransaction {
	pub user_id: Uuid,
	pub transaction_id: Uuid,
}

pub struct GetTransactionHandler {
	verifier: Arc<OwnershipVerifier>,
}

impl GetTransactionHandler {
	pub fn new(verifier: Arc<OwnershipVerifier>) -> Self {
		Self { verifier }
	}

	pub async fn handle(
		&self,
		query: GetTransaction,
	) -> Result<TransactionView, TransactionQueryError> {
		let transaction = self
			.verifier
			.verify_transaction_ownership(query.transaction_id, query.user_id)
			.await?;
		Ok(TransactionView::from(&transaction))
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ListTransactionsByAccount {
	pub user_id: Uuid,
	pub account_id: Uuid,
	pub transaction_type: Option<TransactionType>,
	pub limit: usize,
	pub offset: usize,
}

pub struct ListTransactionsByAccountHandler {
	transactions: Arc<dyn TransactionStore>,
	verifier: Arc<OwnershipVerifier>,
}

impl ListTransactionsByAccountHandler {
	pub fn new(
		transactions: Arc<dyn TransactionStore>,
		verifier: Arc<OwnershipVerifier>,
	) -> Self {
		Self { transactions, verifier }
	}

	pub async fn handle(
		&self,
		query: ListTransactionsByAccount,
	) -> Result<TransactionListView, TransactionQueryError> {
		self.verifier
			.verify_account_ownership_only(query.account_id, query.user_id)
			.await?;

		let transactions = match query.transaction_type {
			Some(transaction_type) =>
				self.transactions
					.find_by_account_and_type(
						query.account_id,
						transaction_type,
						query.limit,
						query.offset,
					)
					.await,
			None =>
				self.transactions
					.find_by_account_id(query.account_id, query.limit, query.offset)
					.await,
		}
		.map_err(|e| TransactionQueryError::Database(e.to_string()))?;

		Ok(list_view(transactions, Some(query.limit)))
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ListTransactionsByDateRange {
	pub user_id: Uuid,
	pub account_id: Uuid,
	pub start_date: NaiveDate,
	pub end_date: NaiveDate,
}

pub struct ListTransactionsByDateRangeHandler {
	transactions: Arc<dyn TransactionStore>,
	verifier: Arc<OwnershipVerifier>,
}

impl ListTransactionsByDateRangeHandler {
	pub fn new(
		transactions: Arc<dyn TransactionStore>,
		verifier: Arc<OwnershipVerifier>,
	) -> Self {
		Self { transactions, verifier }
	}

	pub async fn handle(
		&self,
		query: ListTransactionsByDateRange,
	) -> Result<TransactionListView, TransactionQueryError> {
		if query.start_date >= query.end_date {
			return Err(TransactionQueryError::InvalidDateRange)
		}
		self.verifier
			.verify_account_ownership_only(query.account_id, query.user_id)
			.await?;

		let transactions = self
			.transactions
			.find_by_date_range(query.account_id, query.start_date, query.end_date)
			.await
			.map_err(|e| TransactionQueryError::Database(e.to_string()))?;
		Ok(list_view(transactions, None))
	}
}

#[derive(Debug, Clone)]
pub struct ListTransactionsBySecurity {
	pub user_id: Uuid,
	pub account_id: Uuid,
	pub symbol: String,
	pub limit: usize,
}

pub struct ListTransactionsBySecurityHandler {
	transactions: Arc<dyn TransactionStore>,
	verifier: Arc<OwnershipVerifier>,
}

impl ListTransactionsBySecurityHandler {
	pub fn new(
		transactions: Arc<dyn TransactionStore>,
		verifier: Arc<OwnershipVerifier>,
	) -> Self {
		Self { transactions, verifier }
	}

	pub async fn handle(
		&self,
		query: ListTransactionsBySecurity,
	) -> Result<TransactionListView, TransactionQueryError> {
		self.verifier
			.verify_account_ownership_only(query.account_id, query.user_id)
			.await?;

		let transactions = self
			.transactions
			.find_security_transactions(query.account_id, &query.symbol, query.limit)
			.await
			.map_err(|e| TransactionQueryError::Database(e.to_string()))?;
		Ok(list_view(transactions, Some(query.limit)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		domain::{
			Account, AccountType, AssetType, ConnectionStatus, CredentialType, Currency, Money,
			NewAccount, NewConnection, NewTransaction, ProviderConnection, ProviderCredentials,
			TransactionStatus, TransactionSubtype,
		},
		store::{memory::MemoryStore, AccountStore, ConnectionStore},
	};

	struct Fixture {
		store: Arc<MemoryStore>,
		user_id: Uuid,
		account_id: Uuid,
	}

	async fn fixture() -> Fixture {
		let store = Arc::new(MemoryStore::new());
		let user_id = Uuid::now_v7();
		let now = Utc::now();
		let connection = ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id,
			provider_id: Uuid::now_v7(),
			provider_slug: "schwab".to_string(),
			alias: None,
			status: ConnectionStatus::Active,
			credentials: Some(
				ProviderCredentials::new(b"sealed".to_vec(), CredentialType::Oauth2, None)
					.unwrap(),
			),
			connected_at: Some(now),
			last_sync_at: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		ConnectionStore::save(store.as_ref(), &connection).await.unwrap();

		let account = Account::new(NewAccount {
			id: Uuid::now_v7(),
			connection_id: connection.id,
			provider_account_id: "ACC-1".to_string(),
			account_number_masked: "****1".to_string(),
			name: "Brokerage".to_string(),
			account_type: AccountType::Brokerage,
			balance: Money::zero(Currency::USD),
			available_balance: None,
			currency: Currency::USD,
			is_active: true,
			last_synced_at: None,
			provider_metadata: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		AccountStore::save(store.as_ref(), &account).await.unwrap();

		Fixture { store, user_id, account_id: account.id }
	}

	impl Fixture {
		fn verifier(&self) -> Arc<OwnershipVerifier> {
			Arc::new(OwnershipVerifier::new(
				self.store.clone(),
				self.store.clone(),
				self.store.clone(),
				self.store.clone(),
			))
		}
	}

	async fn seed_txn(
		f: &Fixture,
		fitid: &str,
		day: u32,
		transaction_type: TransactionType,
		symbol: Option<&str>,
	) -> Uuid {
		let now = Utc::now();
		let transaction = Transaction::new(NewTransaction {
			id: Uuid::now_v7(),
			account_id: f.account_id,
			provider_transaction_id: fitid.to_string(),
			transaction_type,
			subtype: TransactionSubtype::Unknown,
			status: TransactionStatus::Settled,
			amount: Money::new("-5.00".parse().unwrap(), Currency::USD),
			description: format!("txn {fitid}"),
			asset_type: symbol.map(|_| AssetType::Equity),
			symbol: symbol.map(str::to_string),
			security_name: None,
			quantity: None,
			unit_price: None,
			commission: None,
			transaction_date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
			settlement_date: None,
			provider_metadata: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		TransactionStore::save(f.store.as_ref(), &transaction).await.unwrap();
		transaction.id
	}

	#[tokio::test]
	async fn get_transaction_resolves_ownership_chain() {
		let f = fixture().await;
		let transaction_id = seed_txn(&f, "F1", 1, TransactionType::Trade, Some("AAPL")).await;

		let handler = GetTransactionHandler::new(f.verifier());
		let view = handler
			.handle(GetTransaction { user_id: f.user_id, transaction_id })
			.await
			.unwrap();
		assert_eq!(view.transaction_type, "trade");
		assert!(!view.is_credit);

		assert_eq!(
			handler
				.handle(GetTransaction { user_id: Uuid::now_v7(), transaction_id })
				.await,
			Err(TransactionQueryError::NotOwnedByUser)
		);
	}

	#[tokio::test]
	async fn has_more_is_set_only_on_full_pages() {
		let f = fixture().await;
		for (i, day) in [1u32, 2, 3].iter().enumerate() {
			seed_txn(&f, &format!("F{i}"), *day, TransactionType::Transfer, None).await;
		}
		let handler =
			ListTransactionsByAccountHandler::new(f.store.clone(), f.verifier());

		let full_page = handler
			.handle(ListTransactionsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				transaction_type: None,
				limit: 3,
				offset: 0,
			})
			.await
			.unwrap();
		assert!(full_page.has_more);
		assert_eq!(full_page.total_count, 3);

		let short_page = handler
			.handle(ListTransactionsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				transaction_type: None,
				limit: 10,
				offset: 0,
			})
			.await
			.unwrap();
		assert!(!short_page.has_more);
	}

	#[tokio::test]
	async fn type_filter_uses_the_typed_finder() {
		let f = fixture().await;
		seed_txn(&f, "F1", 1, TransactionType::Trade, Some("AAPL")).await;
		seed_txn(&f, "F2", 2, TransactionType::Fee, None).await;

		let handler =
			ListTransactionsByAccountHandler::new(f.store.clone(), f.verifier());
		let fees = handler
			.handle(ListTransactionsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				transaction_type: Some(TransactionType::Fee),
				limit: 10,
				offset: 0,
			})
			.await
			.unwrap();
		assert_eq!(fees.total_count, 1);
		assert_eq!(fees.transactions[0].transaction_type, "fee");
	}

	#[tokio::test]
	async fn date_range_is_validated_before_any_fetch() {
		let f = fixture().await;
		let handler =
			ListTransactionsByDateRangeHandler::new(f.store.clone(), f.verifier());
		let result = handler
			.handle(ListTransactionsByDateRange {
				user_id: f.user_id,
				account_id: f.account_id,
				start_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
				end_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
			})
			.await;
		assert_eq!(result, Err(TransactionQueryError::InvalidDateRange));
	}

	#[tokio::test]
	async fn date_range_returns_ascending() {
		let f = fixture().await;
		seed_txn(&f, "F1", 3, TransactionType::Transfer, None).await;
		seed_txn(&f, "F2", 1, TransactionType::Transfer, None).await;

		let handler =
			ListTransactionsByDateRangeHandler::new(f.store.clone(), f.verifier());
		let view = handler
			.handle(ListTransactionsByDateRange {
				user_id: f.user_id,
				account_id: f.account_id,
				start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
				end_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
			})
			.await
			.unwrap();
		let days: Vec<u32> = view
			.transactions
			.iter()
			.map(|t| chrono::Datelike::day(&t.transaction_date))
			.collect();
		assert_eq!(days, vec![1, 3]);
		assert!(!view.has_more);
	}

	#[tokio::test]
	async fn security_listing_filters_by_symbol() {
		let f = fixture().await;
		seed_txn(&f, "F1", 1, TransactionType::Trade, Some("AAPL")).await;
		seed_txn(&f, "F2", 2, TransactionType::Trade, Some("VTI")).await;

		let handler =
			ListTransactionsBySecurityHandler::new(f.store.clone(), f.verifier());
		let view = handler
			.handle(ListTransactionsBySecurity {
				user_id: f.user_id,
				account_id: f.account_id,
				symbol: "AAPL".to_string(),
				limit: 10,
			})
			.await
			.unwrap();
		assert_eq!(view.total_count, 1);
		assert_eq!(view.transactions[0].symbol.as_deref(), Some("AAPL"));
	}
}
