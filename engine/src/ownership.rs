//! Ownership chain verification.
//!
//! Every read and write resolves the chain
//! Transaction/Holding/Snapshot → Account → Connection → User before
//! touching data. Verification short-circuits at the first missing link and
//! returns the fetched entity so callers never fetch twice.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::{
	domain::{Account, Holding, ProviderConnection, Transaction},
	store::{AccountStore, ConnectionStore, HoldingStore, StoreError, TransactionStore},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnershipError {
	#[error("transaction not found")]
	TransactionNotFound,
	#[error("holding not found")]
	HoldingNotFound,
	#[error("account not found")]
	AccountNotFound,
	#[error("provider connection not found")]
	ConnectionNotFound,
	#[error("not owned by user")]
	NotOwnedByUser,
	#[error("storage error: {0}")]
	Store(String),
}

impl OwnershipError {
	/// Stable code carried by `Failed` events.
	pub fn reason_code(&self) -> &'static str {
		match self {
			OwnershipError::TransactionNotFound => "transaction_not_found",
			OwnershipError::HoldingNotFound => "holding_not_found",
			OwnershipError::AccountNotFound => "account_not_found",
			OwnershipError::ConnectionNotFound => "connection_not_found",
			OwnershipError::NotOwnedByUser => "not_owned_by_user",
			OwnershipError::Store(_) => "database_error",
		}
	}
}

impl From<StoreError> for OwnershipError {
	fn from(error: StoreError) -> Self {
		OwnershipError::Store(error.to_string())
	}
}

pub struct OwnershipVerifier {
	connections: Arc<dyn ConnectionStore>,
	accounts: Arc<dyn AccountStore>,
	holdings: Arc<dyn HoldingStore>,
	transactions: Arc<dyn TransactionStore>,
}

impl OwnershipVerifier {
	pub fn new(
		connections: Arc<dyn ConnectionStore>,
		accounts: Arc<dyn AccountStore>,
		holdings: Arc<dyn HoldingStore>,
		transactions: Arc<dyn TransactionStore>,
	) -> Self {
		Self { connections, accounts, holdings, transactions }
	}

	pub async fn verify_connection_ownership(
		&self,
		connection_id: Uuid,
		user_id: Uuid,
	) -> Result<ProviderConnection, OwnershipError> {
		let connection = self
			.connections
			.find_by_id(connection_id)
			.await?
			.ok_or(OwnershipError::ConnectionNotFound)?;
		if connection.user_id != user_id {
			return Err(OwnershipError::NotOwnedByUser)
		}
		Ok(connection)
	}

	pub async fn verify_account_ownership(
		&self,
		account_id: Uuid,
		user_id: Uuid,
	) -> Result<Account, OwnershipError> {
		let account =
			self.accounts.find_by_id(account_id).await?.ok_or(OwnershipError::AccountNotFound)?;
		let connection = self
			.connections
			.find_by_id(account.connection_id)
			.await?
			.ok_or(OwnershipError::ConnectionNotFound)?;
		if connection.user_id != user_id {
			return Err(OwnershipError::NotOwnedByUser)
		}
		Ok(account)
	}

	/// Ownership check without the payload, for callers that already hold
	/// the account.
	pub async fn verify_account_ownership_only(
		&self,
		account_id: Uuid,
		user_id: Uuid,
	) -> Result<(), OwnershipError> {
		self.verify_account_ownership(account_id, user_id).await.map(|_| ())
	}

	pub async fn verify_holding_ownership(
		&self,
		holding_id: Uuid,
		user_id: Uuid,
	) -> Result<Holding, OwnershipError> {
		let holding =
			self.holdings.find_by_id(holding_id).await?.ok_or(OwnershipError::HoldingNotFound)?;
		self.verify_account_ownership_only(holding.account_id, user_id).await?;
		Ok(holding)
	}

	pub async fn verify_transaction_ownership(
		&self,
		transaction_id: Uuid,
		user_id: Uuid,
	) -> Result<Transaction, OwnershipError> {
		let transaction = self
			.transactions
			.find_by_id(transaction_id)
			.await?
			.ok_or(OwnershipError::TransactionNotFound)?;
		self.verify_account_ownership_only(transaction.account_id, user_id).await?;
		Ok(transaction)
	}
}
