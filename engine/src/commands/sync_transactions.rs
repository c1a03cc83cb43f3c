//! SyncTransactions handler.
//!
//! Pulls activity for one account or for every active account of a
//! connection, over an explicit or default date window. Transactions are
//! deduplicated by the provider's id within the account; a re-observed
//! transaction is left untouched and counted as unchanged. Per-account and
//! per-record failures are isolated.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::{normalize, SyncTransactions, SyncTransactionsOutcome, SyncPolicy};
use crate::{
	cipher::CredentialCipher,
	domain::{Account, Currency, Money, NewTransaction, Transaction},
	events::{publish_event, EventBus, EventKind},
	providers::{ProviderRegistry, ProviderTransactionData},
	store::{AccountStore, ConnectionStore, TransactionStore},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncTransactionsError {
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: provider connection not owned by user")]
	NotOwnedByUser,
	#[error("CONNECTION_NOT_ACTIVE: provider connection is not active")]
	ConnectionNotActive,
	#[error("CREDENTIALS_INVALID: provider credentials are invalid")]
	CredentialsInvalid,
	#[error("CREDENTIALS_DECRYPTION_FAILED: failed to decrypt provider credentials")]
	CredentialsDecryptionFailed,
	#[error("PROVIDER_ERROR: {0}")]
	Provider(String),
	#[error("ACCOUNT_NOT_FOUND: account not found on this connection")]
	AccountNotFound,
	#[error("NO_ACCOUNTS: connection has no active accounts")]
	NoAccounts,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl SyncTransactionsError {
	pub fn reason_code(&self) -> &'static str {
		match self {
			SyncTransactionsError::ConnectionNotFound => "connection_not_found",
			SyncTransactionsError::NotOwnedByUser => "not_owned_by_user",
			SyncTransactionsError::ConnectionNotActive => "connection_not_active",
			SyncTransactionsError::CredentialsInvalid => "credentials_invalid",
			SyncTransactionsError::CredentialsDecryptionFailed =>
				"credentials_decryption_failed",
			SyncTransactionsError::Provider(_) => "provider_error",
			SyncTransactionsError::AccountNotFound => "account_not_found",
			SyncTransactionsError::NoAccounts => "no_accounts",
			SyncTransactionsError::Database(_) => "database_error",
		}
	}
}

pub struct SyncTransactionsHandler {
	connections: Arc<dyn ConnectionStore>,
	accounts: Arc<dyn AccountStore>,
	transactions: Arc<dyn TransactionStore>,
	cipher: Arc<dyn CredentialCipher>,
	registry: Arc<ProviderRegistry>,
	event_bus: Arc<dyn EventBus>,
	policy: SyncPolicy,
}

#[derive(Default)]
struct AccountTally {
	created: usize,
	updated: usize,
	unchanged: usize,
	errors: usize,
}

impl SyncTransactionsHandler {
	pub fn new(
		connections: Arc<dyn ConnectionStore>,
		accounts: Arc<dyn AccountStore>,
		transactions: Arc<dyn TransactionStore>,
		cipher: Arc<dyn CredentialCipher>,
		registry: Arc<ProviderRegistry>,
		event_bus: Arc<dyn EventBus>,
		policy: SyncPolicy,
	) -> Self {
		Self { connections, accounts, transactions, cipher, registry, event_bus, policy }
	}

	pub async fn handle(
		&self,
		cmd: SyncTransactions,
	) -> Result<SyncTransactionsOutcome, SyncTransactionsError> {
		publish_event(
			self.event_bus.as_ref(),
			cmd.user_id,
			EventKind::TransactionSyncAttempted {
				connection_id: cmd.connection_id,
				account_id: cmd.account_id,
			},
		)
		.await;

		match self.sync(&cmd).await {
			Ok(outcome) => {
				let total = outcome.created + outcome.updated + outcome.unchanged;
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::TransactionSyncSucceeded {
						connection_id: cmd.connection_id,
						transaction_count: total,
						accounts_synced: outcome.accounts_synced,
					},
				)
				.await;
				Ok(outcome)
			},
			Err(error) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::TransactionSyncFailed {
						connection_id: cmd.connection_id,
						reason: error.reason_code().to_string(),
					},
				)
				.await;
				Err(error)
			},
		}
	}

	async fn sync(
		&self,
		cmd: &SyncTransactions,
	) -> Result<SyncTransactionsOutcome, SyncTransactionsError> {
		let connection = self
			.connections
			.find_by_id(cmd.connection_id)
			.await
			.map_err(|e| SyncTransactionsError::Database(e.to_string()))?
			.ok_or(SyncTransactionsError::ConnectionNotFound)?;

		if connection.user_id != cmd.user_id {
			return Err(SyncTransactionsError::NotOwnedByUser)
		}
		if !connection.is_connected() {
			return Err(SyncTransactionsError::ConnectionNotActive)
		}

		let credentials =
			connection.credentials().ok_or(SyncTransactionsError::CredentialsInvalid)?;
		let bundle = self
			.cipher
			.decrypt(credentials.encrypted_data())
			.await
			.map_err(|_| SyncTransactionsError::CredentialsDecryptionFailed)?;

		let accounts = match cmd.account_id {
			Some(account_id) => {
				let account = self
					.accounts
					.find_by_id(account_id)
					.await
					.map_err(|e| SyncTransactionsError::Database(e.to_string()))?
					.ok_or(SyncTransactionsError::AccountNotFound)?;
				if account.connection_id != connection.id {
					return Err(SyncTransactionsError::AccountNotFound)
				}
				vec![account]
			},
			None => self
				.accounts
				.find_by_connection_id(connection.id, true)
				.await
				.map_err(|e| SyncTransactionsError::Database(e.to_string()))?,
		};
		if accounts.is_empty() {
			return Err(SyncTransactionsError::NoAccounts)
		}

		let end_date = cmd.end_date.unwrap_or_else(|| Utc::now().date_naive());
		let start_date =
			cmd.start_date.unwrap_or(end_date - self.policy.default_sync_window);

		let provider = self
			.registry
			.get(&connection.provider_slug)
			.map_err(|e| SyncTransactionsError::Provider(e.to_string()))?;

		let mut created = 0;
		let mut updated = 0;
		let mut unchanged = 0;
		let mut errors = 0;
		let mut accounts_synced = 0;

		for mut account in accounts {
			let fetched = provider
				.fetch_transactions(
					&bundle,
					&account.provider_account_id,
					Some(start_date),
					Some(end_date),
				)
				.await;
			let provider_transactions = match fetched {
				Ok(provider_transactions) => provider_transactions,
				Err(error) => {
					tracing::warn!(
						account_id = %account.id,
						%error,
						"provider fetch failed, continuing with remaining accounts"
					);
					errors += 1;
					continue
				},
			};

			let tally = self.apply(&account, provider_transactions).await;
			created += tally.created;
			updated += tally.updated;
			unchanged += tally.unchanged;
			errors += tally.errors;

			account.mark_synced();
			self.accounts
				.save(&account)
				.await
				.map_err(|e| SyncTransactionsError::Database(e.to_string()))?;
			accounts_synced += 1;
		}

		let total = created + updated + unchanged;
		let mut message = format!(
			"Synced {total} transactions from {accounts_synced} accounts: \
			 {created} created, {updated} updated, {unchanged} unchanged"
		);
		if errors > 0 {
			message.push_str(&format!(", {errors} errors"));
		}

		tracing::info!(
			connection_id = %connection.id,
			created,
			unchanged,
			errors,
			accounts_synced,
			"transaction sync complete"
		);
		Ok(SyncTransactionsOutcome { created, updated, unchanged, errors, accounts_synced, message })
	}

	async fn apply(
		&self,
		account: &Account,
		provider_transactions: Vec<ProviderTransactionData>,
	) -> AccountTally {
		let mut tally = AccountTally::default();
		for data in provider_transactions {
			match self.apply_one(account.id, &data).await {
				Ok(true) => tally.created += 1,
				// Stored transactions are immutable history: a re-observed
				// record stays as persisted, even when the provider now
				// reports a different status.
				Ok(false) => tally.unchanged += 1,
				Err(error) => {
					tracing::warn!(
						account_id = %account.id,
						provider_transaction_id = %data.provider_transaction_id,
						error,
						"skipping transaction"
					);
					tally.errors += 1;
				},
			}
		}
		tally
	}

	async fn apply_one(
		&self,
		account_id: Uuid,
		data: &ProviderTransactionData,
	) -> Result<bool, String> {
		let existing = self
			.transactions
			.find_by_provider_transaction_id(account_id, &data.provider_transaction_id)
			.await
			.map_err(|e| e.to_string())?;
		if existing.is_some() {
			return Ok(false)
		}

		let transaction = build_transaction(account_id, data)?;
		self.transactions.save(&transaction).await.map_err(|e| e.to_string())?;
		Ok(true)
	}
}

/// Normalize one provider record into a transaction entity.
pub(crate) fn build_transaction(
	account_id: Uuid,
	data: &ProviderTransactionData,
) -> Result<Transaction, String> {
	let currency: Currency = data.currency.parse().map_err(|e| format!("{e}"))?;
	let money = |amount: &bigdecimal::BigDecimal| Money::new(amount.clone(), currency);

	let transaction_type = normalize::transaction_type(&data.transaction_type);
	let subtype = normalize::subtype(data.subtype.as_deref(), transaction_type);
	let status = normalize::transaction_status(&data.status);
	let asset_type = data.asset_type.as_deref().map(normalize::asset_type);

	let now = Utc::now();
	Transaction::new(NewTransaction {
		id: Uuid::now_v7(),
		account_id,
		provider_transaction_id: data.provider_transaction_id.clone(),
		transaction_type,
		subtype,
		status,
		amount: money(&data.amount),
		description: data.description.clone(),
		asset_type,
		symbol: data.symbol.clone(),
		security_name: data.security_name.clone(),
		quantity: data.quantity.clone(),
		unit_price: data.unit_price.as_ref().map(&money),
		commission: data.commission.as_ref().map(&money),
		transaction_date: data.transaction_date,
		settlement_date: data.settlement_date,
		provider_metadata: data.raw_data.clone(),
		created_at: now,
		updated_at: now,
	})
	.map_err(|e| e.to_string())
}
