//! ImportFromFile handler.
//!
//! Statement-file variant of the sync pipeline. One connection per
//! (user, provider slug) holds all of a user's imports for that provider;
//! its credential is a placeholder tag — file contents are parsed in memory
//! and never persisted. Progress events are emitted while transactions are
//! ingested; the final record is reported by `Succeeded` alone.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::{
	normalize, sync_transactions::build_transaction, ImportFromFile, ImportOutcome,
	ProgressPolicy,
};
use crate::{
	domain::{
		Account, ConnectionStatus, CredentialType, Currency, Money, NewAccount, NewConnection,
		ProviderConnection, ProviderCredentials,
	},
	events::{publish_event, EventBus, EventKind},
	providers::{
		CredentialBundle, ProviderAccountData, ProviderRegistry, ProviderTransactionData,
		FILE_CONTENT_KEY, FILE_FORMAT_KEY, FILE_NAME_KEY,
	},
	store::{AccountStore, ConnectionStore, TransactionStore},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportFromFileError {
	#[error("PROVIDER_NOT_FOUND: no import provider for slug {0}")]
	ProviderNotFound(String),
	#[error("INVALID_FILE: {0}")]
	InvalidFile(String),
	#[error("NO_ACCOUNTS: file contains no account data")]
	NoAccounts,
	#[error("IMPORT_FAILED: {0}")]
	ImportFailed(String),
}

impl ImportFromFileError {
	pub fn reason_code(&self) -> &'static str {
		match self {
			ImportFromFileError::ProviderNotFound(_) => "provider_not_found",
			ImportFromFileError::InvalidFile(_) => "invalid_file",
			ImportFromFileError::NoAccounts => "no_accounts",
			ImportFromFileError::ImportFailed(_) => "import_failed",
		}
	}
}

pub struct ImportFromFileHandler {
	connections: Arc<dyn ConnectionStore>,
	accounts: Arc<dyn AccountStore>,
	transactions: Arc<dyn TransactionStore>,
	registry: Arc<ProviderRegistry>,
	event_bus: Arc<dyn EventBus>,
	policy: ProgressPolicy,
}

impl ImportFromFileHandler {
	pub fn new(
		connections: Arc<dyn ConnectionStore>,
		accounts: Arc<dyn AccountStore>,
		transactions: Arc<dyn TransactionStore>,
		registry: Arc<ProviderRegistry>,
		event_bus: Arc<dyn EventBus>,
		policy: ProgressPolicy,
	) -> Self {
		Self { connections, accounts, transactions, registry, event_bus, policy }
	}

	pub async fn handle(&self, cmd: ImportFromFile) -> Result<ImportOutcome, ImportFromFileError> {
		publish_event(
			self.event_bus.as_ref(),
			cmd.user_id,
			EventKind::FileImportAttempted {
				provider_slug: cmd.provider_slug.clone(),
				file_name: cmd.file_name.clone(),
				file_format: cmd.file_format.clone(),
			},
		)
		.await;

		match self.import(&cmd).await {
			Ok(outcome) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::FileImportSucceeded {
						provider_slug: cmd.provider_slug.clone(),
						file_name: cmd.file_name.clone(),
						file_format: cmd.file_format.clone(),
						account_count: outcome.accounts_created + outcome.accounts_updated,
						transaction_count: outcome.transactions_created,
					},
				)
				.await;
				Ok(outcome)
			},
			Err(error) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::FileImportFailed {
						provider_slug: cmd.provider_slug.clone(),
						file_name: cmd.file_name.clone(),
						file_format: cmd.file_format.clone(),
						reason: error.reason_code().to_string(),
					},
				)
				.await;
				Err(error)
			},
		}
	}

	async fn import(&self, cmd: &ImportFromFile) -> Result<ImportOutcome, ImportFromFileError> {
		let provider = self
			.registry
			.get(&cmd.provider_slug)
			.map_err(|_| ImportFromFileError::ProviderNotFound(cmd.provider_slug.clone()))?;
		let descriptor = self
			.registry
			.descriptor(&cmd.provider_slug)
			.ok_or_else(|| ImportFromFileError::ProviderNotFound(cmd.provider_slug.clone()))?;

		// Statement formats are text; anything else cannot be a statement.
		let content = std::str::from_utf8(&cmd.file_content)
			.map_err(|_| ImportFromFileError::InvalidFile("file is not valid UTF-8".into()))?;
		let bundle = CredentialBundle::new()
			.with(FILE_CONTENT_KEY, content)
			.with(FILE_FORMAT_KEY, cmd.file_format.as_str())
			.with(FILE_NAME_KEY, cmd.file_name.as_str());

		let provider_accounts = provider
			.fetch_accounts(&bundle)
			.await
			.map_err(|e| ImportFromFileError::InvalidFile(e.to_string()))?;
		if provider_accounts.is_empty() {
			return Err(ImportFromFileError::NoAccounts)
		}

		let mut connection =
			self.get_or_create_connection(cmd.user_id, &cmd.provider_slug, descriptor.id).await?;

		// Accounts first, so every transaction has a home.
		let mut accounts_created = 0;
		let mut accounts_updated = 0;
		let mut account_map: HashMap<String, Uuid> = HashMap::new();
		for provider_account in &provider_accounts {
			let (account_id, was_created) =
				self.upsert_account(connection.id, provider_account).await?;
			account_map.insert(provider_account.provider_account_id.clone(), account_id);
			if was_created {
				accounts_created += 1;
			} else {
				accounts_updated += 1;
			}
		}

		// Gather the full transaction list up front: progress reporting
		// needs a denominator.
		let mut all_transactions: Vec<(Uuid, ProviderTransactionData)> = Vec::new();
		for provider_account in &provider_accounts {
			let account_id = account_map[&provider_account.provider_account_id];
			match provider
				.fetch_transactions(&bundle, &provider_account.provider_account_id, None, None)
				.await
			{
				Ok(transactions) =>
					all_transactions
						.extend(transactions.into_iter().map(|txn| (account_id, txn))),
				Err(error) => {
					tracing::warn!(
						provider_account_id = %provider_account.provider_account_id,
						%error,
						"no transactions parsed for account"
					);
				},
			}
		}
		let total_records = all_transactions.len();

		let mut transactions_created = 0;
		let mut transactions_skipped = 0;
		let mut last_reported_percent = 0u8;

		for (index, (account_id, data)) in all_transactions.iter().enumerate() {
			match self.upsert_transaction(*account_id, data).await? {
				true => transactions_created += 1,
				false => transactions_skipped += 1,
			}

			let records_processed = index + 1;
			let progress_percent = if total_records > 0 {
				((records_processed * 100) / total_records) as u8
			} else {
				100
			};
			let should_emit = records_processed % self.policy.record_interval == 0 ||
				progress_percent as u16 >=
					last_reported_percent as u16 + self.policy.percent_interval as u16;
			if should_emit && records_processed < total_records {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::FileImportProgress {
						provider_slug: cmd.provider_slug.clone(),
						file_name: cmd.file_name.clone(),
						file_format: cmd.file_format.clone(),
						records_processed,
						total_records,
						progress_percent,
					},
				)
				.await;
				last_reported_percent = progress_percent;
			}
		}

		if let Err(error) = connection.record_sync() {
			tracing::warn!(connection_id = %connection.id, %error, "sync not recorded");
		}
		self.connections
			.save(&connection)
			.await
			.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;

		let message = format!(
			"Imported from {}: {accounts_created} accounts created, \
			 {accounts_updated} updated, {transactions_created} transactions imported, \
			 {transactions_skipped} skipped",
			cmd.file_name
		);
		tracing::info!(
			connection_id = %connection.id,
			accounts_created,
			accounts_updated,
			transactions_created,
			transactions_skipped,
			"file import complete"
		);

		Ok(ImportOutcome {
			connection_id: connection.id,
			accounts_created,
			accounts_updated,
			transactions_created,
			transactions_skipped,
			message,
		})
	}

	/// File-based providers keep one connection per user; every statement
	/// lands in it. The stored credential is a tag, not a secret.
	async fn get_or_create_connection(
		&self,
		user_id: Uuid,
		provider_slug: &str,
		provider_id: Uuid,
	) -> Result<ProviderConnection, ImportFromFileError> {
		let existing = self
			.connections
			.find_by_user_id(user_id)
			.await
			.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?
			.into_iter()
			.find(|connection| connection.provider_slug == provider_slug);
		if let Some(connection) = existing {
			return Ok(connection)
		}

		let now = Utc::now();
		let connection = ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id,
			provider_id,
			provider_slug: provider_slug.to_string(),
			alias: None,
			status: ConnectionStatus::Active,
			credentials: Some(
				ProviderCredentials::new(
					b"file_import_placeholder".to_vec(),
					CredentialType::FileImport,
					None,
				)
				.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?,
			),
			connected_at: Some(now),
			last_sync_at: None,
			created_at: now,
			updated_at: now,
		})
		.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;

		self.connections
			.save(&connection)
			.await
			.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;
		Ok(connection)
	}

	async fn upsert_account(
		&self,
		connection_id: Uuid,
		data: &ProviderAccountData,
	) -> Result<(Uuid, bool), ImportFromFileError> {
		let currency: Currency = data
			.currency
			.parse()
			.map_err(|e| ImportFromFileError::InvalidFile(format!("{e}")))?;
		let balance = Money::new(data.balance.clone(), currency);
		let available_balance =
			data.available_balance.clone().map(|amount| Money::new(amount, currency));

		let existing = self
			.accounts
			.find_by_provider_account_id(connection_id, &data.provider_account_id)
			.await
			.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;

		if let Some(mut account) = existing {
			if account.balance() != &balance {
				account
					.update_balance(balance, available_balance)
					.map_err(|e| ImportFromFileError::InvalidFile(e.to_string()))?;
			}
			if account.name != data.name {
				account
					.update_from_provider(Some(data.name.clone()), None, None)
					.map_err(|e| ImportFromFileError::InvalidFile(e.to_string()))?;
			}
			if data.raw_data.is_some() && account.provider_metadata != data.raw_data {
				account
					.update_from_provider(None, None, data.raw_data.clone())
					.map_err(|e| ImportFromFileError::InvalidFile(e.to_string()))?;
			}
			account.mark_synced();
			self.accounts
				.save(&account)
				.await
				.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;
			return Ok((account.id, false))
		}

		let now = Utc::now();
		let account = Account::new(NewAccount {
			id: Uuid::now_v7(),
			connection_id,
			provider_account_id: data.provider_account_id.clone(),
			account_number_masked: data.account_number_masked.clone(),
			name: data.name.clone(),
			account_type: normalize::account_type(&data.account_type),
			balance,
			available_balance,
			currency,
			is_active: data.is_active,
			last_synced_at: Some(now),
			provider_metadata: data.raw_data.clone(),
			created_at: now,
			updated_at: now,
		})
		.map_err(|e| ImportFromFileError::InvalidFile(e.to_string()))?;
		self.accounts
			.save(&account)
			.await
			.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;
		Ok((account.id, true))
	}

	/// Dedup by the provider's transaction id (FITID for OFX statements).
	/// Returns whether a row was created.
	async fn upsert_transaction(
		&self,
		account_id: Uuid,
		data: &ProviderTransactionData,
	) -> Result<bool, ImportFromFileError> {
		let existing = self
			.transactions
			.find_by_provider_transaction_id(account_id, &data.provider_transaction_id)
			.await
			.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;
		if existing.is_some() {
			return Ok(false)
		}

		let transaction = match build_transaction(account_id, data) {
			Ok(transaction) => transaction,
			Err(error) => {
				// A malformed record spoils itself, not the import.
				tracing::warn!(
					provider_transaction_id = %data.provider_transaction_id,
					error,
					"skipping unparseable transaction"
				);
				return Ok(false)
			},
		};
		self.transactions
			.save(&transaction)
			.await
			.map_err(|e| ImportFromFileError::ImportFailed(e.to_string()))?;
		Ok(true)
	}
}
