//! SyncAccounts handler.
//!
//! Blocking synchronization of a connection's accounts: decrypt credentials,
//! fetch from the provider, upsert into the store, capture balance
//! snapshots, publish balance-change notifications. One failing account
//! never aborts the loop; it is counted and the sync continues.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::{normalize, BalanceChange, SyncAccounts, SyncAccountsOutcome, SyncPolicy};
use crate::{
	cipher::CredentialCipher,
	domain::{
		Account, BalanceSnapshot, Currency, Money, NewAccount, NewSnapshot, ProviderConnection,
		SnapshotSource,
	},
	events::{publish_event, EventBus, EventKind},
	providers::{ProviderAccountData, ProviderRegistry},
	store::{AccountStore, ConnectionStore, SnapshotStore},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncAccountsError {
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
	#[error("RECENTLY_SYNCED: accounts were synced too recently")]
	RecentlySynced,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl SyncAccountsError {
	pub fn reason_code(&self) -> &'static str {
		match self {
			SyncAccountsError::ConnectionNotFound => "connection_not_found",
			SyncAccountsError::NotOwnedByUser => "not_owned_by_user",
			SyncAccountsError::ConnectionNotActive => "connection_not_active",
			SyncAccountsError::CredentialsInvalid => "credentials_invalid",
			SyncAccountsError::CredentialsDecryptionFailed => "credentials_decryption_failed",
			SyncAccountsError::Provider(_) => "provider_error",
			SyncAccountsError::RecentlySynced => "recently_synced",
			SyncAccountsError::Database(_) => "database_error",
		}
	}
}

enum AccountDelta {
	Created,
	Updated,
	Unchanged,
}

pub struct SyncAccountsHandler {
	connections: Arc<dyn ConnectionStore>,
	accounts: Arc<dyn AccountStore>,
	snapshots: Arc<dyn SnapshotStore>,
	cipher: Arc<dyn CredentialCipher>,
	registry: Arc<ProviderRegistry>,
	event_bus: Arc<dyn EventBus>,
	policy: SyncPolicy,
}

impl SyncAccountsHandler {
	pub fn new(
		connections: Arc<dyn ConnectionStore>,
		accounts: Arc<dyn AccountStore>,
		snapshots: Arc<dyn SnapshotStore>,
		cipher: Arc<dyn CredentialCipher>,
		registry: Arc<ProviderRegistry>,
		event_bus: Arc<dyn EventBus>,
		policy: SyncPolicy,
	) -> Self {
		Self { connections, accounts, snapshots, cipher, registry, event_bus, policy }
	}

	pub async fn handle(
		&self,
		cmd: SyncAccounts,
	) -> Result<SyncAccountsOutcome, SyncAccountsError> {
		publish_event(
			self.event_bus.as_ref(),
			cmd.user_id,
			EventKind::AccountSyncAttempted { connection_id: cmd.connection_id },
		)
		.await;

		match self.sync(&cmd).await {
			Ok(outcome) => {
				let total = outcome.created + outcome.updated + outcome.unchanged;
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::AccountSyncSucceeded {
						connection_id: cmd.connection_id,
						account_count: total,
					},
				)
				.await;
				for change in &outcome.balance_changes {
					publish_event(
						self.event_bus.as_ref(),
						cmd.user_id,
						EventKind::AccountBalanceUpdated {
							account_id: change.account_id,
							previous_balance: change.previous.clone(),
							new_balance: change.current.clone(),
							delta: &change.current - &change.previous,
							currency: change.currency.as_str().to_string(),
						},
					)
					.await;
				}
				Ok(outcome)
			},
			Err(error) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::AccountSyncFailed {
						connection_id: cmd.connection_id,
						reason: error.reason_code().to_string(),
					},
				)
				.await;
				Err(error)
			},
		}
	}

	async fn sync(&self, cmd: &SyncAccounts) -> Result<SyncAccountsOutcome, SyncAccountsError> {
		let mut connection = self
			.connections
			.find_by_id(cmd.connection_id)
			.await
			.map_err(|e| SyncAccountsError::Database(e.to_string()))?
			.ok_or(SyncAccountsError::ConnectionNotFound)?;

		if connection.user_id != cmd.user_id {
			return Err(SyncAccountsError::NotOwnedByUser)
		}
		if !connection.is_connected() {
			return Err(SyncAccountsError::ConnectionNotActive)
		}
		if !cmd.force {
			if let Some(last_sync_at) = connection.last_sync_at {
				if Utc::now() - last_sync_at < self.policy.min_sync_interval {
					return Err(SyncAccountsError::RecentlySynced)
				}
			}
		}

		let credentials =
			connection.credentials().ok_or(SyncAccountsError::CredentialsInvalid)?;
		let bundle = self
			.cipher
			.decrypt(credentials.encrypted_data())
			.await
			.map_err(|_| SyncAccountsError::CredentialsDecryptionFailed)?;

		let provider = self
			.registry
			.get(&connection.provider_slug)
			.map_err(|e| SyncAccountsError::Provider(e.to_string()))?;
		let provider_accounts = provider
			.fetch_accounts(&bundle)
			.await
			.map_err(|e| SyncAccountsError::Provider(e.to_string()))?;

		let outcome = self.apply(&connection, provider_accounts).await;

		connection
			.record_sync()
			.map_err(|e| SyncAccountsError::Database(e.to_string()))?;
		self.connections
			.save(&connection)
			.await
			.map_err(|e| SyncAccountsError::Database(e.to_string()))?;

		tracing::info!(
			connection_id = %connection.id,
			created = outcome.created,
			updated = outcome.updated,
			unchanged = outcome.unchanged,
			errors = outcome.errors,
			"account sync complete"
		);
		Ok(outcome)
	}

	async fn apply(
		&self,
		connection: &ProviderConnection,
		provider_accounts: Vec<ProviderAccountData>,
	) -> SyncAccountsOutcome {
		let mut created = 0;
		let mut updated = 0;
		let mut unchanged = 0;
		let mut errors = 0;
		let mut balance_changes = Vec::new();

		for provider_account in provider_accounts {
			match self.apply_one(connection.id, &provider_account, &mut balance_changes).await {
				Ok(AccountDelta::Created) => created += 1,
				Ok(AccountDelta::Updated) => updated += 1,
				Ok(AccountDelta::Unchanged) => unchanged += 1,
				Err(error) => {
					tracing::warn!(
						connection_id = %connection.id,
						provider_account_id = %provider_account.provider_account_id,
						error,
						"skipping account"
					);
					errors += 1;
				},
			}
		}

		let total = created + updated + unchanged;
		let mut message = format!(
			"Synced {total} accounts: {created} created, {updated} updated, {unchanged} unchanged"
		);
		if errors > 0 {
			message.push_str(&format!(", {errors} errors"));
		}

		SyncAccountsOutcome { created, updated, unchanged, errors, message, balance_changes }
	}

	/// Upsert one provider account. Any failure is reported as a string and
	/// isolated by the caller.
	async fn apply_one(
		&self,
		connection_id: Uuid,
		data: &ProviderAccountData,
		balance_changes: &mut Vec<BalanceChange>,
	) -> Result<AccountDelta, String> {
		let currency: Currency = data.currency.parse().map_err(|e| format!("{e}"))?;
		let balance = Money::new(data.balance.clone(), currency);
		let available_balance =
			data.available_balance.clone().map(|amount| Money::new(amount, currency));

		let existing = self
			.accounts
			.find_by_provider_account_id(connection_id, &data.provider_account_id)
			.await
			.map_err(|e| e.to_string())?;

		let Some(mut account) = existing else {
			let now = Utc::now();
			let account = Account::new(NewAccount {
				id: Uuid::now_v7(),
				connection_id,
				provider_account_id: data.provider_account_id.clone(),
				account_number_masked: data.account_number_masked.clone(),
				name: data.name.clone(),
				account_type: normalize::account_type(&data.account_type),
				balance: balance.clone(),
				available_balance,
				currency,
				is_active: data.is_active,
				last_synced_at: Some(now),
				provider_metadata: data.raw_data.clone(),
				created_at: now,
				updated_at: now,
			})
			.map_err(|e| e.to_string())?;
			self.accounts.save(&account).await.map_err(|e| e.to_string())?;

			if !balance.is_zero() {
				balance_changes.push(BalanceChange {
					account_id: account.id,
					previous: BigDecimal::from(0),
					current: balance.amount().clone(),
					currency,
				});
			}
			self.capture_snapshot(&account).await;
			return Ok(AccountDelta::Created)
		};

		let previous_balance = account.balance().amount().clone();
		let mut changed = false;

		if account.balance() != &balance ||
			account.available_balance() != available_balance.as_ref()
		{
			account
				.update_balance(balance.clone(), available_balance)
				.map_err(|e| e.to_string())?;
			changed = true;
		}
		if account.name != data.name {
			account
				.update_from_provider(Some(data.name.clone()), None, None)
				.map_err(|e| e.to_string())?;
			changed = true;
		}
		if account.is_active != data.is_active {
			if data.is_active {
				account.activate();
			} else {
				account.deactivate();
			}
			changed = true;
		}
		if data.raw_data.is_some() && account.provider_metadata != data.raw_data {
			account
				.update_from_provider(None, None, data.raw_data.clone())
				.map_err(|e| e.to_string())?;
			changed = true;
		}

		account.mark_synced();
		self.accounts.save(&account).await.map_err(|e| e.to_string())?;

		if changed {
			if previous_balance != *balance.amount() {
				balance_changes.push(BalanceChange {
					account_id: account.id,
					previous: previous_balance,
					current: balance.amount().clone(),
					currency,
				});
			}
			self.capture_snapshot(&account).await;
			Ok(AccountDelta::Updated)
		} else {
			Ok(AccountDelta::Unchanged)
		}
	}

	/// Snapshots are derived observations; a failed capture is logged and
	/// never fails the sync.
	async fn capture_snapshot(&self, account: &Account) {
		let now = Utc::now();
		let snapshot = BalanceSnapshot::new(NewSnapshot {
			id: Uuid::now_v7(),
			account_id: account.id,
			balance: account.balance().clone(),
			available_balance: account.available_balance().cloned(),
			holdings_value: None,
			cash_value: None,
			currency: account.currency(),
			source: SnapshotSource::AccountSync,
			provider_metadata: None,
			captured_at: now,
			created_at: now,
		});
		match snapshot {
			Ok(snapshot) =>
				if let Err(error) = self.snapshots.save(&snapshot).await {
					tracing::warn!(account_id = %account.id, %error, "snapshot capture failed");
				},
			Err(error) => {
				tracing::warn!(account_id = %account.id, %error, "snapshot capture failed");
			},
		}
	}
}
