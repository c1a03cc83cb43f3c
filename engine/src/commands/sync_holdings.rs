//! SyncHoldings handler.
//!
//! Scoped to one account. Fetched positions are upserted first; any active
//! holding the provider no longer reports is then deactivated in a second
//! sweep. The sweep runs only after every create/update has been applied.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::{normalize, SyncHoldings, SyncHoldingsOutcome, SyncPolicy};
use crate::{
	cipher::CredentialCipher,
	domain::{
		Account, BalanceSnapshot, Currency, Holding, Money, NewHolding, NewSnapshot,
		SnapshotSource,
	},
	events::{publish_event, EventBus, EventKind},
	providers::{ProviderHoldingData, ProviderRegistry},
	store::{AccountStore, ConnectionStore, HoldingStore, SnapshotStore},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncHoldingsError {
	#[error("ACCOUNT_NOT_FOUND: account not found")]
	AccountNotFound,
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: account not owned by user")]
	NotOwnedByUser,
	#[error("CONNECTION_NOT_ACTIVE: provider connection is not active")]
	ConnectionNotActive,
	#[error("CREDENTIALS_INVALID: provider credentials are invalid")]
	CredentialsInvalid,
	#[error("CREDENTIALS_DECRYPTION_FAILED: failed to decrypt provider credentials")]
	CredentialsDecryptionFailed,
	#[error("PROVIDER_ERROR: {0}")]
	Provider(String),
	#[error("RECENTLY_SYNCED: holdings were synced too recently")]
	RecentlySynced,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl SyncHoldingsError {
	pub fn reason_code(&self) -> &'static str {
		match self {
			SyncHoldingsError::AccountNotFound => "account_not_found",
			SyncHoldingsError::ConnectionNotFound => "connection_not_found",
			SyncHoldingsError::NotOwnedByUser => "not_owned_by_user",
			SyncHoldingsError::ConnectionNotActive => "connection_not_active",
			SyncHoldingsError::CredentialsInvalid => "credentials_invalid",
			SyncHoldingsError::CredentialsDecryptionFailed => "credentials_decryption_failed",
			SyncHoldingsError::Provider(_) => "provider_error",
			SyncHoldingsError::RecentlySynced => "recently_synced",
			SyncHoldingsError::Database(_) => "database_error",
		}
	}
}

enum HoldingDelta {
	Created,
	Updated,
	Unchanged,
}

pub struct SyncHoldingsHandler {
	connections: Arc<dyn ConnectionStore>,
	accounts: Arc<dyn AccountStore>,
	holdings: Arc<dyn HoldingStore>,
	snapshots: Arc<dyn SnapshotStore>,
	cipher: Arc<dyn CredentialCipher>,
	registry: Arc<ProviderRegistry>,
	event_bus: Arc<dyn EventBus>,
	policy: SyncPolicy,
}

impl SyncHoldingsHandler {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		connections: Arc<dyn ConnectionStore>,
		accounts: Arc<dyn AccountStore>,
		holdings: Arc<dyn HoldingStore>,
		snapshots: Arc<dyn SnapshotStore>,
		cipher: Arc<dyn CredentialCipher>,
		registry: Arc<ProviderRegistry>,
		event_bus: Arc<dyn EventBus>,
		policy: SyncPolicy,
	) -> Self {
		Self { connections, accounts, holdings, snapshots, cipher, registry, event_bus, policy }
	}

	pub async fn handle(
		&self,
		cmd: SyncHoldings,
	) -> Result<SyncHoldingsOutcome, SyncHoldingsError> {
		publish_event(
			self.event_bus.as_ref(),
			cmd.user_id,
			EventKind::HoldingsSyncAttempted { account_id: cmd.account_id },
		)
		.await;

		match self.sync(&cmd).await {
			Ok(outcome) => {
				let total = outcome.created + outcome.updated + outcome.unchanged;
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::HoldingsSyncSucceeded {
						account_id: cmd.account_id,
						holding_count: total,
					},
				)
				.await;
				Ok(outcome)
			},
			Err(error) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::HoldingsSyncFailed {
						account_id: cmd.account_id,
						reason: error.reason_code().to_string(),
					},
				)
				.await;
				Err(error)
			},
		}
	}

	async fn sync(&self, cmd: &SyncHoldings) -> Result<SyncHoldingsOutcome, SyncHoldingsError> {
		let mut account = self
			.accounts
			.find_by_id(cmd.account_id)
			.await
			.map_err(|e| SyncHoldingsError::Database(e.to_string()))?
			.ok_or(SyncHoldingsError::AccountNotFound)?;

		let connection = self
			.connections
			.find_by_id(account.connection_id)
			.await
			.map_err(|e| SyncHoldingsError::Database(e.to_string()))?
			.ok_or(SyncHoldingsError::ConnectionNotFound)?;

		if connection.user_id != cmd.user_id {
			return Err(SyncHoldingsError::NotOwnedByUser)
		}
		if !connection.is_connected() {
			return Err(SyncHoldingsError::ConnectionNotActive)
		}
		if !cmd.force {
			if let Some(last_synced_at) = account.last_synced_at {
				if Utc::now() - last_synced_at < self.policy.min_sync_interval {
					return Err(SyncHoldingsError::RecentlySynced)
				}
			}
		}

		let credentials =
			connection.credentials().ok_or(SyncHoldingsError::CredentialsInvalid)?;
		let bundle = self
			.cipher
			.decrypt(credentials.encrypted_data())
			.await
			.map_err(|_| SyncHoldingsError::CredentialsDecryptionFailed)?;

		let provider = self
			.registry
			.get(&connection.provider_slug)
			.map_err(|e| SyncHoldingsError::Provider(e.to_string()))?;
		let provider_holdings = provider
			.fetch_holdings(&bundle, &account.provider_account_id)
			.await
			.map_err(|e| SyncHoldingsError::Provider(e.to_string()))?;

		let outcome = self.apply(account.id, provider_holdings).await;

		account.mark_synced();
		self.accounts
			.save(&account)
			.await
			.map_err(|e| SyncHoldingsError::Database(e.to_string()))?;
		self.capture_snapshot(&account).await;

		tracing::info!(
			account_id = %account.id,
			created = outcome.created,
			updated = outcome.updated,
			unchanged = outcome.unchanged,
			deactivated = outcome.deactivated,
			errors = outcome.errors,
			"holdings sync complete"
		);
		Ok(outcome)
	}

	async fn apply(
		&self,
		account_id: Uuid,
		provider_holdings: Vec<ProviderHoldingData>,
	) -> SyncHoldingsOutcome {
		let mut created = 0;
		let mut updated = 0;
		let mut unchanged = 0;
		let mut deactivated = 0;
		let mut errors = 0;

		let mut seen: HashSet<String> = HashSet::new();
		for provider_holding in provider_holdings {
			seen.insert(provider_holding.provider_holding_id.clone());
			match self.apply_one(account_id, &provider_holding).await {
				Ok(HoldingDelta::Created) => created += 1,
				Ok(HoldingDelta::Updated) => updated += 1,
				Ok(HoldingDelta::Unchanged) => unchanged += 1,
				Err(error) => {
					tracing::warn!(
						%account_id,
						provider_holding_id = %provider_holding.provider_holding_id,
						error,
						"skipping holding"
					);
					errors += 1;
				},
			}
		}

		// Positions the provider stopped reporting are closed, not deleted.
		// This runs strictly after the upsert pass above.
		match self.holdings.list_by_account(account_id, true).await {
			Ok(active_holdings) =>
				for mut holding in active_holdings {
					if !seen.contains(&holding.provider_holding_id) {
						holding.deactivate();
						match self.holdings.save(&holding).await {
							Ok(()) => deactivated += 1,
							Err(error) => {
								tracing::warn!(holding_id = %holding.id, %error, "deactivation failed");
								errors += 1;
							},
						}
					}
				},
			Err(error) => {
				tracing::warn!(%account_id, %error, "deactivation sweep failed");
				errors += 1;
			},
		}

		let total = created + updated + unchanged;
		let mut message = format!(
			"Synced {total} holdings: {created} created, {updated} updated, {unchanged} unchanged"
		);
		if deactivated > 0 {
			message.push_str(&format!(", {deactivated} deactivated"));
		}
		if errors > 0 {
			message.push_str(&format!(", {errors} errors"));
		}

		SyncHoldingsOutcome { created, updated, unchanged, deactivated, errors, message }
	}

	async fn apply_one(
		&self,
		account_id: Uuid,
		data: &ProviderHoldingData,
	) -> Result<HoldingDelta, String> {
		let existing = self
			.holdings
			.find_by_provider_holding_id(account_id, &data.provider_holding_id)
			.await
			.map_err(|e| e.to_string())?;

		let Some(mut holding) = existing else {
			let currency: Currency = data.currency.parse().map_err(|e| format!("{e}"))?;
			let money = |amount: &bigdecimal::BigDecimal| Money::new(amount.clone(), currency);
			let now = Utc::now();
			let holding = Holding::new(NewHolding {
				id: Uuid::now_v7(),
				account_id,
				provider_holding_id: data.provider_holding_id.clone(),
				symbol: data.symbol.clone(),
				security_name: data.security_name.clone(),
				asset_type: normalize::asset_type(&data.asset_type),
				quantity: data.quantity.clone(),
				cost_basis: money(&data.cost_basis),
				market_value: money(&data.market_value),
				currency,
				average_price: data.average_price.as_ref().map(&money),
				current_price: data.current_price.as_ref().map(&money),
				is_active: true,
				last_synced_at: Some(now),
				provider_metadata: data.raw_data.clone(),
				created_at: now,
				updated_at: now,
			})
			.map_err(|e| e.to_string())?;
			self.holdings.save(&holding).await.map_err(|e| e.to_string())?;
			return Ok(HoldingDelta::Created)
		};

		// Positions are priced in the account's currency; provider data is
		// interpreted in the holding's own currency as the reference point.
		let currency = holding.currency();
		let money = |amount: &bigdecimal::BigDecimal| Money::new(amount.clone(), currency);
		let cost_basis = money(&data.cost_basis);
		let market_value = money(&data.market_value);
		let current_price = data.current_price.as_ref().map(&money);

		let changed = holding.quantity() != &data.quantity ||
			holding.cost_basis() != &cost_basis ||
			holding.market_value() != &market_value ||
			(current_price.is_some() && holding.current_price != current_price) ||
			(data.raw_data.is_some() && holding.provider_metadata != data.raw_data);

		if changed {
			holding
				.update_from_sync(
					data.quantity.clone(),
					cost_basis,
					market_value,
					current_price,
					data.raw_data.clone(),
				)
				.map_err(|e| e.to_string())?;
			self.holdings.save(&holding).await.map_err(|e| e.to_string())?;
			Ok(HoldingDelta::Updated)
		} else {
			holding.mark_synced();
			self.holdings.save(&holding).await.map_err(|e| e.to_string())?;
			Ok(HoldingDelta::Unchanged)
		}
	}

	/// Balance observation after a holdings refresh: the account balance
	/// plus the value of its active positions in the account currency.
	async fn capture_snapshot(&self, account: &Account) {
		let holdings_value = match self.holdings.list_by_account(account.id, true).await {
			Ok(holdings) => {
				let mut total = Money::zero(account.currency());
				for holding in &holdings {
					if let Ok(sum) = total.checked_add(holding.market_value()) {
						total = sum;
					}
				}
				Some(total)
			},
			Err(_) => None,
		};

		let now = Utc::now();
		let snapshot = BalanceSnapshot::new(NewSnapshot {
			id: Uuid::now_v7(),
			account_id: account.id,
			balance: account.balance().clone(),
			available_balance: account.available_balance().cloned(),
			holdings_value,
			cash_value: None,
			currency: account.currency(),
			source: SnapshotSource::HoldingsSync,
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

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		cipher::KeyRingCipher,
		domain::{
			AccountType, ConnectionStatus, CredentialType, NewAccount, NewConnection,
			ProviderConnection, ProviderCredentials,
		},
		events::{EventPhase, RecordingBus},
		providers::{
			CredentialBundle, ProviderAccountData, ProviderAdapter, ProviderError,
			ProviderTransactionData,
		},
		store::memory::MemoryStore,
	};
	use async_trait::async_trait;
	use chrono::NaiveDate;

	struct StaticProvider {
		holdings: Vec<ProviderHoldingData>,
	}

	#[async_trait]
	impl ProviderAdapter for StaticProvider {
		async fn fetch_accounts(
			&self,
			_credentials: &CredentialBundle,
		) -> Result<Vec<ProviderAccountData>, ProviderError> {
			Ok(vec![])
		}

		async fn fetch_transactions(
			&self,
			_credentials: &CredentialBundle,
			_provider_account_id: &str,
			_start_date: Option<NaiveDate>,
			_end_date: Option<NaiveDate>,
		) -> Result<Vec<ProviderTransactionData>, ProviderError> {
			Ok(vec![])
		}

		async fn fetch_holdings(
			&self,
			_credentials: &CredentialBundle,
			_provider_account_id: &str,
		) -> Result<Vec<ProviderHoldingData>, ProviderError> {
			Ok(self.holdings.clone())
		}
	}

	fn position(id: &str, quantity: &str, market_value: &str) -> ProviderHoldingData {
		ProviderHoldingData {
			provider_holding_id: id.to_string(),
			symbol: id.to_string(),
			security_name: format!("{id} Inc."),
			asset_type: "equity".to_string(),
			quantity: quantity.parse().unwrap(),
			cost_basis: "100".parse().unwrap(),
			market_value: market_value.parse().unwrap(),
			currency: "USD".to_string(),
			average_price: None,
			current_price: None,
			raw_data: None,
		}
	}

	struct Fixture {
		store: Arc<MemoryStore>,
		bus: Arc<RecordingBus>,
		user_id: Uuid,
		account_id: Uuid,
	}

	impl Fixture {
		fn handler(&self, holdings: Vec<ProviderHoldingData>) -> SyncHoldingsHandler {
			let cipher = Arc::new(KeyRingCipher::new(vec![(1, [1u8; 32])], 1).unwrap());
			let mut registry = ProviderRegistry::new();
			registry.register(
				"schwab",
				Uuid::now_v7(),
				Arc::new(StaticProvider { holdings }),
			);
			SyncHoldingsHandler::new(
				self.store.clone(),
				self.store.clone(),
				self.store.clone(),
				self.store.clone(),
				cipher,
				Arc::new(registry),
				self.bus.clone(),
				SyncPolicy::default(),
			)
		}

		fn cmd(&self) -> SyncHoldings {
			SyncHoldings { user_id: self.user_id, account_id: self.account_id, force: true }
		}
	}

	async fn fixture() -> Fixture {
		let store = Arc::new(MemoryStore::new());
		let bus = Arc::new(RecordingBus::new());
		let cipher = KeyRingCipher::new(vec![(1, [1u8; 32])], 1).unwrap();
		let sealed = cipher
			.encrypt(&CredentialBundle::new().with("access_token", "tok"))
			.await
			.unwrap();

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
				ProviderCredentials::new(sealed, CredentialType::Oauth2, None).unwrap(),
			),
			connected_at: Some(now),
			last_sync_at: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		ConnectionStore::save(store.as_ref(), &connection).await.unwrap();

		let account = crate::domain::Account::new(NewAccount {
			id: Uuid::now_v7(),
			connection_id: connection.id,
			provider_account_id: "ACC-1".to_string(),
			account_number_masked: "****1".to_string(),
			name: "Brokerage".to_string(),
			account_type: AccountType::Brokerage,
			balance: Money::new("1000".parse().unwrap(), crate::domain::Currency::USD),
			available_balance: None,
			currency: crate::domain::Currency::USD,
			is_active: true,
			last_synced_at: None,
			provider_metadata: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		AccountStore::save(store.as_ref(), &account).await.unwrap();

		Fixture { store, bus, user_id, account_id: account.id }
	}

	#[tokio::test]
	async fn first_sync_creates_holdings() {
		let f = fixture().await;
		let handler = f.handler(vec![position("AAPL", "10", "1700"), position("VTI", "5", "1200")]);

		let outcome = handler.handle(f.cmd()).await.unwrap();
		assert_eq!((outcome.created, outcome.updated, outcome.deactivated), (2, 0, 0));

		assert_eq!(f.bus.phases(), vec![EventPhase::Attempted, EventPhase::Succeeded]);
		assert!(matches!(
			f.bus.events()[1].kind,
			EventKind::HoldingsSyncSucceeded { holding_count: 2, .. }
		));

		let stored =
			HoldingStore::list_by_account(f.store.as_ref(), f.account_id, true).await.unwrap();
		assert_eq!(stored.len(), 2);
	}

	#[tokio::test]
	async fn identical_resync_is_all_unchanged() {
		let f = fixture().await;
		let positions = vec![position("AAPL", "10", "1700")];
		f.handler(positions.clone()).handle(f.cmd()).await.unwrap();

		let outcome = f.handler(positions).handle(f.cmd()).await.unwrap();
		assert_eq!(
			(outcome.created, outcome.updated, outcome.unchanged, outcome.deactivated),
			(0, 0, 1, 0)
		);
	}

	#[tokio::test]
	async fn vanished_positions_are_deactivated_after_the_upsert_pass() {
		let f = fixture().await;
		f.handler(vec![position("AAPL", "10", "1700"), position("VTI", "5", "1200")])
			.handle(f.cmd())
			.await
			.unwrap();

		let outcome =
			f.handler(vec![position("AAPL", "12", "2000")]).handle(f.cmd()).await.unwrap();
		assert_eq!((outcome.updated, outcome.deactivated), (1, 1));

		let active =
			HoldingStore::list_by_account(f.store.as_ref(), f.account_id, true).await.unwrap();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].symbol, "AAPL");

		let all =
			HoldingStore::list_by_account(f.store.as_ref(), f.account_id, false).await.unwrap();
		assert_eq!(all.len(), 2);
	}

	#[tokio::test]
	async fn snapshot_captures_holdings_value() {
		let f = fixture().await;
		f.handler(vec![position("AAPL", "10", "1700"), position("VTI", "5", "1200")])
			.handle(f.cmd())
			.await
			.unwrap();

		let snapshot = SnapshotStore::find_latest_by_account_id(f.store.as_ref(), f.account_id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(snapshot.source, SnapshotSource::HoldingsSync);
		assert_eq!(
			snapshot.holdings_value().unwrap().amount(),
			&"2900".parse::<bigdecimal::BigDecimal>().unwrap()
		);
	}

	#[tokio::test]
	async fn per_position_failures_are_isolated() {
		let f = fixture().await;
		let mut bad = position("BAD", "1", "1");
		bad.currency = "???".to_string();
		let outcome =
			f.handler(vec![position("AAPL", "1", "1"), bad]).handle(f.cmd()).await.unwrap();
		assert_eq!((outcome.created, outcome.errors), (1, 1));
	}

	#[tokio::test]
	async fn missing_account_fails() {
		let f = fixture().await;
		let handler = f.handler(vec![]);
		let result = handler
			.handle(SyncHoldings { user_id: f.user_id, account_id: Uuid::now_v7(), force: true })
			.await;
		assert_eq!(result, Err(SyncHoldingsError::AccountNotFound));
		assert_eq!(f.bus.events()[1].kind.reason(), Some("account_not_found"));
	}

	#[tokio::test]
	async fn recently_synced_account_is_refused() {
		let f = fixture().await;
		f.handler(vec![]).handle(f.cmd()).await.unwrap();

		// The sync above stamped last_synced_at.
		let result = f
			.handler(vec![])
			.handle(SyncHoldings { user_id: f.user_id, account_id: f.account_id, force: false })
			.await;
		assert_eq!(result, Err(SyncHoldingsError::RecentlySynced));
	}
}
