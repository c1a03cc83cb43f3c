//! Shared harness for the end-to-end suites: in-memory stores, a recording
//! bus, a real cipher, and a scriptable provider adapter.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ledgerlink_engine::{
	cipher::{CredentialCipher, KeyRingCipher},
	domain::{
		ConnectionStatus, CredentialType, NewConnection, ProviderConnection,
		ProviderCredentials,
	},
	events::RecordingBus,
	providers::{
		CredentialBundle, ProviderAccountData, ProviderAdapter, ProviderError,
		ProviderHoldingData, ProviderRegistry, ProviderTransactionData,
	},
	store::{memory::MemoryStore, ConnectionStore},
};
use uuid::Uuid;

/// Provider stub returning canned data and counting calls.
#[derive(Default)]
pub struct StubProvider {
	pub accounts: Vec<ProviderAccountData>,
	pub transactions: Vec<ProviderTransactionData>,
	pub holdings: Vec<ProviderHoldingData>,
	pub calls: AtomicUsize,
}

impl StubProvider {
	pub fn with_accounts(accounts: Vec<ProviderAccountData>) -> Self {
		Self { accounts, ..Default::default() }
	}

	pub fn call_count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl ProviderAdapter for StubProvider {
	async fn fetch_accounts(
		&self,
		_credentials: &CredentialBundle,
	) -> Result<Vec<ProviderAccountData>, ProviderError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.accounts.clone())
	}

	async fn fetch_transactions(
		&self,
		_credentials: &CredentialBundle,
		_provider_account_id: &str,
		_start_date: Option<NaiveDate>,
		_end_date: Option<NaiveDate>,
	) -> Result<Vec<ProviderTransactionData>, ProviderError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.transactions.clone())
	}

	async fn fetch_holdings(
		&self,
		_credentials: &CredentialBundle,
		_provider_account_id: &str,
	) -> Result<Vec<ProviderHoldingData>, ProviderError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.holdings.clone())
	}
}

pub struct Harness {
	pub store: Arc<MemoryStore>,
	pub bus: Arc<RecordingBus>,
	pub cipher: Arc<KeyRingCipher>,
}

impl Harness {
	pub fn new() -> Self {
		Self {
			store: Arc::new(MemoryStore::new()),
			bus: Arc::new(RecordingBus::new()),
			cipher: Arc::new(KeyRingCipher::new(vec![(1, [42u8; 32])], 1).unwrap()),
		}
	}

	/// Credentials sealed by the harness cipher, as the auth layer would
	/// deliver them.
	pub async fn sealed_credentials(
		&self,
		expires_at: Option<DateTime<Utc>>,
	) -> ProviderCredentials {
		let bundle = CredentialBundle::new().with("access_token", "tok-abc");
		let sealed = self.cipher.encrypt(&bundle).await.unwrap();
		ProviderCredentials::new(sealed, CredentialType::Oauth2, expires_at).unwrap()
	}

	pub fn registry_with(&self, slug: &str, adapter: Arc<dyn ProviderAdapter>) -> Arc<ProviderRegistry> {
		let mut registry = ProviderRegistry::new();
		registry.register(slug, Uuid::now_v7(), adapter);
		Arc::new(registry)
	}

	pub async fn seed_connection(
		&self,
		user_id: Uuid,
		slug: &str,
		last_sync_at: Option<DateTime<Utc>>,
	) -> ProviderConnection {
		let now = Utc::now();
		let connection = ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id,
			provider_id: Uuid::now_v7(),
			provider_slug: slug.to_string(),
			alias: None,
			status: ConnectionStatus::Active,
			credentials: Some(self.sealed_credentials(None).await),
			connected_at: Some(now),
			last_sync_at,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		ConnectionStore::save(self.store.as_ref(), &connection).await.unwrap();
		connection
	}
}

pub fn provider_account(id: &str, balance: &str) -> ProviderAccountData {
	ProviderAccountData {
		provider_account_id: id.to_string(),
		account_number_masked: format!("****{id}"),
		name: format!("Account {id}"),
		account_type: "brokerage".to_string(),
		balance: balance.parse().unwrap(),
		currency: "USD".to_string(),
		available_balance: None,
		is_active: true,
		raw_data: None,
	}
}

pub fn provider_holding(id: &str, quantity: &str, market_value: &str) -> ProviderHoldingData {
	ProviderHoldingData {
		provider_holding_id: id.to_string(),
		symbol: id.to_string(),
		security_name: format!("{id} Inc."),
		asset_type: "equity".to_string(),
		quantity: quantity.parse().unwrap(),
		cost_basis: "1000".parse().unwrap(),
		market_value: market_value.parse().unwrap(),
		currency: "USD".to_string(),
		average_price: None,
		current_price: None,
		raw_data: None,
	}
}
