//! Holding queries.

use std::{collections::BTreeMap, sync::Arc};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
	domain::Holding,
	ownership::{OwnershipError, OwnershipVerifier},
	store::HoldingStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HoldingQueryError {
	#[error("ACCOUNT_NOT_FOUND: account not found")]
	AccountNotFound,
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: account not owned by user")]
	NotOwnedByUser,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl From<OwnershipError> for HoldingQueryError {
	fn from(error: OwnershipError) -> Self {
		match error {
			OwnershipError::NotOwnedByUser => HoldingQueryError::NotOwnedByUser,
			OwnershipError::ConnectionNotFound => HoldingQueryError::ConnectionNotFound,
			OwnershipError::Store(detail) => HoldingQueryError::Database(detail),
			_ => HoldingQueryError::AccountNotFound,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingView {
	pub id: Uuid,
	pub account_id: Uuid,
	pub provider_holding_id: String,
	pub symbol: String,
	pub security_name: String,
	pub asset_type: String,
	pub quantity: BigDecimal,
	pub cost_basis: BigDecimal,
	pub market_value: BigDecimal,
	pub currency: String,
	pub average_price: Option<BigDecimal>,
	pub current_price: Option<BigDecimal>,
	pub unrealized_gain_loss: BigDecimal,
	pub unrealized_gain_loss_percent: BigDecimal,
	pub is_active: bool,
	pub is_profitable: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&Holding> for HoldingView {
	fn from(holding: &Holding) -> Self {
		Self {
			id: holding.id,
			account_id: holding.account_id,
			provider_holding_id: holding.provider_holding_id.clone(),
			symbol: holding.symbol.clone(),
			security_name: holding.security_name.clone(),
			asset_type: holding.asset_type.as_str().to_string(),
			quantity: holding.quantity().clone(),
			cost_basis: holding.cost_basis().amount().clone(),
			market_value: holding.market_value().amount().clone(),
			currency: holding.currency().as_str().to_string(),
			average_price: holding.average_price.as_ref().map(|m| m.amount().clone()),
			current_price: holding.current_price.as_ref().map(|m| m.amount().clone()),
			unrealized_gain_loss: holding.unrealized_gain_loss().amount().clone(),
			unrealized_gain_loss_percent: holding.unrealized_gain_loss_percent(),
			is_active: holding.is_active,
			is_profitable: holding.is_profitable(),
			last_synced_at: holding.last_synced_at,
			created_at: holding.created_at,
			updated_at: holding.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingListView {
	pub holdings: Vec<HoldingView>,
	pub total_count: usize,
	pub active_count: usize,
	pub total_market_value_by_currency: BTreeMap<String, String>,
	pub total_cost_basis_by_currency: BTreeMap<String, String>,
	pub total_unrealized_gain_loss_by_currency: BTreeMap<String, String>,
}

fn build_list_view(holdings: Vec<Holding>) -> HoldingListView {
	let mut market_value: BTreeMap<String, BigDecimal> = BTreeMap::new();
	let mut cost_basis: BTreeMap<String, BigDecimal> = BTreeMap::new();
	let mut gain_loss: BTreeMap<String, BigDecimal> = BTreeMap::new();
	let mut active_count = 0;

	for holding in &holdings {
		if holding.is_active {
			active_count += 1;
		}
		let currency = holding.currency().as_str().to_string();
		*market_value.entry(currency.clone()).or_insert_with(|| BigDecimal::from(0)) +=
			holding.market_value().amount();
		*cost_basis.entry(currency.clone()).or_insert_with(|| BigDecimal::from(0)) +=
			holding.cost_basis().amount();
		*gain_loss.entry(currency).or_insert_with(|| BigDecimal::from(0)) +=
			holding.unrealized_gain_loss().amount();
	}

	let stringify = |totals: BTreeMap<String, BigDecimal>| {
		totals.into_iter().map(|(currency, total)| (currency, total.to_string())).collect()
	};

	HoldingListView {
		total_count: holdings.len(),
		active_count,
		total_market_value_by_currency: stringify(market_value),
		total_cost_basis_by_currency: stringify(cost_basis),
		total_unrealized_gain_loss_by_currency: stringify(gain_loss),
		holdings: holdings.iter().map(HoldingView::from).collect(),
	}
}

/// Filters are applied in memory after the fetch: provider data sets are
/// small per account and the asset/symbol axes have no index.
fn apply_filters(
	holdings: &mut Vec<Holding>,
	asset_type: Option<&str>,
	symbol: Option<&str>,
) {
	if let Some(asset_type) = asset_type {
		holdings.retain(|holding| holding.asset_type.as_str() == asset_type);
	}
	if let Some(symbol) = symbol {
		holdings.retain(|holding| holding.symbol == symbol);
	}
}

#[derive(Debug, Clone)]
pub struct ListHoldingsByAccount {
	pub user_id: Uuid,
	pub account_id: Uuid,
	pub active_only: bool,
	pub asset_type: Option<String>,
	pub symbol: Option<String>,
}

pub struct ListHoldingsByAccountHandler {
	holdings: Arc<dyn HoldingStore>,
	verifier: Arc<OwnershipVerifier>,
}

impl ListHoldingsByAccountHandler {
	pub fn new(holdings: Arc<dyn HoldingStore>, verifier: Arc<OwnershipVerifier>) -> Self {
		Self { holdings, verifier }
	}

	pub async fn handle(
		&self,
		query: ListHoldingsByAccount,
	) -> Result<HoldingListView, HoldingQueryError> {
		self.verifier
			.verify_account_ownership_only(query.account_id, query.user_id)
			.await?;

		let mut holdings = self
			.holdings
			.list_by_account(query.account_id, query.active_only)
			.await
			.map_err(|e| HoldingQueryError::Database(e.to_string()))?;
		apply_filters(&mut holdings, query.asset_type.as_deref(), query.symbol.as_deref());
		Ok(build_list_view(holdings))
	}
}

#[derive(Debug, Clone)]
pub struct ListHoldingsByUser {
	pub user_id: Uuid,
	pub active_only: bool,
	pub asset_type: Option<String>,
	pub symbol: Option<String>,
}

pub struct ListHoldingsByUserHandler {
	holdings: Arc<dyn HoldingStore>,
}

impl ListHoldingsByUserHandler {
	pub fn new(holdings: Arc<dyn HoldingStore>) -> Self {
		Self { holdings }
	}

	pub async fn handle(
		&self,
		query: ListHoldingsByUser,
	) -> Result<HoldingListView, HoldingQueryError> {
		let mut holdings = self
			.holdings
			.list_by_user(query.user_id, query.active_only)
			.await
			.map_err(|e| HoldingQueryError::Database(e.to_string()))?;
		apply_filters(&mut holdings, query.asset_type.as_deref(), query.symbol.as_deref());
		Ok(build_list_view(holdings))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		domain::{
			Account, AccountType, AssetType, ConnectionStatus, CredentialType, Currency, Money,
			NewAccount, NewConnection, NewHolding, ProviderConnection, ProviderCredentials,
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

	async fn seed_holding(
		f: &Fixture,
		symbol: &str,
		asset_type: AssetType,
		cost: &str,
		market: &str,
		is_active: bool,
	) {
		let now = Utc::now();
		let holding = crate::domain::Holding::new(NewHolding {
			id: Uuid::now_v7(),
			account_id: f.account_id,
			provider_holding_id: format!("POS-{symbol}"),
			symbol: symbol.to_string(),
			security_name: format!("{symbol} Inc."),
			asset_type,
			quantity: "1".parse().unwrap(),
			cost_basis: Money::new(cost.parse().unwrap(), Currency::USD),
			market_value: Money::new(market.parse().unwrap(), Currency::USD),
			currency: Currency::USD,
			average_price: None,
			current_price: None,
			is_active,
			last_synced_at: None,
			provider_metadata: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		HoldingStore::save(f.store.as_ref(), &holding).await.unwrap();
	}

	fn account_handler(f: &Fixture) -> ListHoldingsByAccountHandler {
		let verifier = Arc::new(OwnershipVerifier::new(
			f.store.clone(),
			f.store.clone(),
			f.store.clone(),
			f.store.clone(),
		));
		ListHoldingsByAccountHandler::new(f.store.clone(), verifier)
	}

	#[tokio::test]
	async fn aggregates_and_projects_gain_loss() {
		let f = fixture().await;
		seed_holding(&f, "AAPL", AssetType::Equity, "100", "150", true).await;
		seed_holding(&f, "VTI", AssetType::Etf, "200", "180", true).await;

		let view = account_handler(&f)
			.handle(ListHoldingsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				active_only: true,
				asset_type: None,
				symbol: None,
			})
			.await
			.unwrap();

		assert_eq!(view.total_count, 2);
		assert_eq!(view.total_market_value_by_currency["USD"], "330");
		assert_eq!(view.total_cost_basis_by_currency["USD"], "300");
		assert_eq!(view.total_unrealized_gain_loss_by_currency["USD"], "30");

		let aapl = view.holdings.iter().find(|h| h.symbol == "AAPL").unwrap();
		assert_eq!(aapl.unrealized_gain_loss, "50".parse::<BigDecimal>().unwrap());
		assert!(aapl.is_profitable);
	}

	#[tokio::test]
	async fn filters_apply_in_memory() {
		let f = fixture().await;
		seed_holding(&f, "AAPL", AssetType::Equity, "100", "150", true).await;
		seed_holding(&f, "VTI", AssetType::Etf, "200", "180", true).await;
		let handler = account_handler(&f);

		let etfs = handler
			.handle(ListHoldingsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				active_only: true,
				asset_type: Some("etf".to_string()),
				symbol: None,
			})
			.await
			.unwrap();
		assert_eq!(etfs.total_count, 1);
		assert_eq!(etfs.holdings[0].symbol, "VTI");

		let by_symbol = handler
			.handle(ListHoldingsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				active_only: true,
				asset_type: None,
				symbol: Some("AAPL".to_string()),
			})
			.await
			.unwrap();
		assert_eq!(by_symbol.total_count, 1);
	}

	#[tokio::test]
	async fn inactive_positions_are_excluded_when_asked() {
		let f = fixture().await;
		seed_holding(&f, "AAPL", AssetType::Equity, "100", "150", true).await;
		seed_holding(&f, "GONE", AssetType::Equity, "10", "0", false).await;
		let handler = account_handler(&f);

		let active = handler
			.handle(ListHoldingsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				active_only: true,
				asset_type: None,
				symbol: None,
			})
			.await
			.unwrap();
		assert_eq!((active.total_count, active.active_count), (1, 1));
	}

	#[tokio::test]
	async fn ownership_guards_the_account_variant() {
		let f = fixture().await;
		let result = account_handler(&f)
			.handle(ListHoldingsByAccount {
				user_id: Uuid::now_v7(),
				account_id: f.account_id,
				active_only: true,
				asset_type: None,
				symbol: None,
			})
			.await;
		assert_eq!(result, Err(HoldingQueryError::NotOwnedByUser));
	}

	#[tokio::test]
	async fn user_wide_listing_spans_accounts() {
		let f = fixture().await;
		seed_holding(&f, "AAPL", AssetType::Equity, "100", "150", true).await;

		let view = ListHoldingsByUserHandler::new(f.store.clone())
			.handle(ListHoldingsByUser {
				user_id: f.user_id,
				active_only: true,
				asset_type: None,
				symbol: None,
			})
			.await
			.unwrap();
		assert_eq!(view.total_count, 1);

		let stranger = ListHoldingsByUserHandler::new(f.store.clone())
			.handle(ListHoldingsByUser {
				user_id: Uuid::now_v7(),
				active_only: true,
				asset_type: None,
				symbol: None,
			})
			.await
			.unwrap();
		assert_eq!(stranger.total_count, 0);
	}
}
