//! Row representations and their entity mappings.
//!
//! Rows model the persisted column shapes: Money splits into an amount plus
//! a shared currency column, enums become their string values, metadata is a
//! JSON column, and credentials flatten into the
//! (credential_type, encrypted_credentials, credentials_expires_at) triple.
//! Mapping back into an entity re-runs the entity constructor, so a corrupt
//! row surfaces as [`StoreError::Corrupt`] instead of a broken invariant.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StoreError;
use crate::domain::{
	Account, BalanceSnapshot, Currency, Holding, Money, NewAccount, NewConnection, NewHolding,
	NewSnapshot, NewTransaction, ProviderConnection, ProviderCredentials, Transaction,
};

fn corrupt(entity: &str, id: Uuid, error: impl std::fmt::Display) -> StoreError {
	StoreError::Corrupt(format!("{entity} {id}: {error}"))
}

fn parse_currency(entity: &str, id: Uuid, code: &str) -> Result<Currency, StoreError> {
	code.parse().map_err(|e| corrupt(entity, id, e))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRow {
	pub id: Uuid,
	pub user_id: Uuid,
	pub provider_id: Uuid,
	pub provider_slug: String,
	pub status: String,
	pub alias: Option<String>,
	pub credential_type: Option<String>,
	pub encrypted_credentials: Option<Vec<u8>>,
	pub credentials_expires_at: Option<DateTime<Utc>>,
	pub connected_at: Option<DateTime<Utc>>,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&ProviderConnection> for ConnectionRow {
	fn from(connection: &ProviderConnection) -> Self {
		Self {
			id: connection.id,
			user_id: connection.user_id,
			provider_id: connection.provider_id,
			provider_slug: connection.provider_slug.clone(),
			status: connection.status().as_str().to_string(),
			alias: connection.alias.clone(),
			credential_type: connection
				.credentials()
				.map(|c| c.credential_type().as_str().to_string()),
			encrypted_credentials: connection.credentials().map(|c| c.encrypted_data().to_vec()),
			credentials_expires_at: connection.credentials().and_then(|c| c.expires_at()),
			connected_at: connection.connected_at,
			last_sync_at: connection.last_sync_at,
			created_at: connection.created_at,
			updated_at: connection.updated_at,
		}
	}
}

impl TryFrom<ConnectionRow> for ProviderConnection {
	type Error = StoreError;

	fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
		let credentials = match (row.credential_type, row.encrypted_credentials) {
			(Some(credential_type), Some(data)) => Some(
				ProviderCredentials::new(
					data,
					credential_type.parse().map_err(|e| corrupt("connection", row.id, e))?,
					row.credentials_expires_at,
				)
				.map_err(|e| corrupt("connection", row.id, e))?,
			),
			(None, None) => None,
			_ => {
				return Err(corrupt(
					"connection",
					row.id,
					"credential columns are half-populated",
				))
			},
		};
		ProviderConnection::new(NewConnection {
			id: row.id,
			user_id: row.user_id,
			provider_id: row.provider_id,
			provider_slug: row.provider_slug,
			alias: row.alias,
			status: row.status.parse().map_err(|e| corrupt("connection", row.id, e))?,
			credentials,
			connected_at: row.connected_at,
			last_sync_at: row.last_sync_at,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
		.map_err(|e| corrupt("connection", row.id, e))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRow {
	pub id: Uuid,
	pub connection_id: Uuid,
	pub provider_account_id: String,
	pub account_number_masked: String,
	pub name: String,
	pub account_type: String,
	pub balance: BigDecimal,
	pub currency: String,
	pub available_balance: Option<BigDecimal>,
	pub is_active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountRow {
	fn from(account: &Account) -> Self {
		Self {
			id: account.id,
			connection_id: account.connection_id,
			provider_account_id: account.provider_account_id.clone(),
			account_number_masked: account.account_number_masked.clone(),
			name: account.name.clone(),
			account_type: account.account_type.as_str().to_string(),
			balance: account.balance().amount().clone(),
			currency: account.currency().as_str().to_string(),
			available_balance: account.available_balance().map(|m| m.amount().clone()),
			is_active: account.is_active,
			last_synced_at: account.last_synced_at,
			provider_metadata: account.provider_metadata.clone(),
			created_at: account.created_at,
			updated_at: account.updated_at,
		}
	}
}

impl TryFrom<AccountRow> for Account {
	type Error = StoreError;

	fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
		let currency = parse_currency("account", row.id, &row.currency)?;
		Account::new(NewAccount {
			id: row.id,
			connection_id: row.connection_id,
			provider_account_id: row.provider_account_id,
			account_number_masked: row.account_number_masked,
			name: row.name,
			account_type: row.account_type.parse().map_err(|e| corrupt("account", row.id, e))?,
			balance: Money::new(row.balance, currency),
			available_balance: row.available_balance.map(|amount| Money::new(amount, currency)),
			currency,
			is_active: row.is_active,
			last_synced_at: row.last_synced_at,
			provider_metadata: row.provider_metadata,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
		.map_err(|e| corrupt("account", row.id, e))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
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
	pub transaction_date: NaiveDate,
	pub settlement_date: Option<NaiveDate>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionRow {
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
			transaction_date: transaction.transaction_date,
			settlement_date: transaction.settlement_date,
			provider_metadata: transaction.provider_metadata.clone(),
			created_at: transaction.created_at,
			updated_at: transaction.updated_at,
		}
	}
}

impl TryFrom<TransactionRow> for Transaction {
	type Error = StoreError;

	fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
		let currency = parse_currency("transaction", row.id, &row.currency)?;
		Transaction::new(NewTransaction {
			id: row.id,
			account_id: row.account_id,
			provider_transaction_id: row.provider_transaction_id,
			transaction_type: row
				.transaction_type
				.parse()
				.map_err(|e| corrupt("transaction", row.id, e))?,
			subtype: row.subtype.parse().map_err(|e| corrupt("transaction", row.id, e))?,
			status: row.status.parse().map_err(|e| corrupt("transaction", row.id, e))?,
			amount: Money::new(row.amount, currency),
			description: row.description,
			asset_type: row
				.asset_type
				.map(|t| t.parse())
				.transpose()
				.map_err(|e| corrupt("transaction", row.id, e))?,
			symbol: row.symbol,
			security_name: row.security_name,
			quantity: row.quantity,
			unit_price: row.unit_price.map(|amount| Money::new(amount, currency)),
			commission: row.commission.map(|amount| Money::new(amount, currency)),
			transaction_date: row.transaction_date,
			settlement_date: row.settlement_date,
			provider_metadata: row.provider_metadata,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
		.map_err(|e| corrupt("transaction", row.id, e))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingRow {
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
	pub is_active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&Holding> for HoldingRow {
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
			is_active: holding.is_active,
			last_synced_at: holding.last_synced_at,
			provider_metadata: holding.provider_metadata.clone(),
			created_at: holding.created_at,
			updated_at: holding.updated_at,
		}
	}
}

impl TryFrom<HoldingRow> for Holding {
	type Error = StoreError;

	fn try_from(row: HoldingRow) -> Result<Self, Self::Error> {
		let currency = parse_currency("holding", row.id, &row.currency)?;
		Holding::new(NewHolding {
			id: row.id,
			account_id: row.account_id,
			provider_holding_id: row.provider_holding_id,
			symbol: row.symbol,
			security_name: row.security_name,
			asset_type: row.asset_type.parse().map_err(|e| corrupt("holding", row.id, e))?,
			quantity: row.quantity,
			cost_basis: Money::new(row.cost_basis, currency),
			market_value: Money::new(row.market_value, currency),
			currency,
			average_price: row.average_price.map(|amount| Money::new(amount, currency)),
			current_price: row.current_price.map(|amount| Money::new(amount, currency)),
			is_active: row.is_active,
			last_synced_at: row.last_synced_at,
			provider_metadata: row.provider_metadata,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
		.map_err(|e| corrupt("holding", row.id, e))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
	pub id: Uuid,
	pub account_id: Uuid,
	pub balance: BigDecimal,
	pub available_balance: Option<BigDecimal>,
	pub holdings_value: Option<BigDecimal>,
	pub cash_value: Option<BigDecimal>,
	pub currency: String,
	pub source: String,
	pub provider_metadata: Option<serde_json::Value>,
	pub captured_at: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
}

impl From<&BalanceSnapshot> for SnapshotRow {
	fn from(snapshot: &BalanceSnapshot) -> Self {
		Self {
			id: snapshot.id,
			account_id: snapshot.account_id,
			balance: snapshot.balance().amount().clone(),
			available_balance: snapshot.available_balance().map(|m| m.amount().clone()),
			holdings_value: snapshot.holdings_value().map(|m| m.amount().clone()),
			cash_value: snapshot.cash_value().map(|m| m.amount().clone()),
			currency: snapshot.currency().as_str().to_string(),
			source: snapshot.source.as_str().to_string(),
			provider_metadata: snapshot.provider_metadata.clone(),
			captured_at: snapshot.captured_at,
			created_at: snapshot.created_at,
		}
	}
}

impl TryFrom<SnapshotRow> for BalanceSnapshot {
	type Error = StoreError;

	fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
		let currency = parse_currency("snapshot", row.id, &row.currency)?;
		BalanceSnapshot::new(NewSnapshot {
			id: row.id,
			account_id: row.account_id,
			balance: Money::new(row.balance, currency),
			available_balance: row.available_balance.map(|amount| Money::new(amount, currency)),
			holdings_value: row.holdings_value.map(|amount| Money::new(amount, currency)),
			cash_value: row.cash_value.map(|amount| Money::new(amount, currency)),
			currency,
			source: row.source.parse().map_err(|e| corrupt("snapshot", row.id, e))?,
			provider_metadata: row.provider_metadata,
			captured_at: row.captured_at,
			created_at: row.created_at,
		})
		.map_err(|e| corrupt("snapshot", row.id, e))
	}
}
