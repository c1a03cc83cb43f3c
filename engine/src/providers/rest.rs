//! REST provider adapter.
//!
//! Drives JSON-over-HTTPS provider APIs that authenticate with either an
//! OAuth bearer token or a static API key header. Every request carries a
//! timeout; a timeout is a normal failed fetch, not a hang.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

use super::{
	CredentialBundle, ProviderAccountData, ProviderAdapter, ProviderError,
	ProviderHoldingData, ProviderTransactionData,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum RestAuth {
	/// `Authorization: Bearer <access_token>` from the credential bundle.
	BearerToken,
	/// A static key sent in the named header, from the bundle's `api_key`.
	ApiKeyHeader(&'static str),
}

pub struct RestProvider {
	client: reqwest::Client,
	base_url: String,
	auth: RestAuth,
}

impl RestProvider {
	pub fn new(base_url: &str, auth: RestAuth) -> Result<Self, ProviderError> {
		let client = reqwest::Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(|e| ProviderError::Transport(e.to_string()))?;
		Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), auth })
	}

	fn authorize(
		&self,
		request: reqwest::RequestBuilder,
		credentials: &CredentialBundle,
	) -> Result<reqwest::RequestBuilder, ProviderError> {
		Ok(match &self.auth {
			RestAuth::BearerToken => request.bearer_auth(credentials.require("access_token")?),
			RestAuth::ApiKeyHeader(header) =>
				request.header(*header, credentials.require("api_key")?),
		})
	}

	async fn get_json<T: serde::de::DeserializeOwned>(
		&self,
		path: &str,
		query: &[(&str, String)],
		credentials: &CredentialBundle,
	) -> Result<T, ProviderError> {
		let request = self
			.authorize(self.client.get(format!("{}{path}", self.base_url)), credentials)?
			.query(query);

		let response = request.send().await.map_err(|e| {
			if e.is_timeout() {
				ProviderError::Timeout
			} else {
				ProviderError::Transport(e.to_string())
			}
		})?;

		let status = response.status();
		if status == reqwest::StatusCode::UNAUTHORIZED ||
			status == reqwest::StatusCode::FORBIDDEN
		{
			return Err(ProviderError::Unauthorized(status.to_string()))
		}
		if !status.is_success() {
			return Err(ProviderError::Transport(format!("unexpected status {status}")))
		}

		response
			.json::<T>()
			.await
			.map_err(|e| ProviderError::MalformedResponse(e.to_string()))
	}
}

// Wire shapes. Amounts travel as strings so provider APIs cannot smuggle
// binary floating point into the engine.

#[derive(Debug, Deserialize)]
struct AccountsEnvelope {
	accounts: Vec<WireAccount>,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
	id: String,
	#[serde(default)]
	number_masked: Option<String>,
	name: String,
	#[serde(rename = "type")]
	account_type: String,
	balance: String,
	currency: String,
	#[serde(default)]
	available_balance: Option<String>,
	#[serde(default = "default_true")]
	is_active: bool,
	#[serde(default)]
	raw: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TransactionsEnvelope {
	transactions: Vec<WireTransaction>,
}

#[derive(Debug, Deserialize)]
struct WireTransaction {
	id: String,
	#[serde(rename = "type")]
	transaction_type: String,
	#[serde(default)]
	subtype: Option<String>,
	#[serde(default)]
	status: Option<String>,
	amount: String,
	currency: String,
	description: String,
	#[serde(default)]
	asset_type: Option<String>,
	#[serde(default)]
	symbol: Option<String>,
	#[serde(default)]
	security_name: Option<String>,
	#[serde(default)]
	quantity: Option<String>,
	#[serde(default)]
	unit_price: Option<String>,
	#[serde(default)]
	commission: Option<String>,
	date: NaiveDate,
	#[serde(default)]
	settlement_date: Option<NaiveDate>,
	#[serde(default)]
	raw: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HoldingsEnvelope {
	holdings: Vec<WireHolding>,
}

#[derive(Debug, Deserialize)]
struct WireHolding {
	id: String,
	symbol: String,
	#[serde(default)]
	security_name: Option<String>,
	asset_type: String,
	quantity: String,
	cost_basis: String,
	market_value: String,
	currency: String,
	#[serde(default)]
	average_price: Option<String>,
	#[serde(default)]
	current_price: Option<String>,
	#[serde(default)]
	raw: Option<serde_json::Value>,
}

fn default_true() -> bool {
	true
}

fn decimal(field: &str, value: &str) -> Result<BigDecimal, ProviderError> {
	value
		.parse()
		.map_err(|_| ProviderError::MalformedResponse(format!("bad decimal in {field}: {value}")))
}

fn optional_decimal(
	field: &str,
	value: Option<&String>,
) -> Result<Option<BigDecimal>, ProviderError> {
	value.map(|v| decimal(field, v)).transpose()
}

impl TryFrom<WireAccount> for ProviderAccountData {
	type Error = ProviderError;

	fn try_from(wire: WireAccount) -> Result<Self, Self::Error> {
		Ok(Self {
			balance: decimal("balance", &wire.balance)?,
			available_balance: optional_decimal(
				"available_balance",
				wire.available_balance.as_ref(),
			)?,
			account_number_masked: wire
				.number_masked
				.unwrap_or_else(|| masked_suffix(&wire.id)),
			provider_account_id: wire.id,
			name: wire.name,
			account_type: wire.account_type,
			currency: wire.currency,
			is_active: wire.is_active,
			raw_data: wire.raw,
		})
	}
}

impl TryFrom<WireTransaction> for ProviderTransactionData {
	type Error = ProviderError;

	fn try_from(wire: WireTransaction) -> Result<Self, Self::Error> {
		Ok(Self {
			amount: decimal("amount", &wire.amount)?,
			quantity: optional_decimal("quantity", wire.quantity.as_ref())?,
			unit_price: optional_decimal("unit_price", wire.unit_price.as_ref())?,
			commission: optional_decimal("commission", wire.commission.as_ref())?,
			provider_transaction_id: wire.id,
			transaction_type: wire.transaction_type,
			subtype: wire.subtype,
			status: wire.status.unwrap_or_else(|| "SETTLED".to_string()),
			currency: wire.currency,
			description: wire.description,
			asset_type: wire.asset_type,
			symbol: wire.symbol,
			security_name: wire.security_name,
			transaction_date: wire.date,
			settlement_date: wire.settlement_date,
			raw_data: wire.raw,
		})
	}
}

impl TryFrom<WireHolding> for ProviderHoldingData {
	type Error = ProviderError;

	fn try_from(wire: WireHolding) -> Result<Self, Self::Error> {
		Ok(Self {
			quantity: decimal("quantity", &wire.quantity)?,
			cost_basis: decimal("cost_basis", &wire.cost_basis)?,
			market_value: decimal("market_value", &wire.market_value)?,
			average_price: optional_decimal("average_price", wire.average_price.as_ref())?,
			current_price: optional_decimal("current_price", wire.current_price.as_ref())?,
			provider_holding_id: wire.id,
			security_name: wire.security_name.unwrap_or_else(|| wire.symbol.clone()),
			symbol: wire.symbol,
			asset_type: wire.asset_type,
			currency: wire.currency,
			raw_data: wire.raw,
		})
	}
}

fn masked_suffix(identifier: &str) -> String {
	let suffix: String = identifier
		.chars()
		.rev()
		.take(4)
		.collect::<Vec<char>>()
		.into_iter()
		.rev()
		.collect();
	format!("****{suffix}")
}

#[async_trait]
impl ProviderAdapter for RestProvider {
	async fn fetch_accounts(
		&self,
		credentials: &CredentialBundle,
	) -> Result<Vec<ProviderAccountData>, ProviderError> {
		let envelope: AccountsEnvelope = self.get_json("/accounts", &[], credentials).await?;
		envelope.accounts.into_iter().map(TryInto::try_into).collect()
	}

	async fn fetch_transactions(
		&self,
		credentials: &CredentialBundle,
		provider_account_id: &str,
		start_date: Option<NaiveDate>,
		end_date: Option<NaiveDate>,
	) -> Result<Vec<ProviderTransactionData>, ProviderError> {
		let mut query: Vec<(&str, String)> = Vec::new();
		if let Some(start) = start_date {
			query.push(("start_date", start.to_string()));
		}
		if let Some(end) = end_date {
			query.push(("end_date", end.to_string()));
		}
		let envelope: TransactionsEnvelope = self
			.get_json(&format!("/accounts/{provider_account_id}/transactions"), &query, credentials)
			.await?;
		envelope.transactions.into_iter().map(TryInto::try_into).collect()
	}

	async fn fetch_holdings(
		&self,
		credentials: &CredentialBundle,
		provider_account_id: &str,
	) -> Result<Vec<ProviderHoldingData>, ProviderError> {
		let envelope: HoldingsEnvelope = self
			.get_json(&format!("/accounts/{provider_account_id}/holdings"), &[], credentials)
			.await?;
		envelope.holdings.into_iter().map(TryInto::try_into).collect()
	}
}
