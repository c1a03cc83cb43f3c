//! Portfolio position entity.

use std::{fmt, str::FromStr};

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::money::{Currency, Money};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HoldingError {
	#[error("provider holding id cannot be empty")]
	InvalidProviderHoldingId,
	#[error("symbol cannot be empty")]
	InvalidSymbol,
	#[error("quantity cannot be negative")]
	NegativeQuantity,
	#[error("{0} currency does not match holding currency")]
	CurrencyMismatch(&'static str),
	#[error("unknown asset type: {0}")]
	UnknownAssetType(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
	Equity,
	Etf,
	Option,
	MutualFund,
	FixedIncome,
	Futures,
	Cryptocurrency,
	CashEquivalent,
	Other,
}

impl AssetType {
	pub fn as_str(&self) -> &'static str {
		match self {
			AssetType::Equity => "equity",
			AssetType::Etf => "etf",
			AssetType::Option => "option",
			AssetType::MutualFund => "mutual_fund",
			AssetType::FixedIncome => "fixed_income",
			AssetType::Futures => "futures",
			AssetType::Cryptocurrency => "cryptocurrency",
			AssetType::CashEquivalent => "cash_equivalent",
			AssetType::Other => "other",
		}
	}
}

impl FromStr for AssetType {
	type Err = HoldingError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"equity" => Ok(AssetType::Equity),
			"etf" => Ok(AssetType::Etf),
			"option" => Ok(AssetType::Option),
			"mutual_fund" => Ok(AssetType::MutualFund),
			"fixed_income" => Ok(AssetType::FixedIncome),
			"futures" => Ok(AssetType::Futures),
			"cryptocurrency" => Ok(AssetType::Cryptocurrency),
			"cash_equivalent" => Ok(AssetType::CashEquivalent),
			"other" => Ok(AssetType::Other),
			other => Err(HoldingError::UnknownAssetType(other.to_string())),
		}
	}
}

impl fmt::Display for AssetType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A current position in an investment account, mirrored from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
	pub id: Uuid,
	pub account_id: Uuid,
	pub provider_holding_id: String,
	pub symbol: String,
	pub security_name: String,
	pub asset_type: AssetType,
	quantity: BigDecimal,
	cost_basis: Money,
	market_value: Money,
	currency: Currency,
	pub average_price: Option<Money>,
	pub current_price: Option<Money>,
	pub is_active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

pub struct NewHolding {
	pub id: Uuid,
	pub account_id: Uuid,
	pub provider_holding_id: String,
	pub symbol: String,
	pub security_name: String,
	pub asset_type: AssetType,
	pub quantity: BigDecimal,
	pub cost_basis: Money,
	pub market_value: Money,
	pub currency: Currency,
	pub average_price: Option<Money>,
	pub current_price: Option<Money>,
	pub is_active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Holding {
	pub fn new(fields: NewHolding) -> Result<Self, HoldingError> {
		if fields.provider_holding_id.trim().is_empty() {
			return Err(HoldingError::InvalidProviderHoldingId)
		}
		if fields.symbol.trim().is_empty() {
			return Err(HoldingError::InvalidSymbol)
		}
		if fields.quantity < BigDecimal::zero() {
			return Err(HoldingError::NegativeQuantity)
		}
		for (label, money) in [
			("cost basis", Some(&fields.cost_basis)),
			("market value", Some(&fields.market_value)),
			("average price", fields.average_price.as_ref()),
			("current price", fields.current_price.as_ref()),
		] {
			if money.is_some_and(|m| m.currency() != fields.currency) {
				return Err(HoldingError::CurrencyMismatch(label))
			}
		}
		Ok(Self {
			id: fields.id,
			account_id: fields.account_id,
			provider_holding_id: fields.provider_holding_id,
			symbol: fields.symbol,
			security_name: fields.security_name,
			asset_type: fields.asset_type,
			quantity: fields.quantity,
			cost_basis: fields.cost_basis,
			market_value: fields.market_value,
			currency: fields.currency,
			average_price: fields.average_price,
			current_price: fields.current_price,
			is_active: fields.is_active,
			last_synced_at: fields.last_synced_at,
			provider_metadata: fields.provider_metadata,
			created_at: fields.created_at,
			updated_at: fields.updated_at,
		})
	}

	pub fn quantity(&self) -> &BigDecimal {
		&self.quantity
	}

	pub fn cost_basis(&self) -> &Money {
		&self.cost_basis
	}

	pub fn market_value(&self) -> &Money {
		&self.market_value
	}

	pub fn currency(&self) -> Currency {
		self.currency
	}

	pub fn unrealized_gain_loss(&self) -> Money {
		Money::new(self.market_value.amount() - self.cost_basis.amount(), self.currency)
	}

	/// Gain/loss relative to cost basis, rounded to two decimals. Zero when
	/// the cost basis is zero.
	pub fn unrealized_gain_loss_percent(&self) -> BigDecimal {
		if self.cost_basis.amount().is_zero() {
			return BigDecimal::zero()
		}
		let percent = self.unrealized_gain_loss().amount() / self.cost_basis.amount() *
			BigDecimal::from(100);
		percent.round(2)
	}

	pub fn is_profitable(&self) -> bool {
		self.market_value.amount() > self.cost_basis.amount()
	}

	/// Refresh the position from provider data. A quantity of zero closes the
	/// position and deactivates it.
	pub fn update_from_sync(
		&mut self,
		quantity: BigDecimal,
		cost_basis: Money,
		market_value: Money,
		current_price: Option<Money>,
		provider_metadata: Option<serde_json::Value>,
	) -> Result<(), HoldingError> {
		if quantity < BigDecimal::zero() {
			return Err(HoldingError::NegativeQuantity)
		}
		if cost_basis.currency() != self.currency {
			return Err(HoldingError::CurrencyMismatch("cost basis"))
		}
		if market_value.currency() != self.currency {
			return Err(HoldingError::CurrencyMismatch("market value"))
		}
		if current_price.as_ref().is_some_and(|p| p.currency() != self.currency) {
			return Err(HoldingError::CurrencyMismatch("current price"))
		}

		self.is_active = !quantity.is_zero();
		self.quantity = quantity;
		self.cost_basis = cost_basis;
		self.market_value = market_value;
		if current_price.is_some() {
			self.current_price = current_price;
		}
		if provider_metadata.is_some() {
			self.provider_metadata = provider_metadata;
		}
		let now = Utc::now();
		self.last_synced_at = Some(now);
		self.updated_at = now;
		Ok(())
	}

	pub fn mark_synced(&mut self) {
		let now = Utc::now();
		self.last_synced_at = Some(now);
		self.updated_at = now;
	}

	pub fn deactivate(&mut self) {
		self.is_active = false;
		self.updated_at = Utc::now();
	}
}
