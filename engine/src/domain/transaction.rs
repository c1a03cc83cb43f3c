//! Historical transaction records.
//!
//! Transactions are write-once: once persisted, only a `Pending` record may
//! move to `Settled`. Everything else about a transaction is fixed history.

use std::{fmt, str::FromStr};

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::money::{Currency, Money};
use crate::domain::holding::AssetType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
	#[error("provider transaction id cannot be empty")]
	InvalidProviderTransactionId,
	#[error("description cannot be empty")]
	InvalidDescription,
	#[error("{0} currency does not match amount currency")]
	CurrencyMismatch(&'static str),
	#[error("only pending transactions can settle")]
	NotPending,
	#[error("unknown transaction type: {0}")]
	UnknownType(String),
	#[error("unknown transaction subtype: {0}")]
	UnknownSubtype(String),
	#[error("unknown transaction status: {0}")]
	UnknownStatus(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
	Trade,
	Transfer,
	Income,
	Fee,
	Other,
}

impl TransactionType {
	pub fn as_str(&self) -> &'static str {
		match self {
			TransactionType::Trade => "trade",
			TransactionType::Transfer => "transfer",
			TransactionType::Income => "income",
			TransactionType::Fee => "fee",
			TransactionType::Other => "other",
		}
	}
}

impl FromStr for TransactionType {
	type Err = TransactionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"trade" => Ok(TransactionType::Trade),
			"transfer" => Ok(TransactionType::Transfer),
			"income" => Ok(TransactionType::Income),
			"fee" => Ok(TransactionType::Fee),
			"other" => Ok(TransactionType::Other),
			other => Err(TransactionError::UnknownType(other.to_string())),
		}
	}
}

impl fmt::Display for TransactionType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Specific action within a [`TransactionType`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSubtype {
	// Trades
	Buy,
	Sell,
	ShortSell,
	BuyToCover,
	Exercise,
	Assignment,
	Expiration,
	// Transfers
	Deposit,
	Withdrawal,
	WireIn,
	WireOut,
	TransferIn,
	TransferOut,
	Internal,
	// Income
	Dividend,
	Interest,
	CapitalGain,
	Distribution,
	// Fees
	Commission,
	AccountFee,
	MarginInterest,
	OtherFee,
	// Other
	Adjustment,
	Journal,
	Unknown,
}

impl TransactionSubtype {
	pub fn as_str(&self) -> &'static str {
		match self {
			TransactionSubtype::Buy => "buy",
			TransactionSubtype::Sell => "sell",
			TransactionSubtype::ShortSell => "short_sell",
			TransactionSubtype::BuyToCover => "buy_to_cover",
			TransactionSubtype::Exercise => "exercise",
			TransactionSubtype::Assignment => "assignment",
			TransactionSubtype::Expiration => "expiration",
			TransactionSubtype::Deposit => "deposit",
			TransactionSubtype::Withdrawal => "withdrawal",
			TransactionSubtype::WireIn => "wire_in",
			TransactionSubtype::WireOut => "wire_out",
			TransactionSubtype::TransferIn => "transfer_in",
			TransactionSubtype::TransferOut => "transfer_out",
			TransactionSubtype::Internal => "internal",
			TransactionSubtype::Dividend => "dividend",
			TransactionSubtype::Interest => "interest",
			TransactionSubtype::CapitalGain => "capital_gain",
			TransactionSubtype::Distribution => "distribution",
			TransactionSubtype::Commission => "commission",
			TransactionSubtype::AccountFee => "account_fee",
			TransactionSubtype::MarginInterest => "margin_interest",
			TransactionSubtype::OtherFee => "other_fee",
			TransactionSubtype::Adjustment => "adjustment",
			TransactionSubtype::Journal => "journal",
			TransactionSubtype::Unknown => "unknown",
		}
	}
}

impl FromStr for TransactionSubtype {
	type Err = TransactionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"buy" => Ok(TransactionSubtype::Buy),
			"sell" => Ok(TransactionSubtype::Sell),
			"short_sell" => Ok(TransactionSubtype::ShortSell),
			"buy_to_cover" => Ok(TransactionSubtype::BuyToCover),
			"exercise" => Ok(TransactionSubtype::Exercise),
			"assignment" => Ok(TransactionSubtype::Assignment),
			"expiration" => Ok(TransactionSubtype::Expiration),
			"deposit" => Ok(TransactionSubtype::Deposit),
			"withdrawal" => Ok(TransactionSubtype::Withdrawal),
			"wire_in" => Ok(TransactionSubtype::WireIn),
			"wire_out" => Ok(TransactionSubtype::WireOut),
			"transfer_in" => Ok(TransactionSubtype::TransferIn),
			"transfer_out" => Ok(TransactionSubtype::TransferOut),
			"internal" => Ok(TransactionSubtype::Internal),
			"dividend" => Ok(TransactionSubtype::Dividend),
			"interest" => Ok(TransactionSubtype::Interest),
			"capital_gain" => Ok(TransactionSubtype::CapitalGain),
			"distribution" => Ok(TransactionSubtype::Distribution),
			"commission" => Ok(TransactionSubtype::Commission),
			"account_fee" => Ok(TransactionSubtype::AccountFee),
			"margin_interest" => Ok(TransactionSubtype::MarginInterest),
			"other_fee" => Ok(TransactionSubtype::OtherFee),
			"adjustment" => Ok(TransactionSubtype::Adjustment),
			"journal" => Ok(TransactionSubtype::Journal),
			"unknown" => Ok(TransactionSubtype::Unknown),
			other => Err(TransactionError::UnknownSubtype(other.to_string())),
		}
	}
}

impl fmt::Display for TransactionSubtype {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
	Pending,
	Settled,
	Failed,
	Cancelled,
}

impl TransactionStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			TransactionStatus::Pending => "pending",
			TransactionStatus::Settled => "settled",
			TransactionStatus::Failed => "failed",
			TransactionStatus::Cancelled => "cancelled",
		}
	}
}

impl FromStr for TransactionStatus {
	type Err = TransactionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(TransactionStatus::Pending),
			"settled" => Ok(TransactionStatus::Settled),
			"failed" => Ok(TransactionStatus::Failed),
			"cancelled" => Ok(TransactionStatus::Cancelled),
			other => Err(TransactionError::UnknownStatus(other.to_string())),
		}
	}
}

impl fmt::Display for TransactionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A past financial activity record.
///
/// Amount sign convention: positive credits the account (deposits, income,
/// sale proceeds), negative debits it (purchases, withdrawals, fees).
/// `provider_transaction_id` is the deduplication key within an account.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
	pub id: Uuid,
	pub account_id: Uuid,
	pub provider_transaction_id: String,
	pub transaction_type: TransactionType,
	pub subtype: TransactionSubtype,
	status: TransactionStatus,
	amount: Money,
	pub description: String,
	pub asset_type: Option<AssetType>,
	pub symbol: Option<String>,
	pub security_name: Option<String>,
	pub quantity: Option<BigDecimal>,
	unit_price: Option<Money>,
	commission: Option<Money>,
	pub transaction_date: NaiveDate,
	pub settlement_date: Option<NaiveDate>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

pub struct NewTransaction {
	pub id: Uuid,
	pub account_id: Uuid,
	pub provider_transaction_id: String,
	pub transaction_type: TransactionType,
	pub subtype: TransactionSubtype,
	pub status: TransactionStatus,
	pub amount: Money,
	pub description: String,
	pub asset_type: Option<AssetType>,
	pub symbol: Option<String>,
	pub security_name: Option<String>,
	pub quantity: Option<BigDecimal>,
	pub unit_price: Option<Money>,
	pub commission: Option<Money>,
	pub transaction_date: NaiveDate,
	pub settlement_date: Option<NaiveDate>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Transaction {
	pub fn new(fields: NewTransaction) -> Result<Self, TransactionError> {
		if fields.provider_transaction_id.trim().is_empty() {
			return Err(TransactionError::InvalidProviderTransactionId)
		}
		if fields.description.trim().is_empty() {
			return Err(TransactionError::InvalidDescription)
		}
		let amount_currency = fields.amount.currency();
		if fields.unit_price.as_ref().is_some_and(|p| p.currency() != amount_currency) {
			return Err(TransactionError::CurrencyMismatch("unit price"))
		}
		if fields.commission.as_ref().is_some_and(|c| c.currency() != amount_currency) {
			return Err(TransactionError::CurrencyMismatch("commission"))
		}
		Ok(Self {
			id: fields.id,
			account_id: fields.account_id,
			provider_transaction_id: fields.provider_transaction_id,
			transaction_type: fields.transaction_type,
			subtype: fields.subtype,
			status: fields.status,
			amount: fields.amount,
			description: fields.description,
			asset_type: fields.asset_type,
			symbol: fields.symbol,
			security_name: fields.security_name,
			quantity: fields.quantity,
			unit_price: fields.unit_price,
			commission: fields.commission,
			transaction_date: fields.transaction_date,
			settlement_date: fields.settlement_date,
			provider_metadata: fields.provider_metadata,
			created_at: fields.created_at,
			updated_at: fields.updated_at,
		})
	}

	pub fn status(&self) -> TransactionStatus {
		self.status
	}

	pub fn amount(&self) -> &Money {
		&self.amount
	}

	pub fn unit_price(&self) -> Option<&Money> {
		self.unit_price.as_ref()
	}

	pub fn commission(&self) -> Option<&Money> {
		self.commission.as_ref()
	}

	pub fn is_credit(&self) -> bool {
		self.amount.is_positive()
	}

	pub fn is_debit(&self) -> bool {
		self.amount.is_negative()
	}

	pub fn is_trade(&self) -> bool {
		self.transaction_type == TransactionType::Trade
	}

	/// The only mutation a stored transaction permits.
	pub fn settle(&mut self, settlement_date: Option<NaiveDate>) -> Result<(), TransactionError> {
		if self.status != TransactionStatus::Pending {
			return Err(TransactionError::NotPending)
		}
		self.status = TransactionStatus::Settled;
		if settlement_date.is_some() {
			self.settlement_date = settlement_date;
		}
		self.updated_at = Utc::now();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn usd(s: &str) -> Money {
		Money::new(s.parse().unwrap(), Currency::USD)
	}

	fn txn(status: TransactionStatus) -> Transaction {
		let now = Utc::now();
		Transaction::new(NewTransaction {
			id: Uuid::now_v7(),
			account_id: Uuid::now_v7(),
			provider_transaction_id: "TXN-1".to_string(),
			transaction_type: TransactionType::Trade,
			subtype: TransactionSubtype::Buy,
			status,
			amount: usd("-1050.00"),
			description: "Bought 10 AAPL".to_string(),
			asset_type: Some(AssetType::Equity),
			symbol: Some("AAPL".to_string()),
			security_name: Some("Apple Inc.".to_string()),
			quantity: Some("10".parse().unwrap()),
			unit_price: Some(usd("105.00")),
			commission: Some(usd("0.00")),
			transaction_date: NaiveDate::from_ymd_opt(2025, 11, 28).unwrap(),
			settlement_date: None,
			provider_metadata: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap()
	}

	#[test]
	fn sign_convention() {
		let t = txn(TransactionStatus::Settled);
		assert!(t.is_debit());
		assert!(!t.is_credit());
		assert!(t.is_trade());
	}

	#[test]
	fn pending_settles_once() {
		let mut t = txn(TransactionStatus::Pending);
		let settle_date = NaiveDate::from_ymd_opt(2025, 11, 30).unwrap();
		t.settle(Some(settle_date)).unwrap();
		assert_eq!(t.status(), TransactionStatus::Settled);
		assert_eq!(t.settlement_date, Some(settle_date));
		assert_eq!(t.settle(None), Err(TransactionError::NotPending));
	}

	#[test]
	fn settled_cannot_settle_again() {
		let mut t = txn(TransactionStatus::Cancelled);
		assert_eq!(t.settle(None), Err(TransactionError::NotPending));
	}

	#[test]
	fn currency_mismatch_rejected() {
		let now = Utc::now();
		let result = Transaction::new(NewTransaction {
			id: Uuid::now_v7(),
			account_id: Uuid::now_v7(),
			provider_transaction_id: "TXN-2".to_string(),
			transaction_type: TransactionType::Trade,
			subtype: TransactionSubtype::Buy,
			status: TransactionStatus::Settled,
			amount: usd("-10.00"),
			description: "x".to_string(),
			asset_type: None,
			symbol: None,
			security_name: None,
			quantity: None,
			unit_price: Some(Money::zero("EUR".parse().unwrap())),
			commission: None,
			transaction_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
			settlement_date: None,
			provider_metadata: None,
			created_at: now,
			updated_at: now,
		});
		assert_eq!(result.unwrap_err(), TransactionError::CurrencyMismatch("unit price"));
	}

	#[test]
	fn subtype_strings_round_trip() {
		for subtype in [
			TransactionSubtype::Buy,
			TransactionSubtype::ShortSell,
			TransactionSubtype::WireOut,
			TransactionSubtype::MarginInterest,
			TransactionSubtype::Unknown,
		] {
			assert_eq!(subtype.as_str().parse::<TransactionSubtype>().unwrap(), subtype);
		}
	}
}
