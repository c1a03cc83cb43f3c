//! Financial account entity, aggregated from a provider connection.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::money::{Currency, Money};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
	#[error("provider account id cannot be empty")]
	InvalidProviderAccountId,
	#[error("masked account number cannot be empty")]
	InvalidAccountNumber,
	#[error("account name cannot be empty")]
	InvalidAccountName,
	#[error("balance currency {0} does not match account currency {1}")]
	BalanceCurrencyMismatch(Currency, Currency),
	#[error("available balance currency {0} does not match account currency {1}")]
	AvailableBalanceCurrencyMismatch(Currency, Currency),
	#[error("unknown account type: {0}")]
	UnknownType(String),
}

/// Classification used for grouping and filtering. Providers report free-form
/// strings; unknown values normalize to `Other` at the sync boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
	Brokerage,
	Ira,
	RothIra,
	Retirement401k,
	Retirement403b,
	Hsa,
	Checking,
	Savings,
	MoneyMarket,
	Cd,
	CreditCard,
	LineOfCredit,
	Loan,
	Mortgage,
	Other,
}

impl AccountType {
	pub fn as_str(&self) -> &'static str {
		match self {
			AccountType::Brokerage => "brokerage",
			AccountType::Ira => "ira",
			AccountType::RothIra => "roth_ira",
			AccountType::Retirement401k => "401k",
			AccountType::Retirement403b => "403b",
			AccountType::Hsa => "hsa",
			AccountType::Checking => "checking",
			AccountType::Savings => "savings",
			AccountType::MoneyMarket => "money_market",
			AccountType::Cd => "cd",
			AccountType::CreditCard => "credit_card",
			AccountType::LineOfCredit => "line_of_credit",
			AccountType::Loan => "loan",
			AccountType::Mortgage => "mortgage",
			AccountType::Other => "other",
		}
	}

	pub fn is_investment(&self) -> bool {
		matches!(
			self,
			AccountType::Brokerage |
				AccountType::Ira | AccountType::RothIra |
				AccountType::Retirement401k |
				AccountType::Retirement403b |
				AccountType::Hsa
		)
	}

	pub fn is_bank(&self) -> bool {
		matches!(
			self,
			AccountType::Checking |
				AccountType::Savings |
				AccountType::MoneyMarket |
				AccountType::Cd
		)
	}

	pub fn is_retirement(&self) -> bool {
		matches!(
			self,
			AccountType::Ira |
				AccountType::RothIra |
				AccountType::Retirement401k |
				AccountType::Retirement403b
		)
	}

	pub fn is_credit(&self) -> bool {
		matches!(
			self,
			AccountType::CreditCard |
				AccountType::LineOfCredit |
				AccountType::Loan | AccountType::Mortgage
		)
	}
}

impl FromStr for AccountType {
	type Err = AccountError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"brokerage" => Ok(AccountType::Brokerage),
			"ira" => Ok(AccountType::Ira),
			"roth_ira" => Ok(AccountType::RothIra),
			"401k" => Ok(AccountType::Retirement401k),
			"403b" => Ok(AccountType::Retirement403b),
			"hsa" => Ok(AccountType::Hsa),
			"checking" => Ok(AccountType::Checking),
			"savings" => Ok(AccountType::Savings),
			"money_market" => Ok(AccountType::MoneyMarket),
			"cd" => Ok(AccountType::Cd),
			"credit_card" => Ok(AccountType::CreditCard),
			"line_of_credit" => Ok(AccountType::LineOfCredit),
			"loan" => Ok(AccountType::Loan),
			"mortgage" => Ok(AccountType::Mortgage),
			"other" => Ok(AccountType::Other),
			other => Err(AccountError::UnknownType(other.to_string())),
		}
	}
}

impl fmt::Display for AccountType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// An individual account (brokerage, checking, IRA, …) mirroring provider
/// state. Accounts are upserted by sync and never destroyed, only
/// deactivated.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
	pub id: Uuid,
	pub connection_id: Uuid,
	pub provider_account_id: String,
	pub account_number_masked: String,
	pub name: String,
	pub account_type: AccountType,
	balance: Money,
	available_balance: Option<Money>,
	currency: Currency,
	pub is_active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

pub struct NewAccount {
	pub id: Uuid,
	pub connection_id: Uuid,
	pub provider_account_id: String,
	pub account_number_masked: String,
	pub name: String,
	pub account_type: AccountType,
	pub balance: Money,
	pub available_balance: Option<Money>,
	pub currency: Currency,
	pub is_active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub provider_metadata: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Account {
	pub fn new(fields: NewAccount) -> Result<Self, AccountError> {
		if fields.provider_account_id.trim().is_empty() {
			return Err(AccountError::InvalidProviderAccountId)
		}
		if fields.account_number_masked.trim().is_empty() {
			return Err(AccountError::InvalidAccountNumber)
		}
		if fields.name.trim().is_empty() {
			return Err(AccountError::InvalidAccountName)
		}
		if fields.balance.currency() != fields.currency {
			return Err(AccountError::BalanceCurrencyMismatch(
				fields.balance.currency(),
				fields.currency,
			))
		}
		if let Some(available) = &fields.available_balance {
			if available.currency() != fields.currency {
				return Err(AccountError::AvailableBalanceCurrencyMismatch(
					available.currency(),
					fields.currency,
				))
			}
		}
		Ok(Self {
			id: fields.id,
			connection_id: fields.connection_id,
			provider_account_id: fields.provider_account_id,
			account_number_masked: fields.account_number_masked,
			name: fields.name,
			account_type: fields.account_type,
			balance: fields.balance,
			available_balance: fields.available_balance,
			currency: fields.currency,
			is_active: fields.is_active,
			last_synced_at: fields.last_synced_at,
			provider_metadata: fields.provider_metadata,
			created_at: fields.created_at,
			updated_at: fields.updated_at,
		})
	}

	pub fn balance(&self) -> &Money {
		&self.balance
	}

	pub fn available_balance(&self) -> Option<&Money> {
		self.available_balance.as_ref()
	}

	pub fn currency(&self) -> Currency {
		self.currency
	}

	/// "Schwab Brokerage (****1234)"
	pub fn display_name(&self) -> String {
		format!("{} ({})", self.name, self.account_number_masked)
	}

	pub fn has_available_balance(&self) -> bool {
		self.available_balance.as_ref().is_some_and(|available| *available != self.balance)
	}

	pub fn needs_sync(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
		match self.last_synced_at {
			Some(last) => now - last > threshold,
			None => true,
		}
	}

	pub fn update_balance(
		&mut self,
		balance: Money,
		available_balance: Option<Money>,
	) -> Result<(), AccountError> {
		if balance.currency() != self.currency {
			return Err(AccountError::BalanceCurrencyMismatch(balance.currency(), self.currency))
		}
		if let Some(available) = &available_balance {
			if available.currency() != self.currency {
				return Err(AccountError::AvailableBalanceCurrencyMismatch(
					available.currency(),
					self.currency,
				))
			}
		}
		self.balance = balance;
		self.available_balance = available_balance;
		self.updated_at = Utc::now();
		Ok(())
	}

	/// Update provider-reported metadata fields. `None` arguments leave the
	/// current value untouched.
	pub fn update_from_provider(
		&mut self,
		name: Option<String>,
		is_active: Option<bool>,
		provider_metadata: Option<serde_json::Value>,
	) -> Result<(), AccountError> {
		if let Some(name) = name {
			if name.trim().is_empty() {
				return Err(AccountError::InvalidAccountName)
			}
			self.name = name;
		}
		if let Some(is_active) = is_active {
			self.is_active = is_active;
		}
		if let Some(metadata) = provider_metadata {
			self.provider_metadata = Some(metadata);
		}
		self.updated_at = Utc::now();
		Ok(())
	}

	pub fn mark_synced(&mut self) {
		let now = Utc::now();
		self.last_synced_at = Some(now);
		self.updated_at = now;
	}

	pub fn activate(&mut self) {
		self.is_active = true;
		self.updated_at = Utc::now();
	}

	pub fn deactivate(&mut self) {
		self.is_active = false;
		self.updated_at = Utc::now();
	}
}
