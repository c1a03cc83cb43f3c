//! Point-in-time balance captures.

use std::{fmt, str::FromStr};

use bigdecimal::ToPrimitive;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::money::{Currency, Money};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
	#[error("{0} currency does not match snapshot currency")]
	CurrencyMismatch(&'static str),
	#[error("unknown snapshot source: {0}")]
	UnknownSource(String),
}

/// What triggered the capture.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
	AccountSync,
	HoldingsSync,
	ManualSync,
	ScheduledSync,
	InitialConnection,
}

impl SnapshotSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			SnapshotSource::AccountSync => "account_sync",
			SnapshotSource::HoldingsSync => "holdings_sync",
			SnapshotSource::ManualSync => "manual_sync",
			SnapshotSource::ScheduledSync => "scheduled_sync",
			SnapshotSource::InitialConnection => "initial_connection",
		}
	}

	pub fn is_user_initiated(&self) -> bool {
		matches!(self, SnapshotSource::ManualSync | SnapshotSource::InitialConnection)
	}
}

impl FromStr for SnapshotSource {
	type Err = SnapshotError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"account_sync" => Ok(SnapshotSource::AccountSync),
			"holdings_sync" => Ok(SnapshotSource::HoldingsSync),
			"manual_sync" => Ok(SnapshotSource::ManualSync),
			"scheduled_sync" => Ok(SnapshotSource::ScheduledSync),
			"initial_connection" => Ok(SnapshotSource::InitialConnection),
			other => Err(SnapshotError::UnknownSource(other.to_string())),
		}
	}
}

impl fmt::Display for SnapshotSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// An immutable balance observation for one account. Created during sync,
/// never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
	pub id: Uuid,
	pub account_id: Uuid,
	balance: Money,
	available_balance: Option<Money>,
	holdings_value: Option<Money>,
	cash_value: Option<Money>,
	currency: Currency,
	pub source: SnapshotSource,
	pub provider_metadata: Option<serde_json::Value>,
	pub captured_at: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
}

pub struct NewSnapshot {
	pub id: Uuid,
	pub account_id: Uuid,
	pub balance: Money,
	pub available_balance: Option<Money>,
	pub holdings_value: Option<Money>,
	pub cash_value: Option<Money>,
	pub currency: Currency,
	pub source: SnapshotSource,
	pub provider_metadata: Option<serde_json::Value>,
	pub captured_at: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
}

impl BalanceSnapshot {
	pub fn new(fields: NewSnapshot) -> Result<Self, SnapshotError> {
		for (label, money) in [
			("balance", Some(&fields.balance)),
			("available balance", fields.available_balance.as_ref()),
			("holdings value", fields.holdings_value.as_ref()),
			("cash value", fields.cash_value.as_ref()),
		] {
			if money.is_some_and(|m| m.currency() != fields.currency) {
				return Err(SnapshotError::CurrencyMismatch(label))
			}
		}
		Ok(Self {
			id: fields.id,
			account_id: fields.account_id,
			balance: fields.balance,
			available_balance: fields.available_balance,
			holdings_value: fields.holdings_value,
			cash_value: fields.cash_value,
			currency: fields.currency,
			source: fields.source,
			provider_metadata: fields.provider_metadata,
			captured_at: fields.captured_at,
			created_at: fields.created_at,
		})
	}

	pub fn balance(&self) -> &Money {
		&self.balance
	}

	pub fn available_balance(&self) -> Option<&Money> {
		self.available_balance.as_ref()
	}

	pub fn holdings_value(&self) -> Option<&Money> {
		self.holdings_value.as_ref()
	}

	pub fn cash_value(&self) -> Option<&Money> {
		self.cash_value.as_ref()
	}

	pub fn currency(&self) -> Currency {
		self.currency
	}

	/// Delta against an earlier snapshot. `None` when the currencies differ
	/// (cross-currency change is meaningless) and a `None` percentage when
	/// the previous balance was zero.
	pub fn change_from(&self, previous: &BalanceSnapshot) -> Option<(Money, Option<f64>)> {
		if self.currency != previous.currency {
			return None
		}
		let change = Money::new(self.balance.amount() - previous.balance.amount(), self.currency);
		let percent = if previous.balance.is_zero() {
			None
		} else {
			(change.amount() / previous.balance.amount() * bigdecimal::BigDecimal::from(100))
				.to_f64()
		};
		Some((change, percent))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn usd(s: &str) -> Money {
		Money::new(s.parse().unwrap(), Currency::USD)
	}

	fn snapshot(balance: &str, currency: &str) -> BalanceSnapshot {
		let now = Utc::now();
		let currency: Currency = currency.parse().unwrap();
		BalanceSnapshot::new(NewSnapshot {
			id: Uuid::now_v7(),
			account_id: Uuid::now_v7(),
			balance: Money::new(balance.parse().unwrap(), currency),
			available_balance: None,
			holdings_value: None,
			cash_value: None,
			currency,
			source: SnapshotSource::AccountSync,
			provider_metadata: None,
			captured_at: now,
			created_at: now,
		})
		.unwrap()
	}

	#[test]
	fn currencies_must_agree() {
		let now = Utc::now();
		let result = BalanceSnapshot::new(NewSnapshot {
			id: Uuid::now_v7(),
			account_id: Uuid::now_v7(),
			balance: usd("100"),
			available_balance: None,
			holdings_value: Some(Money::zero("EUR".parse().unwrap())),
			cash_value: None,
			currency: Currency::USD,
			source: SnapshotSource::HoldingsSync,
			provider_metadata: None,
			captured_at: now,
			created_at: now,
		});
		assert_eq!(result.unwrap_err(), SnapshotError::CurrencyMismatch("holdings value"));
	}

	#[test]
	fn change_from_previous() {
		let (change, percent) = snapshot("110", "USD").change_from(&snapshot("100", "USD")).unwrap();
		assert_eq!(change, usd("10"));
		assert_eq!(percent, Some(10.0));
	}

	#[test]
	fn change_across_currencies_is_none() {
		assert!(snapshot("110", "USD").change_from(&snapshot("100", "EUR")).is_none());
	}

	#[test]
	fn change_from_zero_balance_has_no_percent() {
		let (change, percent) = snapshot("50", "USD").change_from(&snapshot("0", "USD")).unwrap();
		assert_eq!(change, usd("50"));
		assert_eq!(percent, None);
	}

	#[test]
	fn source_round_trip() {
		assert_eq!(
			"initial_connection".parse::<SnapshotSource>().unwrap(),
			SnapshotSource::InitialConnection
		);
		assert!("ACCOUNT_SYNC".parse::<SnapshotSource>().is_err());
		assert!(SnapshotSource::ManualSync.is_user_initiated());
		assert!(!SnapshotSource::ScheduledSync.is_user_initiated());
	}
}
