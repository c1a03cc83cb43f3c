//! Exact-precision monetary amounts.
//!
//! Every balance, price and transaction amount in the engine is a [`Money`]:
//! an arbitrary-precision decimal paired with an ISO-4217 currency code.
//! Binary floating point never represents money anywhere in this crate.

use std::{cmp::Ordering, fmt, str::FromStr};

use bigdecimal::{BigDecimal, Signed, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ISO-4217 codes the engine accepts. Extend as providers in new markets are
/// onboarded.
const VALID_CURRENCIES: &[&str] = &[
	"USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "CNY", "HKD", "SGD", "KRW", "INR",
	"TWD", "SEK", "NOK", "DKK", "PLN", "CZK", "MXN", "BRL", "ZAR", "RUB", "TRY",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
	#[error("cannot operate on {0} and {1}")]
	CurrencyMismatch(Currency, Currency),
	#[error("invalid currency code: {0}")]
	InvalidCurrency(String),
}

/// A validated, upper-cased ISO-4217 currency code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
	pub const USD: Currency = Currency(*b"USD");

	pub fn as_str(&self) -> &str {
		// Construction only accepts ASCII codes from the allow-list.
		std::str::from_utf8(&self.0).expect("currency codes are ASCII")
	}
}

impl FromStr for Currency {
	type Err = MoneyError;

	fn from_str(code: &str) -> Result<Self, Self::Err> {
		let normalized = code.trim().to_ascii_uppercase();
		if VALID_CURRENCIES.contains(&normalized.as_str()) {
			let bytes = normalized.as_bytes();
			Ok(Currency([bytes[0], bytes[1], bytes[2]]))
		} else {
			Err(MoneyError::InvalidCurrency(code.to_string()))
		}
	}
}

impl TryFrom<String> for Currency {
	type Error = MoneyError;

	fn try_from(code: String) -> Result<Self, Self::Error> {
		code.parse()
	}
}

impl From<Currency> for String {
	fn from(currency: Currency) -> Self {
		currency.as_str().to_string()
	}
}

impl fmt::Display for Currency {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// An immutable amount of one currency.
///
/// Arithmetic between currencies is refused rather than converted: the engine
/// has no exchange-rate source and silently mixing currencies corrupts
/// portfolios. Cross-currency comparison is likewise undefined, which is why
/// `Money` implements [`PartialOrd`] but not `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
	amount: BigDecimal,
	currency: Currency,
}

impl Money {
	pub fn new(amount: BigDecimal, currency: Currency) -> Self {
		Self { amount, currency }
	}

	pub fn zero(currency: Currency) -> Self {
		Self { amount: BigDecimal::zero(), currency }
	}

	/// Build from an integral number of the currency's smallest unit,
	/// assuming 100 sub-units. Some provider APIs report cents.
	pub fn from_minor_units(minor: i64, currency: Currency) -> Self {
		Self { amount: BigDecimal::new(minor.into(), 2), currency }
	}

	pub fn amount(&self) -> &BigDecimal {
		&self.amount
	}

	pub fn currency(&self) -> Currency {
		self.currency
	}

	pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
		self.require_same_currency(other)?;
		Ok(Money::new(&self.amount + &other.amount, self.currency))
	}

	pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
		self.require_same_currency(other)?;
		Ok(Money::new(&self.amount - &other.amount, self.currency))
	}

	pub fn scaled_by(&self, scalar: &BigDecimal) -> Money {
		Money::new(&self.amount * scalar, self.currency)
	}

	pub fn negated(&self) -> Money {
		Money::new(-&self.amount, self.currency)
	}

	pub fn abs(&self) -> Money {
		Money::new(self.amount.abs(), self.currency)
	}

	pub fn is_positive(&self) -> bool {
		self.amount.is_positive()
	}

	pub fn is_negative(&self) -> bool {
		self.amount.is_negative()
	}

	pub fn is_zero(&self) -> bool {
		self.amount.is_zero()
	}

	fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
		if self.currency == other.currency {
			Ok(())
		} else {
			Err(MoneyError::CurrencyMismatch(self.currency, other.currency))
		}
	}
}

impl PartialOrd for Money {
	/// `None` when the currencies differ: ordering across currencies is
	/// meaningless without a conversion rate.
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		(self.currency == other.currency).then(|| self.amount.cmp(&other.amount))
	}
}

impl fmt::Display for Money {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.amount, self.currency)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn usd(s: &str) -> Money {
		Money::new(s.parse().unwrap(), Currency::USD)
	}

	fn eur(s: &str) -> Money {
		Money::new(s.parse().unwrap(), "EUR".parse().unwrap())
	}

	#[test]
	fn currency_codes_normalize() {
		assert_eq!("usd".parse::<Currency>().unwrap(), Currency::USD);
		assert_eq!(" gbp ".parse::<Currency>().unwrap().as_str(), "GBP");
		assert!(matches!("XYZ".parse::<Currency>(), Err(MoneyError::InvalidCurrency(_))));
		assert!(matches!("".parse::<Currency>(), Err(MoneyError::InvalidCurrency(_))));
	}

	#[test]
	fn add_then_sub_is_identity() {
		let x = usd("1000.00");
		let y = usd("9.99");
		let back = x.checked_add(&y).unwrap().checked_sub(&y).unwrap();
		assert_eq!(back, x);
	}

	#[test]
	fn double_negation_and_abs() {
		let x = usd("-123.45");
		assert_eq!(x.negated().negated(), x);
		assert!(!x.abs().is_negative());
		assert_eq!(x.abs(), usd("123.45"));
	}

	#[test]
	fn mixed_currency_arithmetic_fails() {
		let x = usd("10");
		let y = eur("10");
		assert!(matches!(x.checked_add(&y), Err(MoneyError::CurrencyMismatch(_, _))));
		assert!(matches!(x.checked_sub(&y), Err(MoneyError::CurrencyMismatch(_, _))));
	}

	#[test]
	fn mixed_currency_comparison_is_undefined() {
		assert_eq!(usd("10").partial_cmp(&eur("10")), None);
		assert_eq!(usd("10").partial_cmp(&usd("20")), Some(Ordering::Less));
	}

	#[test]
	fn scalar_multiplication() {
		let x = usd("100.00");
		assert_eq!(x.scaled_by(&"2".parse().unwrap()), usd("200.00"));
	}

	#[test]
	fn minor_units() {
		assert_eq!(Money::from_minor_units(12345, Currency::USD), usd("123.45"));
	}

	#[test]
	fn serde_round_trip() {
		let x = usd("42.42");
		let json = serde_json::to_string(&x).unwrap();
		assert_eq!(serde_json::from_str::<Money>(&json).unwrap(), x);
	}
}
