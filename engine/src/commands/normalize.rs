//! Normalization of provider-reported strings into domain enums.
//!
//! Providers report free-form classifications; handlers normalize them here
//! before building entities. Account and asset types match the declared enum
//! strings case-sensitively and fall back to `Other`. Transaction
//! type/subtype/status matching is case-insensitive over the known provider
//! vocabularies.

use crate::domain::{
	AccountType, AssetType, TransactionStatus, TransactionSubtype, TransactionType,
};

pub fn account_type(provider_type: &str) -> AccountType {
	provider_type.parse().unwrap_or(AccountType::Other)
}

pub fn asset_type(provider_type: &str) -> AssetType {
	provider_type.parse().unwrap_or(AssetType::Other)
}

pub fn transaction_type(provider_type: &str) -> TransactionType {
	match provider_type.to_ascii_uppercase().as_str() {
		"TRADE" | "BUY" | "SELL" | "SHORT" | "COVER" | "OPTION" | "EXERCISE" =>
			TransactionType::Trade,
		"TRANSFER" | "DEPOSIT" | "WITHDRAWAL" | "ACH" | "WIRE" | "JOURNAL" =>
			TransactionType::Transfer,
		"DIVIDEND" | "INTEREST" | "CAPITAL_GAIN" | "DISTRIBUTION" => TransactionType::Income,
		"FEE" | "COMMISSION" | "MARGIN_INTEREST" | "MANAGEMENT_FEE" => TransactionType::Fee,
		_ => TransactionType::Other,
	}
}

pub fn subtype(
	provider_subtype: Option<&str>,
	transaction_type: TransactionType,
) -> TransactionSubtype {
	let Some(provider_subtype) = provider_subtype.filter(|s| !s.is_empty()) else {
		// No subtype reported: pick the type's most common action.
		return match transaction_type {
			TransactionType::Trade => TransactionSubtype::Buy,
			TransactionType::Transfer => TransactionSubtype::Deposit,
			TransactionType::Income => TransactionSubtype::Dividend,
			TransactionType::Fee => TransactionSubtype::AccountFee,
			TransactionType::Other => TransactionSubtype::Unknown,
		}
	};

	match provider_subtype.to_ascii_uppercase().as_str() {
		"BUY" | "PURCHASE" => TransactionSubtype::Buy,
		"SELL" | "SALE" => TransactionSubtype::Sell,
		"SHORT_SELL" => TransactionSubtype::ShortSell,
		"BUY_TO_COVER" => TransactionSubtype::BuyToCover,
		"DEPOSIT" | "ACH_IN" | "WIRE_IN" => TransactionSubtype::Deposit,
		"WITHDRAWAL" | "ACH_OUT" | "WIRE_OUT" => TransactionSubtype::Withdrawal,
		"TRANSFER_IN" | "JOURNAL_IN" => TransactionSubtype::TransferIn,
		"TRANSFER_OUT" | "JOURNAL_OUT" => TransactionSubtype::TransferOut,
		"DIVIDEND" => TransactionSubtype::Dividend,
		"INTEREST" => TransactionSubtype::Interest,
		"CAPITAL_GAIN" | "CAP_GAIN" => TransactionSubtype::CapitalGain,
		"COMMISSION" | "TRADE_FEE" => TransactionSubtype::Commission,
		"MARGIN_INTEREST" | "MARGIN" => TransactionSubtype::MarginInterest,
		"FEE" | "ACCOUNT_FEE" => TransactionSubtype::AccountFee,
		_ => TransactionSubtype::Unknown,
	}
}

pub fn transaction_status(provider_status: &str) -> TransactionStatus {
	match provider_status.to_ascii_uppercase().as_str() {
		"SETTLED" | "EXECUTED" | "COMPLETE" | "COMPLETED" => TransactionStatus::Settled,
		"PENDING" | "PROCESSING" | "IN_PROGRESS" => TransactionStatus::Pending,
		"FAILED" | "REJECTED" | "ERROR" => TransactionStatus::Failed,
		"CANCELLED" | "CANCELED" | "VOIDED" => TransactionStatus::Cancelled,
		// Historical records without a recognizable status are settled facts.
		_ => TransactionStatus::Settled,
	}
}
