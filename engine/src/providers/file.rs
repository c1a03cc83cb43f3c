//! File-import provider adapter.
//!
//! Parses uploaded statement files (OFX/QFX and CSV) into the same records a
//! live API adapter would return. The credential bundle carries the file
//! itself (`file_content`, `file_format`, `file_name`); nothing is fetched
//! over the network and nothing about the file is persisted here.

use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{
	CredentialBundle, ProviderAccountData, ProviderAdapter, ProviderError,
	ProviderHoldingData, ProviderTransactionData, FILE_CONTENT_KEY, FILE_FORMAT_KEY,
};

#[derive(Debug, Default)]
pub struct FileProvider;

impl FileProvider {
	pub fn new() -> Self {
		Self
	}

	fn parse(credentials: &CredentialBundle) -> Result<Statement, ProviderError> {
		let content = credentials.require(FILE_CONTENT_KEY)?;
		let format = credentials.require(FILE_FORMAT_KEY)?;
		match format.to_ascii_lowercase().as_str() {
			"ofx" | "qfx" => parse_ofx(content),
			"csv" => parse_csv(content),
			other => Err(ProviderError::InvalidFile(format!("unsupported format: {other}"))),
		}
	}
}

#[async_trait]
impl ProviderAdapter for FileProvider {
	async fn fetch_accounts(
		&self,
		credentials: &CredentialBundle,
	) -> Result<Vec<ProviderAccountData>, ProviderError> {
		Ok(Self::parse(credentials)?.accounts)
	}

	async fn fetch_transactions(
		&self,
		credentials: &CredentialBundle,
		provider_account_id: &str,
		start_date: Option<NaiveDate>,
		end_date: Option<NaiveDate>,
	) -> Result<Vec<ProviderTransactionData>, ProviderError> {
		let mut statement = Self::parse(credentials)?;
		let mut transactions =
			statement.transactions.remove(provider_account_id).unwrap_or_default();
		transactions.retain(|t| {
			start_date.is_none_or(|start| t.transaction_date >= start) &&
				end_date.is_none_or(|end| t.transaction_date <= end)
		});
		Ok(transactions)
	}

	/// Statement files carry cash activity, not positions.
	async fn fetch_holdings(
		&self,
		credentials: &CredentialBundle,
		_provider_account_id: &str,
	) -> Result<Vec<ProviderHoldingData>, ProviderError> {
		Self::parse(credentials)?;
		Ok(vec![])
	}
}

struct Statement {
	accounts: Vec<ProviderAccountData>,
	transactions: HashMap<String, Vec<ProviderTransactionData>>,
}

// ---------------------------------------------------------------------------
// OFX / QFX
// ---------------------------------------------------------------------------

/// One element of the SGML-ish OFX body: `<TAG>value`, `<TAG>` or `</TAG>`.
enum OfxEvent<'a> {
	Open(&'a str, &'a str),
	Close(&'a str),
}

/// OFX 1.x is line-oriented SGML where leaf elements carry their value after
/// the tag and aggregate elements have explicit close tags. A flat event
/// scan is enough; no XML parser applies.
fn scan_ofx(content: &str) -> impl Iterator<Item = OfxEvent<'_>> {
	content.split('<').skip(1).filter_map(|chunk| {
		let (tag, rest) = chunk.split_once('>')?;
		let tag = tag.trim();
		if let Some(close) = tag.strip_prefix('/') {
			Some(OfxEvent::Close(close))
		} else if tag.is_empty() {
			None
		} else {
			Some(OfxEvent::Open(tag, rest.trim()))
		}
	})
}

#[derive(Default)]
struct OfxAccountBuilder {
	is_credit_card: bool,
	account_id: Option<String>,
	account_type: Option<String>,
	currency: Option<String>,
	ledger_balance: Option<BigDecimal>,
	available_balance: Option<BigDecimal>,
	transactions: Vec<ProviderTransactionData>,
}

#[derive(Default)]
struct OfxTransactionBuilder {
	fitid: Option<String>,
	trn_type: Option<String>,
	posted: Option<NaiveDate>,
	amount: Option<BigDecimal>,
	name: Option<String>,
	memo: Option<String>,
}

fn parse_ofx(content: &str) -> Result<Statement, ProviderError> {
	let mut accounts = Vec::new();
	let mut transactions = HashMap::new();

	let mut account: Option<OfxAccountBuilder> = None;
	let mut transaction: Option<OfxTransactionBuilder> = None;
	// BALAMT appears under both LEDGERBAL and AVAILBAL.
	let mut balance_section: Option<&str> = None;

	for event in scan_ofx(content) {
		match event {
			OfxEvent::Open(tag @ ("STMTRS" | "CCSTMTRS"), _) => {
				account = Some(OfxAccountBuilder {
					is_credit_card: tag == "CCSTMTRS",
					..Default::default()
				});
			},
			OfxEvent::Close("STMTRS" | "CCSTMTRS") => {
				if let Some(builder) = account.take() {
					let (data, txns) = builder.finish()?;
					transactions.insert(data.provider_account_id.clone(), txns);
					accounts.push(data);
				}
			},
			OfxEvent::Open("STMTTRN", _) => {
				finish_transaction(&mut transaction, &mut account)?;
				transaction = Some(OfxTransactionBuilder::default());
			},
			OfxEvent::Close("STMTTRN") | OfxEvent::Close("BANKTRANLIST") => {
				finish_transaction(&mut transaction, &mut account)?;
			},
			OfxEvent::Open(section @ ("LEDGERBAL" | "AVAILBAL"), _) => {
				balance_section = Some(if section == "LEDGERBAL" { "ledger" } else { "avail" });
			},
			OfxEvent::Close("LEDGERBAL" | "AVAILBAL") => {
				balance_section = None;
			},
			OfxEvent::Open(tag, value) if !value.is_empty() => {
				if let Some(txn) = transaction.as_mut() {
					match tag {
						"TRNTYPE" => txn.trn_type = Some(value.to_string()),
						"DTPOSTED" => txn.posted = Some(parse_ofx_date(value)?),
						"TRNAMT" => txn.amount = Some(parse_ofx_decimal(value)?),
						"FITID" => txn.fitid = Some(value.to_string()),
						"NAME" => txn.name = Some(value.to_string()),
						"MEMO" => txn.memo = Some(value.to_string()),
						_ => {},
					}
				} else if let Some(acct) = account.as_mut() {
					match tag {
						"CURDEF" => acct.currency = Some(value.to_string()),
						"ACCTID" => acct.account_id = Some(value.to_string()),
						"ACCTTYPE" => acct.account_type = Some(value.to_string()),
						"BALAMT" => match balance_section {
							Some("ledger") =>
								acct.ledger_balance = Some(parse_ofx_decimal(value)?),
							Some("avail") =>
								acct.available_balance = Some(parse_ofx_decimal(value)?),
							_ => {},
						},
						_ => {},
					}
				}
			},
			_ => {},
		}
	}

	// A truncated file may omit the final close tags.
	finish_transaction(&mut transaction, &mut account)?;
	if let Some(builder) = account.take() {
		let (data, txns) = builder.finish()?;
		transactions.insert(data.provider_account_id.clone(), txns);
		accounts.push(data);
	}

	if accounts.is_empty() {
		return Err(ProviderError::InvalidFile("no account statements found".to_string()))
	}
	Ok(Statement { accounts, transactions })
}

fn finish_transaction(
	transaction: &mut Option<OfxTransactionBuilder>,
	account: &mut Option<OfxAccountBuilder>,
) -> Result<(), ProviderError> {
	if let Some(builder) = transaction.take() {
		let account = account
			.as_mut()
			.ok_or_else(|| ProviderError::InvalidFile("transaction outside statement".into()))?;
		account.transactions.push(builder.finish(account.currency.as_deref())?);
	}
	Ok(())
}

impl OfxAccountBuilder {
	fn finish(
		self,
	) -> Result<(ProviderAccountData, Vec<ProviderTransactionData>), ProviderError> {
		let account_id = self
			.account_id
			.ok_or_else(|| ProviderError::InvalidFile("statement without ACCTID".into()))?;
		let currency = self.currency.unwrap_or_else(|| "USD".to_string());
		let account_type = if self.is_credit_card {
			"credit_card".to_string()
		} else {
			map_ofx_account_type(self.account_type.as_deref())
		};
		let masked = masked_suffix(&account_id);
		let name = format!("{} {masked}", display_account_type(&account_type));

		let mut transactions = self.transactions;
		for transaction in &mut transactions {
			transaction.currency.clone_from(&currency);
		}

		Ok((
			ProviderAccountData {
				provider_account_id: account_id,
				account_number_masked: masked,
				name,
				account_type,
				balance: self.ledger_balance.unwrap_or_else(|| BigDecimal::from(0)),
				currency,
				available_balance: self.available_balance,
				is_active: true,
				raw_data: None,
			},
			transactions,
		))
	}
}

impl OfxTransactionBuilder {
	fn finish(self, currency: Option<&str>) -> Result<ProviderTransactionData, ProviderError> {
		let fitid = self
			.fitid
			.ok_or_else(|| ProviderError::InvalidFile("transaction without FITID".into()))?;
		let amount = self
			.amount
			.ok_or_else(|| ProviderError::InvalidFile(format!("{fitid}: missing TRNAMT")))?;
		let posted = self
			.posted
			.ok_or_else(|| ProviderError::InvalidFile(format!("{fitid}: missing DTPOSTED")))?;

		let translated = translate_trn_type(self.trn_type.as_deref());
		let description = match (self.name, self.memo) {
			(Some(name), Some(memo)) if memo != name => format!("{name} - {memo}"),
			(Some(name), _) => name,
			(None, Some(memo)) => memo,
			(None, None) => translated.to_string(),
		};

		Ok(ProviderTransactionData {
			provider_transaction_id: fitid,
			transaction_type: translated.to_string(),
			subtype: Some(translated.to_string()),
			status: "SETTLED".to_string(),
			amount,
			currency: currency.unwrap_or("USD").to_string(),
			description,
			asset_type: None,
			symbol: None,
			security_name: None,
			quantity: None,
			unit_price: None,
			commission: None,
			transaction_date: posted,
			settlement_date: None,
			raw_data: None,
		})
	}
}

fn map_ofx_account_type(acct_type: Option<&str>) -> String {
	match acct_type {
		Some("CHECKING") => "checking",
		Some("SAVINGS") => "savings",
		Some("MONEYMRKT") => "money_market",
		Some("CD") => "cd",
		Some("CREDITLINE") => "line_of_credit",
		_ => "other",
	}
	.to_string()
}

fn display_account_type(account_type: &str) -> String {
	let mut words: Vec<String> = account_type
		.split('_')
		.map(|word| {
			let mut chars = word.chars();
			match chars.next() {
				Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
				None => String::new(),
			}
		})
		.collect();
	words.retain(|w| !w.is_empty());
	words.join(" ")
}

fn translate_trn_type(trn_type: Option<&str>) -> &'static str {
	match trn_type {
		Some("CREDIT" | "DEP" | "DIRECTDEP") => "DEPOSIT",
		Some("DEBIT" | "CHECK" | "PAYMENT" | "ATM" | "POS") => "WITHDRAWAL",
		Some("XFER") => "TRANSFER",
		Some("INT") => "INTEREST",
		Some("DIV") => "DIVIDEND",
		Some("FEE" | "SRVCHG") => "FEE",
		_ => "OTHER",
	}
}

/// `YYYYMMDD`, optionally followed by a time and timezone qualifier.
fn parse_ofx_date(value: &str) -> Result<NaiveDate, ProviderError> {
	let digits = value.get(..8).unwrap_or(value);
	NaiveDate::parse_from_str(digits, "%Y%m%d")
		.map_err(|_| ProviderError::InvalidFile(format!("bad OFX date: {value}")))
}

fn parse_ofx_decimal(value: &str) -> Result<BigDecimal, ProviderError> {
	value
		.trim()
		.parse()
		.map_err(|_| ProviderError::InvalidFile(format!("bad OFX amount: {value}")))
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

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// One row per transaction; account columns repeat on every row of the same
/// account.
#[derive(Debug, Deserialize)]
struct CsvRow {
	account_id: String,
	account_name: String,
	account_type: String,
	account_number: String,
	currency: String,
	balance: String,
	transaction_id: String,
	date: NaiveDate,
	amount: String,
	description: String,
	#[serde(rename = "type")]
	transaction_type: String,
}

fn parse_csv(content: &str) -> Result<Statement, ProviderError> {
	let mut reader = csv::ReaderBuilder::new()
		.trim(csv::Trim::All)
		.from_reader(content.as_bytes());

	let mut accounts: Vec<ProviderAccountData> = Vec::new();
	let mut transactions: HashMap<String, Vec<ProviderTransactionData>> = HashMap::new();

	for row in reader.deserialize::<CsvRow>() {
		let row = row.map_err(|e| ProviderError::InvalidFile(e.to_string()))?;
		let balance: BigDecimal = row
			.balance
			.parse()
			.map_err(|_| ProviderError::InvalidFile(format!("bad balance: {}", row.balance)))?;
		let amount: BigDecimal = row
			.amount
			.parse()
			.map_err(|_| ProviderError::InvalidFile(format!("bad amount: {}", row.amount)))?;

		if !accounts.iter().any(|a| a.provider_account_id == row.account_id) {
			accounts.push(ProviderAccountData {
				provider_account_id: row.account_id.clone(),
				account_number_masked: masked_suffix(&row.account_number),
				name: row.account_name.clone(),
				account_type: row.account_type.clone(),
				balance,
				currency: row.currency.clone(),
				available_balance: None,
				is_active: true,
				raw_data: None,
			});
		}

		transactions.entry(row.account_id.clone()).or_default().push(
			ProviderTransactionData {
				provider_transaction_id: row.transaction_id,
				transaction_type: row.transaction_type.clone(),
				subtype: None,
				status: "SETTLED".to_string(),
				amount,
				currency: row.currency,
				description: row.description,
				asset_type: None,
				symbol: None,
				security_name: None,
				quantity: None,
				unit_price: None,
				commission: None,
				transaction_date: row.date,
				settlement_date: None,
				raw_data: None,
			},
		);
	}

	if accounts.is_empty() {
		return Err(ProviderError::InvalidFile("no rows".to_string()))
	}
	Ok(Statement { accounts, transactions })
}
