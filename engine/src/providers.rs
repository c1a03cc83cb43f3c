//! Provider adapters: the uniform contract the sync engine drives, and the
//! registry that resolves a connection's slug to an adapter at runtime.
//!
//! Adapters fetch heterogeneous provider data and surface it as plain
//! records with string-typed classifications; normalization into domain
//! enums happens in the command handlers, not here.

pub mod file;
pub mod rest;

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroize;

#[derive(Error, Debug)]
pub enum ProviderError {
	#[error("unknown provider: {0}")]
	UnknownProvider(String),
	#[error("provider rejected the credentials: {0}")]
	Unauthorized(String),
	#[error("provider request timed out")]
	Timeout,
	#[error("provider transport error: {0}")]
	Transport(String),
	#[error("provider returned malformed data: {0}")]
	MalformedResponse(String),
	#[error("credential bundle is missing `{0}`")]
	MissingCredential(&'static str),
	#[error("unparseable statement file: {0}")]
	InvalidFile(String),
}

/// Decrypted credential material, shaped as a string-keyed map so one bundle
/// type serves OAuth tokens, API keys and file uploads alike. Values are
/// wiped on drop.
#[derive(Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialBundle(HashMap<String, String>);

impl CredentialBundle {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
		self.0.insert(key.to_string(), value.into());
		self
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	pub fn require(&self, key: &'static str) -> Result<&str, ProviderError> {
		self.get(key).ok_or(ProviderError::MissingCredential(key))
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl Drop for CredentialBundle {
	fn drop(&mut self) {
		for value in self.0.values_mut() {
			value.zeroize();
		}
	}
}

// Key names only; values must never reach logs.
impl fmt::Debug for CredentialBundle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
		keys.sort_unstable();
		f.debug_tuple("CredentialBundle").field(&keys).finish()
	}
}

/// Bundle keys used by file-import providers in place of an access token.
pub const FILE_CONTENT_KEY: &str = "file_content";
pub const FILE_FORMAT_KEY: &str = "file_format";
pub const FILE_NAME_KEY: &str = "file_name";

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAccountData {
	pub provider_account_id: String,
	pub account_number_masked: String,
	pub name: String,
	pub account_type: String,
	pub balance: BigDecimal,
	pub currency: String,
	pub available_balance: Option<BigDecimal>,
	pub is_active: bool,
	pub raw_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTransactionData {
	pub provider_transaction_id: String,
	pub transaction_type: String,
	pub subtype: Option<String>,
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
	pub raw_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHoldingData {
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
	pub raw_data: Option<serde_json::Value>,
}

/// The one contract every provider integration satisfies, whether it speaks
/// OAuth-protected REST, API-key REST, or parses an uploaded statement file.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
	async fn fetch_accounts(
		&self,
		credentials: &CredentialBundle,
	) -> Result<Vec<ProviderAccountData>, ProviderError>;

	async fn fetch_transactions(
		&self,
		credentials: &CredentialBundle,
		provider_account_id: &str,
		start_date: Option<NaiveDate>,
		end_date: Option<NaiveDate>,
	) -> Result<Vec<ProviderTransactionData>, ProviderError>;

	async fn fetch_holdings(
		&self,
		credentials: &CredentialBundle,
		provider_account_id: &str,
	) -> Result<Vec<ProviderHoldingData>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
	pub id: Uuid,
	pub slug: String,
}

/// Slug → adapter factory. Read-only after initialization.
#[derive(Default)]
pub struct ProviderRegistry {
	providers: HashMap<String, (ProviderDescriptor, Arc<dyn ProviderAdapter>)>,
}

impl ProviderRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(
		&mut self,
		slug: &str,
		provider_id: Uuid,
		adapter: Arc<dyn ProviderAdapter>,
	) {
		self.providers.insert(
			slug.to_string(),
			(ProviderDescriptor { id: provider_id, slug: slug.to_string() }, adapter),
		);
	}

	pub fn get(&self, slug: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
		self.providers
			.get(slug)
			.map(|(_, adapter)| adapter.clone())
			.ok_or_else(|| ProviderError::UnknownProvider(slug.to_string()))
	}

	pub fn descriptor(&self, slug: &str) -> Option<&ProviderDescriptor> {
		self.providers.get(slug).map(|(descriptor, _)| descriptor)
	}

	pub fn supports(&self, slug: &str) -> bool {
		self.providers.contains_key(slug)
	}

	pub fn list_supported(&self) -> Vec<String> {
		let mut slugs: Vec<String> = self.providers.keys().cloned().collect();
		slugs.sort_unstable();
		slugs
	}
}
