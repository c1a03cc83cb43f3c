//! Account queries.

use std::{collections::BTreeMap, sync::Arc};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
	domain::{Account, AccountType},
	ownership::{OwnershipError, OwnershipVerifier},
	store::AccountStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountQueryError {
	#[error("ACCOUNT_NOT_FOUND: account not found")]
	AccountNotFound,
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: account not owned by user")]
	NotOwnedByUser,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl From<OwnershipError> for AccountQueryError {
	fn from(error: OwnershipError) -> Self {
		match error {
			OwnershipError::NotOwnedByUser => AccountQueryError::NotOwnedByUser,
			OwnershipError::ConnectionNotFound => AccountQueryError::ConnectionNotFound,
			OwnershipError::Store(detail) => AccountQueryError::Database(detail),
			_ => AccountQueryError::AccountNotFound,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountView {
	pub id: Uuid,
	pub connection_id: Uuid,
	pub provider_account_id: String,
	pub account_number_masked: String,
	pub name: String,
	pub display_name: String,
	pub account_type: String,
	pub category: String,
	pub balance: BigDecimal,
	pub available_balance: Option<BigDecimal>,
	pub currency: String,
	pub is_active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

fn category(account_type: AccountType) -> &'static str {
	if account_type.is_investment() {
		"investment"
	} else if account_type.is_bank() {
		"banking"
	} else if account_type.is_credit() {
		"credit"
	} else {
		"other"
	}
}

impl From<&Account> for AccountView {
	fn from(account: &Account) -> Self {
		Self {
			id: account.id,
			connection_id: account.connection_id,
			provider_account_id: account.provider_account_id.clone(),
			account_number_masked: account.account_number_masked.clone(),
			name: account.name.clone(),
			display_name: account.display_name(),
			account_type: account.account_type.as_str().to_string(),
			category: category(account.account_type).to_string(),
			balance: account.balance().amount().clone(),
			available_balance: account.available_balance().map(|m| m.amount().clone()),
			currency: account.currency().as_str().to_string(),
			is_active: account.is_active,
			last_synced_at: account.last_synced_at,
			created_at: account.created_at,
			updated_at: account.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountListView {
	pub accounts: Vec<AccountView>,
	pub total_count: usize,
	pub active_count: usize,
	/// Stringified balance totals, bucketed by currency.
	pub total_balance_by_currency: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct GetAccount {
	pub user_id: Uuid,
	pub account_id: Uuid,
}

pub struct GetAccountHandler {
	verifier: Arc<OwnershipVerifier>,
}

impl GetAccountHandler {
	pub fn new(verifier: Arc<OwnershipVerifier>) -> Self {
		Self { verifier }
	}

	pub async fn handle(&self, query: GetAccount) -> Result<AccountView, AccountQueryError> {
		let account =
			self.verifier.verify_account_ownership(query.account_id, query.user_id).await?;
		Ok(AccountView::from(&account))
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ListAccounts {
	pub user_id: Uuid,
	pub active_only: bool,
	pub account_type: Option<AccountType>,
}

pub struct ListAccountsHandler {
	accounts: Arc<dyn AccountStore>,
}

impl ListAccountsHandler {
	pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
		Self { accounts }
	}

	pub async fn handle(&self, query: ListAccounts) -> Result<AccountListView, AccountQueryError> {
		let accounts = self
			.accounts
			.find_by_user_id(query.user_id, query.active_only, query.account_type)
			.await
			.map_err(|e| AccountQueryError::Database(e.to_string()))?;

		let mut totals: BTreeMap<String, BigDecimal> = BTreeMap::new();
		let mut active_count = 0;
		for account in &accounts {
			if account.is_active {
				active_count += 1;
			}
			let entry = totals
				.entry(account.currency().as_str().to_string())
				.or_insert_with(|| BigDecimal::from(0));
			*entry += account.balance().amount();
		}

		let views: Vec<AccountView> = accounts.iter().map(AccountView::from).collect();
		Ok(AccountListView {
			total_count: views.len(),
			active_count,
			total_balance_by_currency: totals
				.into_iter()
				.map(|(currency, total)| (currency, total.to_string()))
				.collect(),
			accounts: views,
		})
	}
}
