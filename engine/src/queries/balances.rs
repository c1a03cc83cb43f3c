//! Balance snapshot queries: history, latest-per-account, user-wide.

use std::{collections::BTreeMap, sync::Arc};

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
	domain::{BalanceSnapshot, SnapshotSource},
	ownership::{OwnershipError, OwnershipVerifier},
	store::SnapshotStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceQueryError {
	#[error("ACCOUNT_NOT_FOUND: account not found")]
	AccountNotFound,
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: account not owned by user")]
	NotOwnedByUser,
	#[error("INVALID_DATE_RANGE: start date must be before end date")]
	InvalidDateRange,
	#[error("INVALID_SOURCE: unknown snapshot source")]
	InvalidSource,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl From<OwnershipError> for BalanceQueryError {
	fn from(error: OwnershipError) -> Self {
		match error {
			OwnershipError::NotOwnedByUser => BalanceQueryError::NotOwnedByUser,
			OwnershipError::ConnectionNotFound => BalanceQueryError::ConnectionNotFound,
			OwnershipError::Store(detail) => BalanceQueryError::Database(detail),
			_ => BalanceQueryError::AccountNotFound,
		}
	}
}

fn parse_source(source: Option<&str>) -> Result<Option<SnapshotSource>, BalanceQueryError> {
	source
		.map(|source| source.parse().map_err(|_| BalanceQueryError::InvalidSource))
		.transpose()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotView {
	pub id: Uuid,
	pub account_id: Uuid,
	pub balance: BigDecimal,
	pub available_balance: Option<BigDecimal>,
	pub holdings_value: Option<BigDecimal>,
	pub cash_value: Option<BigDecimal>,
	pub currency: String,
	pub source: String,
	pub captured_at: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
	/// Delta against the previous snapshot in the result set; absent for the
	/// first row and in list views that carry no ordering context.
	pub change_amount: Option<BigDecimal>,
	pub change_percent: Option<f64>,
}

impl SnapshotView {
	fn project(snapshot: &BalanceSnapshot, previous: Option<&BalanceSnapshot>) -> Self {
		let (change_amount, change_percent) = match previous
			.and_then(|previous| snapshot.change_from(previous))
		{
			Some((change, percent)) => (Some(change.amount().clone()), percent),
			None => (None, None),
		};
		Self {
			id: snapshot.id,
			account_id: snapshot.account_id,
			balance: snapshot.balance().amount().clone(),
			available_balance: snapshot.available_balance().map(|m| m.amount().clone()),
			holdings_value: snapshot.holdings_value().map(|m| m.amount().clone()),
			cash_value: snapshot.cash_value().map(|m| m.amount().clone()),
			currency: snapshot.currency().as_str().to_string(),
			source: snapshot.source.as_str().to_string(),
			captured_at: snapshot.captured_at,
			created_at: snapshot.created_at,
			change_amount,
			change_percent,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceHistoryView {
	pub snapshots: Vec<SnapshotView>,
	pub total_count: usize,
	pub start_balance: Option<BigDecimal>,
	pub end_balance: Option<BigDecimal>,
	pub total_change_amount: Option<BigDecimal>,
	pub total_change_percent: Option<f64>,
	pub currency: Option<String>,
}

impl BalanceHistoryView {
	fn empty() -> Self {
		Self {
			snapshots: vec![],
			total_count: 0,
			start_balance: None,
			end_balance: None,
			total_change_amount: None,
			total_change_percent: None,
			currency: None,
		}
	}

	/// Chronological history with per-row deltas and a period summary.
	fn with_deltas(snapshots: Vec<BalanceSnapshot>) -> Self {
		if snapshots.is_empty() {
			return Self::empty()
		}

		let mut views = Vec::with_capacity(snapshots.len());
		let mut previous: Option<&BalanceSnapshot> = None;
		for snapshot in &snapshots {
			views.push(SnapshotView::project(snapshot, previous));
			previous = Some(snapshot);
		}

		let first = &snapshots[0];
		let last = &snapshots[snapshots.len() - 1];
		let total_change = last.balance().amount() - first.balance().amount();
		let total_change_percent = if first.balance().is_zero() {
			None
		} else {
			(&total_change / first.balance().amount() * BigDecimal::from(100)).to_f64()
		};

		Self {
			total_count: views.len(),
			snapshots: views,
			start_balance: Some(first.balance().amount().clone()),
			end_balance: Some(last.balance().amount().clone()),
			total_change_amount: Some(total_change),
			total_change_percent,
			currency: Some(first.currency().as_str().to_string()),
		}
	}

	/// Projection without delta computation, for unordered or mixed-account
	/// result sets where row-to-row change is meaningless.
	fn without_deltas(snapshots: Vec<BalanceSnapshot>) -> Self {
		let views: Vec<SnapshotView> =
			snapshots.iter().map(|snapshot| SnapshotView::project(snapshot, None)).collect();
		Self {
			currency: snapshots.first().map(|s| s.currency().as_str().to_string()),
			total_count: views.len(),
			snapshots: views,
			start_balance: None,
			end_balance: None,
			total_change_amount: None,
			total_change_percent: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct GetBalanceHistory {
	pub user_id: Uuid,
	pub account_id: Uuid,
	pub start_date: DateTime<Utc>,
	pub end_date: DateTime<Utc>,
	pub source: Option<String>,
}

pub struct GetBalanceHistoryHandler {
	snapshots: Arc<dyn SnapshotStore>,
	verifier: Arc<OwnershipVerifier>,
}

impl GetBalanceHistoryHandler {
	pub fn new(snapshots: Arc<dyn SnapshotStore>, verifier: Arc<OwnershipVerifier>) -> Self {
		Self { snapshots, verifier }
	}

	pub async fn handle(
		&self,
		query: GetBalanceHistory,
	) -> Result<BalanceHistoryView, BalanceQueryError> {
		if query.start_date >= query.end_date {
			return Err(BalanceQueryError::InvalidDateRange)
		}
		let source = parse_source(query.source.as_deref())?;
		self.verifier
			.verify_account_ownership_only(query.account_id, query.user_id)
			.await?;

		let snapshots = self
			.snapshots
			.find_by_account_id_in_range(
				query.account_id,
				query.start_date,
				query.end_date,
				source,
			)
			.await
			.map_err(|e| BalanceQueryError::Database(e.to_string()))?;
		Ok(BalanceHistoryView::with_deltas(snapshots))
	}
}

#[derive(Debug, Clone)]
pub struct ListBalanceSnapshotsByAccount {
	pub user_id: Uuid,
	pub account_id: Uuid,
	pub source: Option<String>,
	pub limit: Option<usize>,
}

pub struct ListBalanceSnapshotsByAccountHandler {
	snapshots: Arc<dyn SnapshotStore>,
	verifier: Arc<OwnershipVerifier>,
}

impl ListBalanceSnapshotsByAccountHandler {
	pub fn new(snapshots: Arc<dyn SnapshotStore>, verifier: Arc<OwnershipVerifier>) -> Self {
		Self { snapshots, verifier }
	}

	pub async fn handle(
		&self,
		query: ListBalanceSnapshotsByAccount,
	) -> Result<BalanceHistoryView, BalanceQueryError> {
		let source = parse_source(query.source.as_deref())?;
		self.verifier
			.verify_account_ownership_only(query.account_id, query.user_id)
			.await?;

		let snapshots = self
			.snapshots
			.find_by_account_id(query.account_id, source, query.limit)
			.await
			.map_err(|e| BalanceQueryError::Database(e.to_string()))?;
		Ok(BalanceHistoryView::without_deltas(snapshots))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestSnapshotsView {
	pub snapshots: Vec<SnapshotView>,
	pub total_count: usize,
	/// Stringified aggregate balances, bucketed by currency.
	pub total_balance_by_currency: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct GetLatestBalanceSnapshots {
	pub user_id: Uuid,
}

pub struct GetLatestBalanceSnapshotsHandler {
	snapshots: Arc<dyn SnapshotStore>,
}

impl GetLatestBalanceSnapshotsHandler {
	pub fn new(snapshots: Arc<dyn SnapshotStore>) -> Self {
		Self { snapshots }
	}

	pub async fn handle(
		&self,
		query: GetLatestBalanceSnapshots,
	) -> Result<LatestSnapshotsView, BalanceQueryError> {
		let snapshots = self
			.snapshots
			.find_latest_by_user_id(query.user_id)
			.await
			.map_err(|e| BalanceQueryError::Database(e.to_string()))?;

		let mut totals: BTreeMap<String, BigDecimal> = BTreeMap::new();
		for snapshot in &snapshots {
			*totals
				.entry(snapshot.currency().as_str().to_string())
				.or_insert_with(|| BigDecimal::from(0)) += snapshot.balance().amount();
		}

		let views: Vec<SnapshotView> =
			snapshots.iter().map(|snapshot| SnapshotView::project(snapshot, None)).collect();
		Ok(LatestSnapshotsView {
			total_count: views.len(),
			snapshots: views,
			total_balance_by_currency: totals
				.into_iter()
				.map(|(currency, total)| (currency, total.to_string()))
				.collect(),
		})
	}
}

#[derive(Debug, Clone)]
pub struct GetUserBalanceHistory {
	pub user_id: Uuid,
	pub start_date: DateTime<Utc>,
	pub end_date: DateTime<Utc>,
	pub source: Option<String>,
}

pub struct GetUserBalanceHistoryHandler {
	snapshots: Arc<dyn SnapshotStore>,
}

impl GetUserBalanceHistoryHandler {
	pub fn new(snapshots: Arc<dyn SnapshotStore>) -> Self {
		Self { snapshots }
	}

	/// Cross-account history. Row-to-row deltas are not computed: adjacent
	/// snapshots may belong to different accounts.
	pub async fn handle(
		&self,
		query: GetUserBalanceHistory,
	) -> Result<BalanceHistoryView, BalanceQueryError> {
		if query.start_date >= query.end_date {
			return Err(BalanceQueryError::InvalidDateRange)
		}
		let source = parse_source(query.source.as_deref())?;

		let snapshots = self
			.snapshots
			.find_by_user_id_in_range(query.user_id, query.start_date, query.end_date, source)
			.await
			.map_err(|e| BalanceQueryError::Database(e.to_string()))?;
		Ok(BalanceHistoryView::without_deltas(snapshots))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		domain::{
			Account, AccountType, ConnectionStatus, CredentialType, Currency, Money, NewAccount,
			NewConnection, NewSnapshot, ProviderConnection, ProviderCredentials,
		},
		store::{memory::MemoryStore, AccountStore, ConnectionStore},
	};
	use chrono::Duration;

	struct Fixture {
		store: Arc<MemoryStore>,
		user_id: Uuid,
		account_id: Uuid,
		t0: DateTime<Utc>,
	}

	async fn fixture() -> Fixture {
		let store = Arc::new(MemoryStore::new());
		let user_id = Uuid::now_v7();
		let now = Utc::now();
		let connection = ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id,
			provider_id: Uuid::now_v7(),
			provider_slug: "schwab".to_string(),
			alias: None,
			status: ConnectionStatus::Active,
			credentials: Some(
				ProviderCredentials::new(b"sealed".to_vec(), CredentialType::Oauth2, None)
					.unwrap(),
			),
			connected_at: Some(now),
			last_sync_at: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		ConnectionStore::save(store.as_ref(), &connection).await.unwrap();

		let account = Account::new(NewAccount {
			id: Uuid::now_v7(),
			connection_id: connection.id,
			provider_account_id: "ACC-1".to_string(),
			account_number_masked: "****1".to_string(),
			name: "Brokerage".to_string(),
			account_type: AccountType::Brokerage,
			balance: Money::zero(Currency::USD),
			available_balance: None,
			currency: Currency::USD,
			is_active: true,
			last_synced_at: None,
			provider_metadata: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		AccountStore::save(store.as_ref(), &account).await.unwrap();

		Fixture { store, user_id, account_id: account.id, t0: now - Duration::days(10) }
	}

	impl Fixture {
		fn verifier(&self) -> Arc<OwnershipVerifier> {
			Arc::new(OwnershipVerifier::new(
				self.store.clone(),
				self.store.clone(),
				self.store.clone(),
				self.store.clone(),
			))
		}

		async fn seed_snapshot(&self, balance: &str, offset_days: i64) {
			let captured_at = self.t0 + Duration::days(offset_days);
			let snapshot = BalanceSnapshot::new(NewSnapshot {
				id: Uuid::now_v7(),
				account_id: self.account_id,
				balance: Money::new(balance.parse().unwrap(), Currency::USD),
				available_balance: None,
				holdings_value: None,
				cash_value: None,
				currency: Currency::USD,
				source: SnapshotSource::AccountSync,
				provider_metadata: None,
				captured_at,
				created_at: captured_at,
			})
			.unwrap();
			SnapshotStore::save(self.store.as_ref(), &snapshot).await.unwrap();
		}
	}

	#[tokio::test]
	async fn history_computes_row_deltas_and_period_summary() {
		let f = fixture().await;
		f.seed_snapshot("100", 0).await;
		f.seed_snapshot("110", 1).await;
		f.seed_snapshot("121", 2).await;

		let handler = GetBalanceHistoryHandler::new(f.store.clone(), f.verifier());
		let view = handler
			.handle(GetBalanceHistory {
				user_id: f.user_id,
				account_id: f.account_id,
				start_date: f.t0 - Duration::hours(1),
				end_date: f.t0 + Duration::days(3),
				source: None,
			})
			.await
			.unwrap();

		assert_eq!(view.total_count, 3);
		assert_eq!(view.start_balance, Some("100".parse().unwrap()));
		assert_eq!(view.end_balance, Some("121".parse().unwrap()));
		assert_eq!(view.total_change_amount, Some("21".parse().unwrap()));
		assert_eq!(view.total_change_percent, Some(21.0));
		assert_eq!(view.currency.as_deref(), Some("USD"));

		let change_amounts: Vec<Option<BigDecimal>> =
			view.snapshots.iter().map(|s| s.change_amount.clone()).collect();
		assert_eq!(
			change_amounts,
			vec![None, Some("10".parse().unwrap()), Some("11".parse().unwrap())]
		);
		let change_percents: Vec<Option<f64>> =
			view.snapshots.iter().map(|s| s.change_percent).collect();
		assert_eq!(change_percents, vec![None, Some(10.0), Some(10.0)]);
	}

	#[tokio::test]
	async fn invalid_range_and_source_are_rejected_before_ownership() {
		let f = fixture().await;
		let handler = GetBalanceHistoryHandler::new(f.store.clone(), f.verifier());

		let inverted = handler
			.handle(GetBalanceHistory {
				user_id: f.user_id,
				account_id: f.account_id,
				start_date: f.t0,
				end_date: f.t0,
				source: None,
			})
			.await;
		assert_eq!(inverted, Err(BalanceQueryError::InvalidDateRange));

		let bad_source = handler
			.handle(GetBalanceHistory {
				user_id: f.user_id,
				account_id: f.account_id,
				start_date: f.t0,
				end_date: f.t0 + Duration::days(1),
				source: Some("webhook".to_string()),
			})
			.await;
		assert_eq!(bad_source, Err(BalanceQueryError::InvalidSource));
	}

	#[tokio::test]
	async fn history_is_ownership_guarded() {
		let f = fixture().await;
		let handler = GetBalanceHistoryHandler::new(f.store.clone(), f.verifier());
		let result = handler
			.handle(GetBalanceHistory {
				user_id: Uuid::now_v7(),
				account_id: f.account_id,
				start_date: f.t0,
				end_date: f.t0 + Duration::days(1),
				source: None,
			})
			.await;
		assert_eq!(result, Err(BalanceQueryError::NotOwnedByUser));
	}

	#[tokio::test]
	async fn empty_history_has_no_summary() {
		let f = fixture().await;
		let handler = GetBalanceHistoryHandler::new(f.store.clone(), f.verifier());
		let view = handler
			.handle(GetBalanceHistory {
				user_id: f.user_id,
				account_id: f.account_id,
				start_date: f.t0,
				end_date: f.t0 + Duration::days(1),
				source: None,
			})
			.await
			.unwrap();
		assert_eq!(view.total_count, 0);
		assert_eq!(view.total_change_percent, None);
		assert_eq!(view.currency, None);
	}

	#[tokio::test]
	async fn zero_start_balance_yields_no_percent() {
		let f = fixture().await;
		f.seed_snapshot("0", 0).await;
		f.seed_snapshot("50", 1).await;

		let handler = GetBalanceHistoryHandler::new(f.store.clone(), f.verifier());
		let view = handler
			.handle(GetBalanceHistory {
				user_id: f.user_id,
				account_id: f.account_id,
				start_date: f.t0 - Duration::hours(1),
				end_date: f.t0 + Duration::days(2),
				source: None,
			})
			.await
			.unwrap();
		assert_eq!(view.total_change_amount, Some("50".parse().unwrap()));
		assert_eq!(view.total_change_percent, None);
		assert_eq!(view.snapshots[1].change_percent, None);
	}

	#[tokio::test]
	async fn recent_list_is_descending_without_deltas() {
		let f = fixture().await;
		f.seed_snapshot("100", 0).await;
		f.seed_snapshot("110", 1).await;

		let handler =
			ListBalanceSnapshotsByAccountHandler::new(f.store.clone(), f.verifier());
		let view = handler
			.handle(ListBalanceSnapshotsByAccount {
				user_id: f.user_id,
				account_id: f.account_id,
				source: None,
				limit: Some(10),
			})
			.await
			.unwrap();
		assert_eq!(view.total_count, 2);
		assert_eq!(view.snapshots[0].balance, "110".parse::<BigDecimal>().unwrap());
		assert!(view.snapshots.iter().all(|s| s.change_amount.is_none()));
	}

	#[tokio::test]
	async fn latest_snapshots_aggregate_by_currency() {
		let f = fixture().await;
		f.seed_snapshot("100", 0).await;
		f.seed_snapshot("110", 1).await;

		let handler = GetLatestBalanceSnapshotsHandler::new(f.store.clone());
		let view = handler
			.handle(GetLatestBalanceSnapshots { user_id: f.user_id })
			.await
			.unwrap();
		// One snapshot per account, and only the newest one counts.
		assert_eq!(view.total_count, 1);
		assert_eq!(view.total_balance_by_currency["USD"], "110");
	}

	#[tokio::test]
	async fn user_history_spans_accounts_without_deltas() {
		let f = fixture().await;
		f.seed_snapshot("100", 0).await;
		f.seed_snapshot("110", 1).await;

		let handler = GetUserBalanceHistoryHandler::new(f.store.clone());
		let view = handler
			.handle(GetUserBalanceHistory {
				user_id: f.user_id,
				start_date: f.t0 - Duration::hours(1),
				end_date: f.t0 + Duration::days(3),
				source: None,
			})
			.await
			.unwrap();
		assert_eq!(view.total_count, 2);
		assert!(view.snapshots.iter().all(|s| s.change_amount.is_none()));
		assert_eq!(view.total_change_amount, None);
	}
}
