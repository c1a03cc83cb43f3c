//! Query side: read-only handlers returning view types.
//!
//! Queries verify ownership, fetch, and project. They never mutate state
//! and never publish events. Views flatten Money into (amount, currency)
//! pairs and enums into their string values so the presentation layer sees
//! no domain types.

pub mod accounts;
pub mod balances;
pub mod connections;
pub mod holdings;
pub mod transactions;

pub use accounts::{
	AccountListView, AccountQueryError, AccountView, GetAccount, GetAccountHandler,
	ListAccounts, ListAccountsHandler,
};
pub use balances::{
	BalanceHistoryView, BalanceQueryError, GetBalanceHistory, GetBalanceHistoryHandler,
	GetLatestBalanceSnapshots, GetLatestBalanceSnapshotsHandler, GetUserBalanceHistory,
	GetUserBalanceHistoryHandler, LatestSnapshotsView, ListBalanceSnapshotsByAccount,
	ListBalanceSnapshotsByAccountHandler, SnapshotView,
};
pub use connections::{
	ConnectionListView, ConnectionQueryError, ConnectionView, GetProviderConnection,
	GetProviderConnectionHandler, ListProviderConnections, ListProviderConnectionsHandler,
};
pub use holdings::{
	HoldingListView, HoldingQueryError, HoldingView, ListHoldingsByAccount,
	ListHoldingsByAccountHandler, ListHoldingsByUser, ListHoldingsByUserHandler,
};
pub use transactions::{
	GetTransaction, GetTransactionHandler, ListTransactionsByAccount,
	ListTransactionsByAccountHandler, ListTransactionsByDateRange,
	ListTransactionsByDateRangeHandler, ListTransactionsBySecurity,
	ListTransactionsBySecurityHandler, TransactionListView, TransactionQueryError,
	TransactionView,
};
