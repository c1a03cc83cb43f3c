//! Domain layer: value objects and entities with their invariants.
//!
//! Nothing in this module performs I/O. Entities expose pure query methods
//! and mutation methods that return `Result` where an invariant could be
//! violated; constructors validate and fail instead of producing an entity
//! that breaks its own rules.

pub mod account;
pub mod connection;
pub mod credentials;
pub mod holding;
pub mod money;
pub mod rate_limit;
pub mod snapshot;
pub mod transaction;

pub use account::{Account, AccountError, AccountType, NewAccount};
pub use connection::{
	ConnectionError, ConnectionStatus, NewConnection, ProviderConnection, MAX_ALIAS_LEN,
	MAX_SLUG_LEN,
};
pub use credentials::{CredentialType, CredentialsError, ProviderCredentials};
pub use holding::{AssetType, Holding, HoldingError, NewHolding};
pub use money::{Currency, Money, MoneyError};
pub use rate_limit::{RateLimitRule, RateLimitRuleError, RateLimitScope};
pub use snapshot::{BalanceSnapshot, NewSnapshot, SnapshotError, SnapshotSource};
pub use transaction::{
	NewTransaction, Transaction, TransactionError, TransactionStatus, TransactionSubtype,
	TransactionType,
};
