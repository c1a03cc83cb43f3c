//! Provider connection entity and its status state machine.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::credentials::ProviderCredentials;

pub const MAX_SLUG_LEN: usize = 50;
pub const MAX_ALIAS_LEN: usize = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
	#[error("provider slug must be 1-{MAX_SLUG_LEN} characters")]
	InvalidProviderSlug,
	#[error("alias must be at most {MAX_ALIAS_LEN} characters")]
	InvalidAlias,
	#[error("an active connection must hold credentials")]
	ActiveWithoutCredentials,
	#[error("credentials are required")]
	CredentialsRequired,
	#[error("cannot transition to active from the current status")]
	CannotTransitionToActive,
	#[error("cannot transition to expired from the current status")]
	CannotTransitionToExpired,
	#[error("cannot transition to revoked from the current status")]
	CannotTransitionToRevoked,
	#[error("cannot transition to failed from the current status")]
	CannotTransitionToFailed,
	#[error("connection is not active")]
	NotConnected,
	#[error("unknown connection status: {0}")]
	UnknownStatus(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	Pending,
	Active,
	Expired,
	Revoked,
	Failed,
	Disconnected,
}

impl ConnectionStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ConnectionStatus::Pending => "pending",
			ConnectionStatus::Active => "active",
			ConnectionStatus::Expired => "expired",
			ConnectionStatus::Revoked => "revoked",
			ConnectionStatus::Failed => "failed",
			ConnectionStatus::Disconnected => "disconnected",
		}
	}

	pub fn needs_reauthentication(&self) -> bool {
		matches!(
			self,
			ConnectionStatus::Expired | ConnectionStatus::Revoked | ConnectionStatus::Failed
		)
	}
}

impl FromStr for ConnectionStatus {
	type Err = ConnectionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(ConnectionStatus::Pending),
			"active" => Ok(ConnectionStatus::Active),
			"expired" => Ok(ConnectionStatus::Expired),
			"revoked" => Ok(ConnectionStatus::Revoked),
			"failed" => Ok(ConnectionStatus::Failed),
			"disconnected" => Ok(ConnectionStatus::Disconnected),
			other => Err(ConnectionError::UnknownStatus(other.to_string())),
		}
	}
}

impl fmt::Display for ConnectionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One user's relationship with one external data provider.
///
/// Status machine:
///
/// ```text
/// PENDING ──► ACTIVE ◄──── EXPIRED / REVOKED / FAILED
///    │           │                   ▲
///    ▼           └───────────────────┘
/// FAILED      any ──► DISCONNECTED (terminal)
/// ```
///
/// Connections are never hard-deleted; `Disconnected` preserves the audit
/// trail while clearing credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConnection {
	pub id: Uuid,
	pub user_id: Uuid,
	pub provider_id: Uuid,
	pub provider_slug: String,
	pub alias: Option<String>,
	status: ConnectionStatus,
	credentials: Option<ProviderCredentials>,
	pub connected_at: Option<DateTime<Utc>>,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

pub struct NewConnection {
	pub id: Uuid,
	pub user_id: Uuid,
	pub provider_id: Uuid,
	pub provider_slug: String,
	pub alias: Option<String>,
	pub status: ConnectionStatus,
	pub credentials: Option<ProviderCredentials>,
	pub connected_at: Option<DateTime<Utc>>,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl ProviderConnection {
	pub fn new(fields: NewConnection) -> Result<Self, ConnectionError> {
		if fields.provider_slug.is_empty() || fields.provider_slug.len() > MAX_SLUG_LEN {
			return Err(ConnectionError::InvalidProviderSlug)
		}
		if fields.alias.as_ref().is_some_and(|alias| alias.len() > MAX_ALIAS_LEN) {
			return Err(ConnectionError::InvalidAlias)
		}
		if fields.status == ConnectionStatus::Active && fields.credentials.is_none() {
			return Err(ConnectionError::ActiveWithoutCredentials)
		}
		Ok(Self {
			id: fields.id,
			user_id: fields.user_id,
			provider_id: fields.provider_id,
			provider_slug: fields.provider_slug,
			alias: fields.alias,
			status: fields.status,
			credentials: fields.credentials,
			connected_at: fields.connected_at,
			last_sync_at: fields.last_sync_at,
			created_at: fields.created_at,
			updated_at: fields.updated_at,
		})
	}

	pub fn status(&self) -> ConnectionStatus {
		self.status
	}

	pub fn credentials(&self) -> Option<&ProviderCredentials> {
		self.credentials.as_ref()
	}

	pub fn is_connected(&self) -> bool {
		self.status == ConnectionStatus::Active && self.credentials.is_some()
	}

	pub fn needs_reauthentication(&self) -> bool {
		self.status.needs_reauthentication()
	}

	pub fn is_credentials_expired(&self, now: DateTime<Utc>) -> bool {
		self.credentials.as_ref().is_some_and(|c| c.is_expired(now))
	}

	pub fn is_credentials_expiring_soon(&self, now: DateTime<Utc>) -> bool {
		self.credentials
			.as_ref()
			.is_some_and(|c| c.is_expiring_soon(now, chrono::Duration::minutes(5)))
	}

	pub fn can_sync(&self, now: DateTime<Utc>) -> bool {
		self.is_connected() && !self.is_credentials_expired(now)
	}

	/// Transition to `Active` after successful authentication. Allowed from
	/// `Pending` and from every re-authenticatable state.
	pub fn mark_connected(
		&mut self,
		credentials: ProviderCredentials,
	) -> Result<(), ConnectionError> {
		match self.status {
			ConnectionStatus::Pending |
			ConnectionStatus::Expired |
			ConnectionStatus::Revoked |
			ConnectionStatus::Failed => {},
			_ => return Err(ConnectionError::CannotTransitionToActive),
		}

		self.status = ConnectionStatus::Active;
		self.credentials = Some(credentials);
		self.updated_at = Utc::now();
		if self.connected_at.is_none() {
			self.connected_at = Some(self.updated_at);
		}
		Ok(())
	}

	/// Terminal transition. Always succeeds; credentials are cleared.
	pub fn mark_disconnected(&mut self) {
		self.status = ConnectionStatus::Disconnected;
		self.credentials = None;
		self.updated_at = Utc::now();
	}

	/// Credentials are retained: they may still carry a usable refresh token.
	pub fn mark_expired(&mut self) -> Result<(), ConnectionError> {
		if self.status != ConnectionStatus::Active {
			return Err(ConnectionError::CannotTransitionToExpired)
		}
		self.status = ConnectionStatus::Expired;
		self.updated_at = Utc::now();
		Ok(())
	}

	/// Credentials are retained for the audit trail.
	pub fn mark_revoked(&mut self) -> Result<(), ConnectionError> {
		if self.status != ConnectionStatus::Active {
			return Err(ConnectionError::CannotTransitionToRevoked)
		}
		self.status = ConnectionStatus::Revoked;
		self.updated_at = Utc::now();
		Ok(())
	}

	pub fn mark_failed(&mut self) -> Result<(), ConnectionError> {
		if self.status != ConnectionStatus::Pending {
			return Err(ConnectionError::CannotTransitionToFailed)
		}
		self.status = ConnectionStatus::Failed;
		self.updated_at = Utc::now();
		Ok(())
	}

	/// Replace credentials after a token refresh.
	pub fn update_credentials(
		&mut self,
		credentials: ProviderCredentials,
	) -> Result<(), ConnectionError> {
		if self.status != ConnectionStatus::Active {
			return Err(ConnectionError::NotConnected)
		}
		self.credentials = Some(credentials);
		self.updated_at = Utc::now();
		Ok(())
	}

	pub fn record_sync(&mut self) -> Result<(), ConnectionError> {
		if self.status != ConnectionStatus::Active {
			return Err(ConnectionError::NotConnected)
		}
		let now = Utc::now();
		self.last_sync_at = Some(now);
		self.updated_at = now;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::credentials::CredentialType;

	fn creds() -> ProviderCredentials {
		ProviderCredentials::new(b"blob".to_vec(), CredentialType::Oauth2, None).unwrap()
	}

	fn pending() -> ProviderConnection {
		let now = Utc::now();
		ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id: Uuid::now_v7(),
			provider_id: Uuid::now_v7(),
			provider_slug: "schwab".to_string(),
			alias: None,
			status: ConnectionStatus::Pending,
			credentials: None,
			connected_at: None,
			last_sync_at: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap()
	}

	fn active() -> ProviderConnection {
		let mut conn = pending();
		conn.mark_connected(creds()).unwrap();
		conn
	}

	#[test]
	fn construction_invariants() {
		let now = Utc::now();
		let build = |slug: &str, alias: Option<String>, status, credentials| {
			ProviderConnection::new(NewConnection {
				id: Uuid::now_v7(),
				user_id: Uuid::now_v7(),
				provider_id: Uuid::now_v7(),
				provider_slug: slug.to_string(),
				alias,
				status,
				credentials,
				connected_at: None,
				last_sync_at: None,
				created_at: now,
				updated_at: now,
			})
		};

		assert_eq!(
			build("", None, ConnectionStatus::Pending, None).unwrap_err(),
			ConnectionError::InvalidProviderSlug
		);
		assert_eq!(
			build(&"x".repeat(51), None, ConnectionStatus::Pending, None).unwrap_err(),
			ConnectionError::InvalidProviderSlug
		);
		assert_eq!(
			build("ok", Some("y".repeat(101)), ConnectionStatus::Pending, None).unwrap_err(),
			ConnectionError::InvalidAlias
		);
		assert_eq!(
			build("ok", None, ConnectionStatus::Active, None).unwrap_err(),
			ConnectionError::ActiveWithoutCredentials
		);
		assert!(build("ok", None, ConnectionStatus::Active, Some(creds())).is_ok());
	}

	#[test]
	fn pending_to_active_sets_connected_at_once() {
		let mut conn = pending();
		assert!(conn.connected_at.is_none());
		conn.mark_connected(creds()).unwrap();
		assert!(conn.is_connected());
		let first_connected = conn.connected_at.unwrap();

		conn.mark_expired().unwrap();
		conn.mark_connected(creds()).unwrap();
		assert_eq!(conn.connected_at, Some(first_connected));
	}

	#[test]
	fn reauth_states_can_reconnect() {
		type Transition = fn(&mut ProviderConnection) -> Result<(), ConnectionError>;
		let transitions: [Transition; 2] =
			[ProviderConnection::mark_expired, ProviderConnection::mark_revoked];
		for to_state in transitions {
			let mut conn = active();
			to_state(&mut conn).unwrap();
			assert!(conn.needs_reauthentication());
			conn.mark_connected(creds()).unwrap();
			assert_eq!(conn.status(), ConnectionStatus::Active);
		}
	}

	#[test]
	fn disconnected_is_terminal() {
		let mut conn = active();
		conn.mark_disconnected();
		assert_eq!(conn.status(), ConnectionStatus::Disconnected);
		assert!(conn.credentials().is_none());
		assert_eq!(conn.mark_connected(creds()), Err(ConnectionError::CannotTransitionToActive));
		assert_eq!(conn.mark_expired(), Err(ConnectionError::CannotTransitionToExpired));
	}

	#[test]
	fn expired_retains_credentials() {
		let mut conn = active();
		conn.mark_expired().unwrap();
		assert!(conn.credentials().is_some());
		assert!(!conn.is_connected());
	}

	#[test]
	fn mark_failed_only_from_pending() {
		let mut conn = pending();
		conn.mark_failed().unwrap();
		assert_eq!(conn.status(), ConnectionStatus::Failed);

		let mut conn = active();
		assert_eq!(conn.mark_failed(), Err(ConnectionError::CannotTransitionToFailed));
	}

	#[test]
	fn update_credentials_requires_active() {
		let mut conn = pending();
		assert_eq!(conn.update_credentials(creds()), Err(ConnectionError::NotConnected));

		let mut conn = active();
		assert!(conn.update_credentials(creds()).is_ok());
	}

	#[test]
	fn record_sync_requires_active() {
		let mut conn = active();
		assert!(conn.last_sync_at.is_none());
		conn.record_sync().unwrap();
		assert!(conn.last_sync_at.is_some());

		conn.mark_disconnected();
		assert_eq!(conn.record_sync(), Err(ConnectionError::NotConnected));
	}

	#[test]
	fn can_sync_considers_expiry() {
		let now = Utc::now();
		let mut conn = pending();
		let expired = ProviderCredentials::new(
			b"blob".to_vec(),
			CredentialType::Oauth2,
			Some(now - chrono::Duration::minutes(1)),
		)
		.unwrap();
		conn.mark_connected(expired).unwrap();
		assert!(conn.is_connected());
		assert!(!conn.can_sync(now));
	}
}
