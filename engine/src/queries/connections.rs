//! Provider connection queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
	domain::ProviderConnection,
	ownership::{OwnershipError, OwnershipVerifier},
	store::ConnectionStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionQueryError {
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: provider connection not owned by user")]
	NotOwnedByUser,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl From<OwnershipError> for ConnectionQueryError {
	fn from(error: OwnershipError) -> Self {
		match error {
			OwnershipError::NotOwnedByUser => ConnectionQueryError::NotOwnedByUser,
			OwnershipError::Store(detail) => ConnectionQueryError::Database(detail),
			_ => ConnectionQueryError::ConnectionNotFound,
		}
	}
}

/// Connection projection. Credentials never appear here, only the derived
/// state flags the UI needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionView {
	pub id: Uuid,
	pub provider_id: Uuid,
	pub provider_slug: String,
	pub alias: Option<String>,
	pub status: String,
	pub is_connected: bool,
	pub needs_reauthentication: bool,
	pub connected_at: Option<DateTime<Utc>>,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&ProviderConnection> for ConnectionView {
	fn from(connection: &ProviderConnection) -> Self {
		Self {
			id: connection.id,
			provider_id: connection.provider_id,
			provider_slug: connection.provider_slug.clone(),
			alias: connection.alias.clone(),
			status: connection.status().as_str().to_string(),
			is_connected: connection.is_connected(),
			needs_reauthentication: connection.needs_reauthentication(),
			connected_at: connection.connected_at,
			last_sync_at: connection.last_sync_at,
			created_at: connection.created_at,
			updated_at: connection.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionListView {
	pub connections: Vec<ConnectionView>,
	pub total_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct GetProviderConnection {
	pub user_id: Uuid,
	pub connection_id: Uuid,
}

pub struct GetProviderConnectionHandler {
	verifier: Arc<OwnershipVerifier>,
}

impl GetProviderConnectionHandler {
	pub fn new(verifier: Arc<OwnershipVerifier>) -> Self {
		Self { verifier }
	}

	pub async fn handle(
		&self,
		query: GetProviderConnection,
	) -> Result<ConnectionView, ConnectionQueryError> {
		let connection = self
			.verifier
			.verify_connection_ownership(query.connection_id, query.user_id)
			.await?;
		Ok(ConnectionView::from(&connection))
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ListProviderConnections {
	pub user_id: Uuid,
	pub active_only: bool,
}

pub struct ListProviderConnectionsHandler {
	connections: Arc<dyn ConnectionStore>,
}

impl ListProviderConnectionsHandler {
	pub fn new(connections: Arc<dyn ConnectionStore>) -> Self {
		Self { connections }
	}

	pub async fn handle(
		&self,
		query: ListProviderConnections,
	) -> Result<ConnectionListView, ConnectionQueryError> {
		let connections = if query.active_only {
			self.connections.find_active_by_user(query.user_id).await
		} else {
			self.connections.find_by_user_id(query.user_id).await
		}
		.map_err(|e| ConnectionQueryError::Database(e.to_string()))?;

		let views: Vec<ConnectionView> = connections.iter().map(ConnectionView::from).collect();
		Ok(ConnectionListView { total_count: views.len(), connections: views })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		domain::{
			ConnectionStatus, CredentialType, NewConnection, ProviderCredentials,
		},
		store::memory::MemoryStore,
	};

	async fn seed(store: &MemoryStore, user_id: Uuid, status: ConnectionStatus) -> Uuid {
		let now = Utc::now();
		let credentials = matches!(status, ConnectionStatus::Active).then(|| {
			ProviderCredentials::new(b"sealed".to_vec(), CredentialType::Oauth2, None).unwrap()
		});
		let connection = ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id,
			provider_id: Uuid::now_v7(),
			provider_slug: "schwab".to_string(),
			alias: Some("Retirement".to_string()),
			status,
			credentials,
			connected_at: None,
			last_sync_at: None,
			created_at: now,
			updated_at: now,
		})
		.unwrap();
		ConnectionStore::save(store, &connection).await.unwrap();
		connection.id
	}

	fn verifier(store: &Arc<MemoryStore>) -> Arc<OwnershipVerifier> {
		Arc::new(OwnershipVerifier::new(
			store.clone(),
			store.clone(),
			store.clone(),
			store.clone(),
		))
	}

	#[tokio::test]
	async fn get_projects_derived_flags() {
		let store = Arc::new(MemoryStore::new());
		let user_id = Uuid::now_v7();
		let connection_id = seed(store.as_ref(), user_id, ConnectionStatus::Expired).await;

		let handler = GetProviderConnectionHandler::new(verifier(&store));
		let view =
			handler.handle(GetProviderConnection { user_id, connection_id }).await.unwrap();
		assert_eq!(view.status, "expired");
		assert!(!view.is_connected);
		assert!(view.needs_reauthentication);
		assert_eq!(view.alias.as_deref(), Some("Retirement"));
	}

	#[tokio::test]
	async fn get_enforces_ownership() {
		let store = Arc::new(MemoryStore::new());
		let connection_id =
			seed(store.as_ref(), Uuid::now_v7(), ConnectionStatus::Active).await;
		let handler = GetProviderConnectionHandler::new(verifier(&store));

		assert_eq!(
			handler
				.handle(GetProviderConnection { user_id: Uuid::now_v7(), connection_id })
				.await,
			Err(ConnectionQueryError::NotOwnedByUser)
		);
		assert_eq!(
			handler
				.handle(GetProviderConnection {
					user_id: Uuid::now_v7(),
					connection_id: Uuid::now_v7()
				})
				.await,
			Err(ConnectionQueryError::ConnectionNotFound)
		);
	}

	#[tokio::test]
	async fn list_filters_by_activity() {
		let store = Arc::new(MemoryStore::new());
		let user_id = Uuid::now_v7();
		seed(store.as_ref(), user_id, ConnectionStatus::Active).await;
		seed(store.as_ref(), user_id, ConnectionStatus::Disconnected).await;
		seed(store.as_ref(), Uuid::now_v7(), ConnectionStatus::Active).await;

		let handler = ListProviderConnectionsHandler::new(store.clone());
		let all = handler
			.handle(ListProviderConnections { user_id, active_only: false })
			.await
			.unwrap();
		assert_eq!(all.total_count, 2);

		let active = handler
			.handle(ListProviderConnections { user_id, active_only: true })
			.await
			.unwrap();
		assert_eq!(active.total_count, 1);
		assert!(active.connections[0].is_connected);
	}
}
