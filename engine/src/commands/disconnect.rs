//! DisconnectProvider handler.

use std::sync::Arc;

use thiserror::Error;

use super::DisconnectProvider;
use crate::{
	events::{publish_event, EventBus, EventKind},
	store::ConnectionStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectProviderError {
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: provider connection not owned by user")]
	NotOwnedByUser,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl DisconnectProviderError {
	pub fn reason_code(&self) -> &'static str {
		match self {
			DisconnectProviderError::ConnectionNotFound => "connection_not_found",
			DisconnectProviderError::NotOwnedByUser => "not_owned_by_user",
			DisconnectProviderError::Database(_) => "database_error",
		}
	}
}

pub struct DisconnectProviderHandler {
	connections: Arc<dyn ConnectionStore>,
	event_bus: Arc<dyn EventBus>,
}

impl DisconnectProviderHandler {
	pub fn new(connections: Arc<dyn ConnectionStore>, event_bus: Arc<dyn EventBus>) -> Self {
		Self { connections, event_bus }
	}

	pub async fn handle(&self, cmd: DisconnectProvider) -> Result<(), DisconnectProviderError> {
		// The provider is unknown until the connection loads, so the
		// attempted event cannot carry one.
		publish_event(
			self.event_bus.as_ref(),
			cmd.user_id,
			EventKind::ProviderDisconnectionAttempted {
				connection_id: cmd.connection_id,
				provider_id: None,
			},
		)
		.await;

		match self.disconnect(&cmd).await {
			Ok(provider_id) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::ProviderDisconnectionSucceeded {
						connection_id: cmd.connection_id,
						provider_id,
					},
				)
				.await;
				Ok(())
			},
			Err(error) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::ProviderDisconnectionFailed {
						connection_id: cmd.connection_id,
						provider_id: None,
						reason: error.reason_code().to_string(),
					},
				)
				.await;
				Err(error)
			},
		}
	}

	async fn disconnect(
		&self,
		cmd: &DisconnectProvider,
	) -> Result<uuid::Uuid, DisconnectProviderError> {
		let mut connection = self
			.connections
			.find_by_id(cmd.connection_id)
			.await
			.map_err(|e| DisconnectProviderError::Database(e.to_string()))?
			.ok_or(DisconnectProviderError::ConnectionNotFound)?;

		if connection.user_id != cmd.user_id {
			return Err(DisconnectProviderError::NotOwnedByUser)
		}

		// Terminal transition, never fails; credentials are cleared but the
		// record stays for the audit trail.
		connection.mark_disconnected();
		self.connections
			.save(&connection)
			.await
			.map_err(|e| DisconnectProviderError::Database(e.to_string()))?;

		tracing::info!(
			user_id = %cmd.user_id,
			connection_id = %cmd.connection_id,
			provider_slug = %connection.provider_slug,
			"provider disconnected"
		);
		Ok(connection.provider_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		domain::{
			ConnectionStatus, CredentialType, NewConnection, ProviderConnection,
			ProviderCredentials,
		},
		events::{EventPhase, RecordingBus},
		store::memory::MemoryStore,
	};
	use chrono::Utc;
	use uuid::Uuid;

	async fn seeded(store: &MemoryStore, user_id: Uuid) -> ProviderConnection {
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
		ConnectionStore::save(store, &connection).await.unwrap();
		connection
	}

	#[tokio::test]
	async fn disconnect_clears_credentials_and_keeps_the_row() {
		let store = Arc::new(MemoryStore::new());
		let bus = Arc::new(RecordingBus::new());
		let user_id = Uuid::now_v7();
		let connection = seeded(store.as_ref(), user_id).await;

		let handler = DisconnectProviderHandler::new(store.clone(), bus.clone());
		handler
			.handle(DisconnectProvider { user_id, connection_id: connection.id })
			.await
			.unwrap();

		let saved = ConnectionStore::find_by_id(store.as_ref(), connection.id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(saved.status(), ConnectionStatus::Disconnected);
		assert!(saved.credentials().is_none());
		assert_eq!(bus.phases(), vec![EventPhase::Attempted, EventPhase::Succeeded]);
	}

	#[tokio::test]
	async fn unknown_connection_fails_with_not_found() {
		let store = Arc::new(MemoryStore::new());
		let bus = Arc::new(RecordingBus::new());
		let handler = DisconnectProviderHandler::new(store, bus.clone());

		let result = handler
			.handle(DisconnectProvider { user_id: Uuid::now_v7(), connection_id: Uuid::now_v7() })
			.await;
		assert_eq!(result, Err(DisconnectProviderError::ConnectionNotFound));

		let events = bus.events();
		assert_eq!(events[1].kind.reason(), Some("connection_not_found"));
		// No provider id is known for a connection that does not exist.
		assert!(matches!(
			events[0].kind,
			EventKind::ProviderDisconnectionAttempted { provider_id: None, .. }
		));
	}

	#[tokio::test]
	async fn foreign_connection_is_rejected() {
		let store = Arc::new(MemoryStore::new());
		let bus = Arc::new(RecordingBus::new());
		let connection = seeded(store.as_ref(), Uuid::now_v7()).await;

		let handler = DisconnectProviderHandler::new(store.clone(), bus.clone());
		let result = handler
			.handle(DisconnectProvider { user_id: Uuid::now_v7(), connection_id: connection.id })
			.await;
		assert_eq!(result, Err(DisconnectProviderError::NotOwnedByUser));

		let saved = ConnectionStore::find_by_id(store.as_ref(), connection.id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(saved.status(), ConnectionStatus::Active);
	}
}
