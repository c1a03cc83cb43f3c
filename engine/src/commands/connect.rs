//! ConnectProvider handler.
//!
//! The authentication handshake happens outside the engine; by the time this
//! command arrives the credentials are already sealed. The handler creates
//! the connection record in `Active` status.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::ConnectProvider;
use crate::{
	domain::{ConnectionStatus, NewConnection, ProviderConnection, MAX_SLUG_LEN},
	events::{publish_event, EventBus, EventKind},
	store::ConnectionStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectProviderError {
	#[error("INVALID_CREDENTIALS: credentials are required to connect a provider")]
	InvalidCredentials,
	#[error("INVALID_PROVIDER_SLUG: provider slug must be 1-{MAX_SLUG_LEN} characters")]
	InvalidProviderSlug,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl ConnectProviderError {
	pub fn reason_code(&self) -> &'static str {
		match self {
			ConnectProviderError::InvalidCredentials => "invalid_credentials",
			ConnectProviderError::InvalidProviderSlug => "invalid_provider_slug",
			ConnectProviderError::Database(_) => "database_error",
		}
	}
}

pub struct ConnectProviderHandler {
	connections: Arc<dyn ConnectionStore>,
	event_bus: Arc<dyn EventBus>,
}

impl ConnectProviderHandler {
	pub fn new(connections: Arc<dyn ConnectionStore>, event_bus: Arc<dyn EventBus>) -> Self {
		Self { connections, event_bus }
	}

	pub async fn handle(&self, cmd: ConnectProvider) -> Result<Uuid, ConnectProviderError> {
		publish_event(
			self.event_bus.as_ref(),
			cmd.user_id,
			EventKind::ProviderConnectionAttempted {
				provider_id: cmd.provider_id,
				provider_slug: cmd.provider_slug.clone(),
			},
		)
		.await;

		match self.connect(&cmd).await {
			Ok(connection_id) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::ProviderConnectionSucceeded {
						connection_id,
						provider_id: cmd.provider_id,
						provider_slug: cmd.provider_slug.clone(),
					},
				)
				.await;
				Ok(connection_id)
			},
			Err(error) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::ProviderConnectionFailed {
						provider_id: cmd.provider_id,
						provider_slug: cmd.provider_slug.clone(),
						reason: error.reason_code().to_string(),
					},
				)
				.await;
				Err(error)
			},
		}
	}

	async fn connect(&self, cmd: &ConnectProvider) -> Result<Uuid, ConnectProviderError> {
		let credentials =
			cmd.credentials.clone().ok_or(ConnectProviderError::InvalidCredentials)?;
		if cmd.provider_slug.is_empty() || cmd.provider_slug.len() > MAX_SLUG_LEN {
			return Err(ConnectProviderError::InvalidProviderSlug)
		}

		let now = Utc::now();
		let connection = ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id: cmd.user_id,
			provider_id: cmd.provider_id,
			provider_slug: cmd.provider_slug.clone(),
			alias: cmd.alias.clone(),
			status: ConnectionStatus::Active,
			credentials: Some(credentials),
			connected_at: Some(now),
			last_sync_at: None,
			created_at: now,
			updated_at: now,
		})
		.map_err(|e| ConnectProviderError::Database(e.to_string()))?;

		self.connections
			.save(&connection)
			.await
			.map_err(|e| ConnectProviderError::Database(e.to_string()))?;

		tracing::info!(
			user_id = %cmd.user_id,
			connection_id = %connection.id,
			provider_slug = %cmd.provider_slug,
			"provider connected"
		);
		Ok(connection.id)
	}
}
