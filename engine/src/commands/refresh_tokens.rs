//! RefreshProviderTokens handler.
//!
//! An external collaborator performs the token exchange; this handler only
//! swaps the sealed credentials on an active connection.

use std::sync::Arc;

use thiserror::Error;

use super::RefreshProviderTokens;
use crate::{
	domain::ConnectionStatus,
	events::{publish_event, EventBus, EventKind},
	store::ConnectionStore,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshProviderTokensError {
	#[error("CONNECTION_NOT_FOUND: provider connection not found")]
	ConnectionNotFound,
	#[error("NOT_OWNED_BY_USER: provider connection not owned by user")]
	NotOwnedByUser,
	#[error("NOT_ACTIVE: provider connection is not active")]
	NotActive,
	#[error("DATABASE_ERROR: {0}")]
	Database(String),
}

impl RefreshProviderTokensError {
	pub fn reason_code(&self) -> &'static str {
		match self {
			RefreshProviderTokensError::ConnectionNotFound => "connection_not_found",
			RefreshProviderTokensError::NotOwnedByUser => "not_owned_by_user",
			RefreshProviderTokensError::NotActive => "not_active",
			RefreshProviderTokensError::Database(_) => "database_error",
		}
	}
}

pub struct RefreshProviderTokensHandler {
	connections: Arc<dyn ConnectionStore>,
	event_bus: Arc<dyn EventBus>,
}

impl RefreshProviderTokensHandler {
	pub fn new(connections: Arc<dyn ConnectionStore>, event_bus: Arc<dyn EventBus>) -> Self {
		Self { connections, event_bus }
	}

	pub async fn handle(
		&self,
		cmd: RefreshProviderTokens,
	) -> Result<(), RefreshProviderTokensError> {
		publish_event(
			self.event_bus.as_ref(),
			cmd.user_id,
			EventKind::ProviderTokenRefreshAttempted { connection_id: cmd.connection_id },
		)
		.await;

		match self.refresh(&cmd).await {
			Ok(()) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::ProviderTokenRefreshSucceeded {
						connection_id: cmd.connection_id,
					},
				)
				.await;
				Ok(())
			},
			Err(error) => {
				publish_event(
					self.event_bus.as_ref(),
					cmd.user_id,
					EventKind::ProviderTokenRefreshFailed {
						connection_id: cmd.connection_id,
						reason: error.reason_code().to_string(),
					},
				)
				.await;
				Err(error)
			},
		}
	}

	async fn refresh(&self, cmd: &RefreshProviderTokens) -> Result<(), RefreshProviderTokensError> {
		let mut connection = self
			.connections
			.find_by_id(cmd.connection_id)
			.await
			.map_err(|e| RefreshProviderTokensError::Database(e.to_string()))?
			.ok_or(RefreshProviderTokensError::ConnectionNotFound)?;

		if connection.user_id != cmd.user_id {
			return Err(RefreshProviderTokensError::NotOwnedByUser)
		}
		if connection.status() != ConnectionStatus::Active {
			return Err(RefreshProviderTokensError::NotActive)
		}

		connection
			.update_credentials(cmd.credentials.clone())
			.map_err(|_| RefreshProviderTokensError::NotActive)?;
		self.connections
			.save(&connection)
			.await
			.map_err(|e| RefreshProviderTokensError::Database(e.to_string()))?;

		tracing::info!(connection_id = %cmd.connection_id, "provider tokens refreshed");
		Ok(())
	}
}
