//! Domain events and the bus port.
//!
//! Every write-side action emits a three-phase stream: `Attempted` before
//! any side effect, then exactly one of `Succeeded`/`Failed` before the
//! handler returns. Events are audit signals, not control flow: publication
//! is fire-and-forget and a bus failure never fails the command.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BusError {
	#[error("event channel closed")]
	Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventPhase {
	Attempted,
	Progress,
	Succeeded,
	Failed,
	/// Secondary notifications such as balance deltas.
	Notification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
	ProviderConnectionAttempted {
		provider_id: Uuid,
		provider_slug: String,
	},
	ProviderConnectionSucceeded {
		connection_id: Uuid,
		provider_id: Uuid,
		provider_slug: String,
	},
	ProviderConnectionFailed {
		provider_id: Uuid,
		provider_slug: String,
		reason: String,
	},

	ProviderDisconnectionAttempted {
		connection_id: Uuid,
		provider_id: Option<Uuid>,
	},
	ProviderDisconnectionSucceeded {
		connection_id: Uuid,
		provider_id: Uuid,
	},
	ProviderDisconnectionFailed {
		connection_id: Uuid,
		provider_id: Option<Uuid>,
		reason: String,
	},

	ProviderTokenRefreshAttempted {
		connection_id: Uuid,
	},
	ProviderTokenRefreshSucceeded {
		connection_id: Uuid,
	},
	ProviderTokenRefreshFailed {
		connection_id: Uuid,
		reason: String,
	},

	AccountSyncAttempted {
		connection_id: Uuid,
	},
	AccountSyncSucceeded {
		connection_id: Uuid,
		account_count: usize,
	},
	AccountSyncFailed {
		connection_id: Uuid,
		reason: String,
	},

	TransactionSyncAttempted {
		connection_id: Uuid,
		account_id: Option<Uuid>,
	},
	TransactionSyncSucceeded {
		connection_id: Uuid,
		transaction_count: usize,
		accounts_synced: usize,
	},
	TransactionSyncFailed {
		connection_id: Uuid,
		reason: String,
	},

	HoldingsSyncAttempted {
		account_id: Uuid,
	},
	HoldingsSyncSucceeded {
		account_id: Uuid,
		holding_count: usize,
	},
	HoldingsSyncFailed {
		account_id: Uuid,
		reason: String,
	},

	FileImportAttempted {
		provider_slug: String,
		file_name: String,
		file_format: String,
	},
	FileImportProgress {
		provider_slug: String,
		file_name: String,
		file_format: String,
		records_processed: usize,
		total_records: usize,
		progress_percent: u8,
	},
	FileImportSucceeded {
		provider_slug: String,
		file_name: String,
		file_format: String,
		account_count: usize,
		transaction_count: usize,
	},
	FileImportFailed {
		provider_slug: String,
		file_name: String,
		file_format: String,
		reason: String,
	},

	AccountBalanceUpdated {
		account_id: Uuid,
		previous_balance: BigDecimal,
		new_balance: BigDecimal,
		delta: BigDecimal,
		currency: String,
	},
}

impl EventKind {
	pub fn phase(&self) -> EventPhase {
		use EventKind::*;
		match self {
			ProviderConnectionAttempted { .. } |
			ProviderDisconnectionAttempted { .. } |
			ProviderTokenRefreshAttempted { .. } |
			AccountSyncAttempted { .. } |
			TransactionSyncAttempted { .. } |
			HoldingsSyncAttempted { .. } |
			FileImportAttempted { .. } => EventPhase::Attempted,
			FileImportProgress { .. } => EventPhase::Progress,
			ProviderConnectionSucceeded { .. } |
			ProviderDisconnectionSucceeded { .. } |
			ProviderTokenRefreshSucceeded { .. } |
			AccountSyncSucceeded { .. } |
			TransactionSyncSucceeded { .. } |
			HoldingsSyncSucceeded { .. } |
			FileImportSucceeded { .. } => EventPhase::Succeeded,
			ProviderConnectionFailed { .. } |
			ProviderDisconnectionFailed { .. } |
			ProviderTokenRefreshFailed { .. } |
			AccountSyncFailed { .. } |
			TransactionSyncFailed { .. } |
			HoldingsSyncFailed { .. } |
			FileImportFailed { .. } => EventPhase::Failed,
			AccountBalanceUpdated { .. } => EventPhase::Notification,
		}
	}

	/// Stable reason code on `Failed` events.
	pub fn reason(&self) -> Option<&str> {
		use EventKind::*;
		match self {
			ProviderConnectionFailed { reason, .. } |
			ProviderDisconnectionFailed { reason, .. } |
			ProviderTokenRefreshFailed { reason, .. } |
			AccountSyncFailed { reason, .. } |
			TransactionSyncFailed { reason, .. } |
			HoldingsSyncFailed { reason, .. } |
			FileImportFailed { reason, .. } => Some(reason),
			_ => None,
		}
	}
}

/// Envelope shared by every event. Ids are time-ordered (UUID v7) so an
/// event log sorts by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
	pub event_id: Uuid,
	pub occurred_at: DateTime<Utc>,
	pub user_id: Uuid,
	#[serde(flatten)]
	pub kind: EventKind,
}

impl Event {
	pub fn new(user_id: Uuid, kind: EventKind) -> Self {
		Self { event_id: Uuid::now_v7(), occurred_at: Utc::now(), user_id, kind }
	}
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventBus: Send + Sync {
	async fn publish(&self, event: Event) -> Result<(), BusError>;
}

/// In-process fan-out over `async-broadcast`. Overflow mode is on, so a slow
/// subscriber loses old events rather than back-pressuring command handlers.
pub struct BroadcastBus {
	sender: async_broadcast::Sender<Event>,
	// Keeps the channel open while no subscriber is attached.
	_keepalive: async_broadcast::InactiveReceiver<Event>,
}

impl BroadcastBus {
	pub fn new(capacity: usize) -> Self {
		let (mut sender, receiver) = async_broadcast::broadcast(capacity);
		sender.set_overflow(true);
		Self { sender, _keepalive: receiver.deactivate() }
	}

	pub fn subscribe(&self) -> async_broadcast::Receiver<Event> {
		self.sender.new_receiver()
	}
}

#[async_trait]
impl EventBus for BroadcastBus {
	async fn publish(&self, event: Event) -> Result<(), BusError> {
		self.sender.try_broadcast(event).map(|_| ()).map_err(|_| BusError::Closed)
	}
}

/// Captures everything published, in order. The assertion surface for the
/// three-phase protocol in tests.
#[derive(Default)]
pub struct RecordingBus {
	events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<Event> {
		self.events.lock().expect("event log poisoned").clone()
	}

	pub fn phases(&self) -> Vec<EventPhase> {
		self.events().iter().map(|event| event.kind.phase()).collect()
	}

	pub fn clear(&self) {
		self.events.lock().expect("event log poisoned").clear();
	}
}

#[async_trait]
impl EventBus for RecordingBus {
	async fn publish(&self, event: Event) -> Result<(), BusError> {
		self.events.lock().expect("event log poisoned").push(event);
		Ok(())
	}
}

/// Fire-and-forget publish used by command handlers: a bus failure is logged
/// and swallowed, never surfaced to the caller.
pub async fn publish_event(bus: &dyn EventBus, user_id: Uuid, kind: EventKind) {
	if let Err(error) = bus.publish(Event::new(user_id, kind)).await {
		tracing::warn!(%user_id, %error, "failed to publish event");
	}
}
