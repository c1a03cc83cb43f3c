//! Provider connection cache.
//!
//! Read-through cache keyed by connection id. The cache is an optimization,
//! never authoritative: every operation fails open, a decode failure is a
//! miss, and the store is always the source of truth. Cached values are the
//! row representation, so credentials stay as the encrypted blob — plaintext
//! never enters the cache.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
	domain::ProviderConnection,
	store::{rows::ConnectionRow, ConnectionStore, StoreError},
};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

fn connection_key(connection_id: Uuid) -> String {
	format!("provider:conn:{connection_id}")
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionCache: Send + Sync {
	/// `None` is both "miss" and "error": callers fall through to the store.
	async fn get(&self, connection_id: Uuid) -> Option<ProviderConnection>;

	async fn set(&self, connection: &ProviderConnection);

	async fn delete(&self, connection_id: Uuid);
}

/// Redis-backed adapter.
pub struct RedisConnectionCache {
	connection: redis::aio::MultiplexedConnection,
	ttl: Duration,
}

impl RedisConnectionCache {
	pub fn new(connection: redis::aio::MultiplexedConnection, ttl: Duration) -> Self {
		Self { connection, ttl }
	}

	async fn try_get(&self, connection_id: Uuid) -> anyhow::Result<Option<String>> {
		let mut redis = self.connection.clone();
		redis
			.get(connection_key(connection_id))
			.await
			.context("reading cached connection")
	}

	async fn try_set(&self, connection: &ProviderConnection) -> anyhow::Result<()> {
		let encoded = serde_json::to_string(&ConnectionRow::from(connection))
			.context("encoding connection row")?;
		let mut redis = self.connection.clone();
		redis
			.set_ex::<String, String, ()>(
				connection_key(connection.id),
				encoded,
				self.ttl.as_secs(),
			)
			.await
			.context("writing cached connection")
	}

	async fn try_delete(&self, connection_id: Uuid) -> anyhow::Result<()> {
		let mut redis = self.connection.clone();
		redis
			.del::<String, ()>(connection_key(connection_id))
			.await
			.context("deleting cached connection")
	}
}

#[async_trait]
impl ConnectionCache for RedisConnectionCache {
	async fn get(&self, connection_id: Uuid) -> Option<ProviderConnection> {
		let raw = match self.try_get(connection_id).await {
			Ok(raw) => raw,
			Err(error) => {
				tracing::warn!(%connection_id, %error, "connection cache read failed");
				return None
			},
		};
		decode(connection_id, raw?.as_str())
	}

	async fn set(&self, connection: &ProviderConnection) {
		if let Err(error) = self.try_set(connection).await {
			tracing::warn!(connection_id = %connection.id, %error, "cache write failed");
		}
	}

	async fn delete(&self, connection_id: Uuid) {
		if let Err(error) = self.try_delete(connection_id).await {
			tracing::warn!(%connection_id, %error, "cache delete failed");
		}
	}
}

fn decode(connection_id: Uuid, raw: &str) -> Option<ProviderConnection> {
	let row: ConnectionRow = match serde_json::from_str(raw) {
		Ok(row) => row,
		Err(error) => {
			tracing::warn!(%connection_id, %error, "cached connection is undecodable");
			return None
		},
	};
	match ProviderConnection::try_from(row) {
		Ok(connection) => Some(connection),
		Err(error) => {
			tracing::warn!(%connection_id, %error, "cached connection row is corrupt");
			None
		},
	}
}

/// In-process adapter for tests and single-node deployments. Entries are
/// stored JSON-encoded so the serialization path matches the Redis adapter.
pub struct MemoryConnectionCache {
	entries: Mutex<HashMap<Uuid, (String, tokio::time::Instant)>>,
	ttl: Duration,
}

impl MemoryConnectionCache {
	pub fn new(ttl: Duration) -> Self {
		Self { entries: Mutex::new(HashMap::new()), ttl }
	}

	#[cfg(test)]
	pub async fn inject_raw(&self, connection_id: Uuid, raw: &str) {
		self.entries.lock().await.insert(
			connection_id,
			(raw.to_string(), tokio::time::Instant::now() + self.ttl),
		);
	}
}

#[async_trait]
impl ConnectionCache for MemoryConnectionCache {
	async fn get(&self, connection_id: Uuid) -> Option<ProviderConnection> {
		let mut entries = self.entries.lock().await;
		let (raw, deadline) = entries.get(&connection_id)?;
		if tokio::time::Instant::now() >= *deadline {
			entries.remove(&connection_id);
			return None
		}
		let raw = raw.clone();
		drop(entries);
		decode(connection_id, &raw)
	}

	async fn set(&self, connection: &ProviderConnection) {
		let row = ConnectionRow::from(connection);
		if let Ok(encoded) = serde_json::to_string(&row) {
			self.entries
				.lock()
				.await
				.insert(connection.id, (encoded, tokio::time::Instant::now() + self.ttl));
		}
	}

	async fn delete(&self, connection_id: Uuid) {
		self.entries.lock().await.remove(&connection_id);
	}
}

/// [`ConnectionStore`] decorator adding the read-through behavior:
/// `find_by_id` consults the cache first, every write invalidates.
pub struct CachedConnectionStore {
	inner: Arc<dyn ConnectionStore>,
	cache: Arc<dyn ConnectionCache>,
}

impl CachedConnectionStore {
	pub fn new(inner: Arc<dyn ConnectionStore>, cache: Arc<dyn ConnectionCache>) -> Self {
		Self { inner, cache }
	}
}

#[async_trait]
impl ConnectionStore for CachedConnectionStore {
	async fn find_by_id(&self, id: Uuid) -> Result<Option<ProviderConnection>, StoreError> {
		if let Some(connection) = self.cache.get(id).await {
			return Ok(Some(connection))
		}
		let found = self.inner.find_by_id(id).await?;
		if let Some(connection) = &found {
			self.cache.set(connection).await;
		}
		Ok(found)
	}

	async fn find_by_user_id(
		&self,
		user_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		self.inner.find_by_user_id(user_id).await
	}

	async fn find_by_user_and_provider(
		&self,
		user_id: Uuid,
		provider_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		self.inner.find_by_user_and_provider(user_id, provider_id).await
	}

	async fn find_active_by_user(
		&self,
		user_id: Uuid,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		self.inner.find_active_by_user(user_id).await
	}

	async fn find_expiring_soon(
		&self,
		now: DateTime<Utc>,
		within: chrono::Duration,
	) -> Result<Vec<ProviderConnection>, StoreError> {
		self.inner.find_expiring_soon(now, within).await
	}

	async fn save(&self, connection: &ProviderConnection) -> Result<(), StoreError> {
		self.inner.save(connection).await?;
		self.cache.delete(connection.id).await;
		Ok(())
	}

	async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
		let deleted = self.inner.delete(id).await?;
		self.cache.delete(id).await;
		Ok(deleted)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		domain::{ConnectionStatus, CredentialType, NewConnection, ProviderCredentials},
		store::MockConnectionStore,
	};

	fn connection() -> ProviderConnection {
		let now = Utc::now();
		ProviderConnection::new(NewConnection {
			id: Uuid::now_v7(),
			user_id: Uuid::now_v7(),
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
		.unwrap()
	}

	#[tokio::test]
	async fn memory_cache_round_trip_and_expiry() {
		tokio::time::pause();
		let cache = MemoryConnectionCache::new(Duration::from_secs(300));
		let conn = connection();

		assert!(cache.get(conn.id).await.is_none());
		cache.set(&conn).await;
		assert_eq!(cache.get(conn.id).await.unwrap().id, conn.id);

		tokio::time::advance(Duration::from_secs(301)).await;
		assert!(cache.get(conn.id).await.is_none());
	}

	#[tokio::test]
	async fn undecodable_entry_is_a_miss() {
		let cache = MemoryConnectionCache::new(Duration::from_secs(300));
		let id = Uuid::now_v7();
		cache.inject_raw(id, "{not json").await;
		assert!(cache.get(id).await.is_none());
	}

	#[tokio::test]
	async fn delete_evicts() {
		let cache = MemoryConnectionCache::new(Duration::from_secs(300));
		let conn = connection();
		cache.set(&conn).await;
		cache.delete(conn.id).await;
		assert!(cache.get(conn.id).await.is_none());
	}

	#[tokio::test]
	async fn read_through_hits_store_once() {
		let conn = connection();
		let conn_id = conn.id;

		let mut inner = MockConnectionStore::new();
		let returned = conn.clone();
		inner
			.expect_find_by_id()
			.times(1)
			.returning(move |_| Ok(Some(returned.clone())));

		let store = CachedConnectionStore::new(
			Arc::new(inner),
			Arc::new(MemoryConnectionCache::new(Duration::from_secs(300))),
		);

		// Second lookup must be served from cache (mock allows one call).
		assert!(store.find_by_id(conn_id).await.unwrap().is_some());
		assert!(store.find_by_id(conn_id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn save_invalidates() {
		let conn = connection();
		let conn_id = conn.id;

		let mut inner = MockConnectionStore::new();
		let returned = conn.clone();
		inner.expect_find_by_id().times(2).returning(move |_| Ok(Some(returned.clone())));
		inner.expect_save().times(1).returning(|_| Ok(()));

		let store = CachedConnectionStore::new(
			Arc::new(inner),
			Arc::new(MemoryConnectionCache::new(Duration::from_secs(300))),
		);

		assert!(store.find_by_id(conn_id).await.unwrap().is_some());
		store.save(&conn).await.unwrap();
		// Invalidation forces the next read back to the store.
		assert!(store.find_by_id(conn_id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn cached_rows_hold_only_the_encrypted_blob() {
		let cache = MemoryConnectionCache::new(Duration::from_secs(300));
		let conn = connection();
		cache.set(&conn).await;
		let raw = cache.entries.lock().await.get(&conn.id).unwrap().0.clone();
		let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
		assert!(json.get("encrypted_credentials").is_some());
		assert!(json.get("access_token").is_none());
	}
}
