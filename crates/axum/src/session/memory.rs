//! In-memory session store.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use web_security_core::SessionData;

use super::{SessionStore, StoreError};

/// Sessions idle for longer than this are evicted.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Session store backed by a `moka` cache.
///
/// Suitable for tests and single-instance deployments; sessions do not
/// survive a restart.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    cache: Cache<String, SessionData>,
}

impl MemorySessionStore {
    /// Create a store with the default idle timeout and capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    /// Create a store evicting sessions idle for `idle_timeout`.
    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(DEFAULT_MAX_CAPACITY)
            .time_to_idle(idle_timeout)
            .build();
        Self { cache }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        Ok(self.cache.get(session_id).await)
    }

    async fn store(&self, session_id: &str, data: &SessionData) -> Result<(), StoreError> {
        self.cache.insert(session_id.to_string(), data.clone()).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_session() {
        let store = MemorySessionStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let store = MemorySessionStore::new();
        let data = SessionData::default().with_csrf_token("token");

        store.store("sid", &data).await.unwrap();

        assert_eq!(store.load("sid").await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_store_replaces() {
        let store = MemorySessionStore::new();
        store
            .store("sid", &SessionData::default().with_csrf_token("old"))
            .await
            .unwrap();
        store
            .store("sid", &SessionData::default().with_csrf_token("new"))
            .await
            .unwrap();

        let loaded = store.load("sid").await.unwrap().unwrap();
        assert_eq!(loaded.csrf_token(), Some("new"));
    }
}
