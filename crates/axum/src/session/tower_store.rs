//! Adapter over `tower-sessions` stores.
//!
//! Lets any `tower_sessions::SessionStore` (for example
//! `tower_sessions_sqlx_store::PostgresStore`) hold the session document.
//! Each top-level session key is one entry in the record's data map.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tower_sessions::SessionStore as BackingStore;
use tower_sessions::cookie::time::{Duration, OffsetDateTime};
use tower_sessions::session::{Id, Record};
use web_security_core::SessionData;

use super::{SessionStore, StoreError};

/// Expiry given to records created through this adapter (7 days).
const DEFAULT_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// [`SessionStore`] backed by a `tower-sessions` store.
#[derive(Debug, Clone)]
pub struct TowerSessionStore<S> {
    inner: S,
    expiry: Duration,
}

impl<S: BackingStore> TowerSessionStore<S> {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            expiry: Duration::seconds(DEFAULT_EXPIRY_SECONDS),
        }
    }

    /// Expiry for records that do not exist yet.
    #[must_use]
    pub const fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }
}

fn parse_id(session_id: &str) -> Result<Id, StoreError> {
    session_id
        .parse::<Id>()
        .map_err(|_| StoreError::InvalidSessionId)
}

fn backend(err: &tower_sessions::session_store::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl<S: BackingStore> SessionStore for TowerSessionStore<S> {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        let id = parse_id(session_id)?;
        let Some(record) = self.inner.load(&id).await.map_err(|e| backend(&e))? else {
            return Ok(None);
        };

        let document = Value::Object(record.data.into_iter().collect());
        Ok(Some(serde_json::from_value(document)?))
    }

    async fn store(&self, session_id: &str, data: &SessionData) -> Result<(), StoreError> {
        let id = parse_id(session_id)?;

        let expiry_date = match self.inner.load(&id).await.map_err(|e| backend(&e))? {
            Some(existing) => existing.expiry_date,
            None => OffsetDateTime::now_utc() + self.expiry,
        };

        let data: HashMap<String, Value> = match serde_json::to_value(data)? {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };

        let record = Record {
            id,
            data,
            expiry_date,
        };
        self.inner.save(&record).await.map_err(|e| backend(&e))
    }
}
