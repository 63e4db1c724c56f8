//! SurrealDB-backed timer key space.
//!
//! Each key is one row of the `timer_key` table, with the raw key string as
//! both the record id and the `key` field.

use async_trait::async_trait;
use tracing::debug;

use closure_core::{Error, Result, Store};

use super::store::{TimerKey, TimerStore};

/// Timer store persisting keys in SurrealDB.
#[derive(Debug, Clone)]
pub struct SurrealTimerStore {
    store: Store,
}

impl SurrealTimerStore {
    /// Create a timer store over a connected store.
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Write a timer key; writing an existing key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the write fails.
    pub async fn insert(&self, key: &TimerKey) -> Result<()> {
        let raw = key.to_string();
        self.store
            .db()
            .query("UPSERT type::thing('timer_key', $key) SET key = $key")
            .bind(("key", raw.clone()))
            .await
            .and_then(surrealdb::Response::check)
            .map_err(|e| Error::connection(format!("failed to write timer key '{raw}': {e}")))?;

        debug!(key = %raw, "Timer key written");
        Ok(())
    }
}

#[async_trait]
impl TimerStore for SurrealTimerStore {
    async fn scan(&self, namespace: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .store
            .db()
            .query("SELECT VALUE key FROM timer_key WHERE string::starts_with(key, $prefix)")
            .bind(("prefix", TimerKey::prefix(namespace)))
            .await
            .map_err(|e| Error::store_scan(namespace, e.to_string()))?
            .take(0)
            .map_err(|e| Error::store_scan(namespace, e.to_string()))?;

        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: Vec<String> = self
            .store
            .db()
            .query("DELETE timer_key WHERE key IN $keys RETURN BEFORE")
            .bind(("keys", keys.to_vec()))
            .await
            .map_err(|e| Error::store_delete(keys.len(), e.to_string()))?
            .take((0, "key"))
            .map_err(|e| Error::store_delete(keys.len(), e.to_string()))?;

        Ok(deleted.len())
    }
}
