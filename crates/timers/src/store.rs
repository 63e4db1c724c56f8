//! Timer key space: key format and the store capability.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use closure_core::{Error, Result};

/// A parsed `<namespace>:<identifier>:<instant>` key.
///
/// The namespace is matched as a prefix. What follows must be exactly an
/// identifier and an integer instant; a key with more segments is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    namespace: String,
    identifier: String,
    expires_at: i64,
}

impl TimerKey {
    /// Create a key for `identifier` expiring at `expires_at`.
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>, expires_at: i64) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
            expires_at,
        }
    }

    /// Parse a raw key belonging to `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyParse`] when the key is outside the namespace, has
    /// no identifier, or its instant is not an integer.
    pub fn parse(namespace: &str, raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| Error::key_parse(raw, format!("not under namespace '{namespace}'")))?;

        let (identifier, instant) = rest
            .split_once(':')
            .ok_or_else(|| Error::key_parse(raw, "missing instant segment"))?;

        if identifier.is_empty() {
            return Err(Error::key_parse(raw, "empty identifier"));
        }

        let expires_at = instant
            .parse::<i64>()
            .map_err(|e| Error::key_parse(raw, format!("instant '{instant}': {e}")))?;

        Ok(Self::new(namespace, identifier, expires_at))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Expiry instant, in whatever unit the scheduler wrote.
    pub const fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Whether the key has expired at `now` (same unit as [`Self::expires_at`]).
    pub const fn is_due(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Scan prefix for `namespace`.
    pub fn prefix(namespace: &str) -> String {
        format!("{namespace}:")
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.identifier, self.expires_at)
    }
}

/// Key space the expiry scanner reads from.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// All raw keys starting with `<namespace>:`.
    async fn scan(&self, namespace: &str) -> Result<Vec<String>>;

    /// Delete `keys`, returning how many existed. Best-effort, not atomic with `scan`.
    async fn delete(&self, keys: &[String]) -> Result<usize>;
}

/// In-memory timer store for testing.
#[derive(Debug, Default)]
pub struct InMemoryTimerStore {
    keys: RwLock<BTreeSet<String>>,
    fail_scan: RwLock<bool>,
    fail_delete: RwLock<bool>,
}

impl InMemoryTimerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `keys`.
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: RwLock::new(keys.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Add a raw key.
    pub async fn insert(&self, key: impl Into<String>) {
        self.keys.write().await.insert(key.into());
    }

    /// Snapshot of every key, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.keys.read().await.iter().cloned().collect()
    }

    /// Whether `key` is present.
    pub async fn contains(&self, key: &str) -> bool {
        self.keys.read().await.contains(key)
    }

    /// Make scans fail (simulates an unreachable store).
    pub async fn set_scan_failure(&self, fail: bool) {
        *self.fail_scan.write().await = fail;
    }

    /// Make deletes fail.
    pub async fn set_delete_failure(&self, fail: bool) {
        *self.fail_delete.write().await = fail;
    }
}

#[async_trait]
impl TimerStore for InMemoryTimerStore {
    async fn scan(&self, namespace: &str) -> Result<Vec<String>> {
        if *self.fail_scan.read().await {
            return Err(Error::store_scan(namespace, "store unavailable"));
        }
        let prefix = TimerKey::prefix(namespace);
        let keys = self.keys.read().await;
        Ok(keys
            .iter()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if *self.fail_delete.read().await {
            return Err(Error::store_delete(keys.len(), "store unavailable"));
        }
        let mut stored = self.keys.write().await;
        Ok(keys.iter().filter(|key| stored.remove(key.as_str())).count())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_valid_key() {
        let key = TimerKey::parse("closure", "closure:de-123:1700000000").unwrap();
        assert_eq!(key.namespace(), "closure");
        assert_eq!(key.identifier(), "de-123");
        assert_eq!(key.expires_at(), 1_700_000_000);
        assert_eq!(key.to_string(), "closure:de-123:1700000000");
    }

    #[test]
    fn test_parse_extra_segment_is_malformed() {
        for raw in ["ns:tenant:42:100", "ns:a:b:100", "ns:a:100:"] {
            assert!(
                matches!(TimerKey::parse("ns", raw), Err(Error::KeyParse { .. })),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn test_parse_namespace_with_colons() {
        let key = TimerKey::parse("app:closure", "app:closure:7:100").unwrap();
        assert_eq!(key.identifier(), "7");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "ns:123:abc",
            "ns:123:",
            "ns:123",
            "ns::100",
            "other:123:100",
            "ns123:100",
            "ns:123:1.5",
            "ns:123:99999999999999999999999",
        ] {
            assert!(
                matches!(TimerKey::parse("ns", raw), Err(Error::KeyParse { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_is_due_inclusive() {
        let key = TimerKey::new("ns", "1", 100);
        assert!(!key.is_due(99));
        assert!(key.is_due(100));
        assert!(key.is_due(101));
    }

    #[tokio::test]
    async fn test_in_memory_scan_is_prefix_matched() {
        let store = InMemoryTimerStore::with_keys(["ns:1:10", "ns:2:20", "nsx:3:30", "other:4:40"]);
        let keys = store.scan("ns").await.unwrap();
        assert_eq!(keys, vec!["ns:1:10".to_string(), "ns:2:20".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_delete_counts_existing() {
        let store = InMemoryTimerStore::with_keys(["ns:1:10", "ns:2:20"]);
        let deleted = store
            .delete(&["ns:1:10".to_string(), "ns:9:90".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.keys().await, vec!["ns:2:20".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_failures() {
        let store = InMemoryTimerStore::with_keys(["ns:1:10"]);
        store.set_scan_failure(true).await;
        assert!(matches!(store.scan("ns").await, Err(Error::StoreScan { .. })));

        store.set_delete_failure(true).await;
        assert!(matches!(
            store.delete(&["ns:1:10".to_string()]).await,
            Err(Error::StoreDelete { .. })
        ));
        assert!(store.contains("ns:1:10").await);
    }
}
