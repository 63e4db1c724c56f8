//! Expiry scanning over the timer key space.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::{debug, info, warn};

use closure_core::{Clock, InstantUnit, Result, SystemClock};
use closure_events::ClosureRequest;

use super::store::{TimerKey, TimerStore};

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Instant the scan compared every key against.
    pub scanned_at: DateTime<Utc>,
    /// Identifiers of the expired keys, in key order.
    pub due: Vec<String>,
    /// Keys returned by the store under the namespace.
    pub keys_found: usize,
    /// Well-formed keys that have not expired yet.
    pub pending: usize,
    /// Keys left alone because they do not parse.
    pub malformed: usize,
    /// Keys the batch delete reported as removed.
    pub deleted: usize,
    /// Whether the batch delete failed; the due list is returned regardless.
    pub delete_failed: bool,
}

impl ScanReport {
    /// One closure request per due identifier, due at the scan instant.
    pub fn closure_requests(&self) -> Vec<ClosureRequest> {
        self.due
            .iter()
            .map(|id| ClosureRequest::due_at(id.clone(), self.scanned_at))
            .collect()
    }
}

/// Finds and removes expired timer keys in one namespace.
pub struct ExpiryScanner {
    store: Arc<dyn TimerStore>,
    namespace: String,
    unit: InstantUnit,
    clock: Arc<dyn Clock>,
}

impl ExpiryScanner {
    /// Create a scanner over `namespace`, comparing instants in `unit`.
    pub fn new(store: Arc<dyn TimerStore>, namespace: impl Into<String>, unit: InstantUnit) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            unit,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Scan at the current instant.
    ///
    /// # Errors
    ///
    /// Returns [`closure_core::Error::StoreScan`] if the key space cannot be
    /// enumerated; nothing is deleted in that case.
    pub async fn scan(&self) -> Result<ScanReport> {
        self.scan_at(self.clock.now()).await
    }

    /// Scan with `now` as the single comparison instant.
    ///
    /// # Errors
    ///
    /// Returns [`closure_core::Error::StoreScan`] if the key space cannot be
    /// enumerated; nothing is deleted in that case.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let keys = self.store.scan(&self.namespace).await?;
        let threshold = self.unit.of(now);

        info!(namespace = %self.namespace, keys_found = keys.len(), "Keys found");

        let mut malformed = 0usize;
        let (due, pending): (Vec<_>, Vec<_>) = keys
            .iter()
            .filter_map(|raw| match TimerKey::parse(&self.namespace, raw) {
                Ok(key) => Some((raw, key)),
                Err(e) => {
                    debug!(error = %e, "Skipping timer key");
                    malformed = malformed.saturating_add(1);
                    None
                }
            })
            .partition(|(_, key)| key.is_due(threshold));

        if malformed > 0 {
            warn!(namespace = %self.namespace, malformed, "Malformed timer keys left in place");
        }

        let due_keys = due.iter().map(|(raw, _)| (*raw).clone()).collect_vec();
        let identifiers = due
            .into_iter()
            .map(|(_, key)| key.identifier().to_string())
            .collect_vec();

        let (deleted, delete_failed) = if due_keys.is_empty() {
            (0, false)
        } else {
            match self.store.delete(&due_keys).await {
                Ok(deleted) => (deleted, false),
                Err(e) => {
                    warn!(namespace = %self.namespace, error = %e, "Failed to delete expired timer keys");
                    (0, true)
                }
            }
        };

        info!(
            namespace = %self.namespace,
            due = identifiers.len(),
            pending = pending.len(),
            deleted,
            "Expired delivery executions found"
        );

        Ok(ScanReport {
            scanned_at: now,
            due: identifiers,
            keys_found: keys.len(),
            pending: pending.len(),
            malformed,
            deleted,
            delete_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use closure_core::{Error, FixedClock};

    use super::*;
    use crate::store::InMemoryTimerStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_expiry_selection_example() {
        let store = Arc::new(InMemoryTimerStore::with_keys(["ns:123:100", "ns:456:99999999999999"]));
        let scanner = ExpiryScanner::new(store.clone(), "ns", InstantUnit::Seconds);
        assert_eq!(scanner.namespace(), "ns");

        let report = scanner.scan_at(at(200)).await.unwrap();

        assert_eq!(report.due, vec!["123".to_string()]);
        assert_eq!(report.pending, 1);
        assert_eq!(report.deleted, 1);
        assert!(!store.contains("ns:123:100").await);
        assert!(store.contains("ns:456:99999999999999").await);
    }

    #[tokio::test]
    async fn test_deadline_equal_to_now_is_due() {
        let store = Arc::new(InMemoryTimerStore::with_keys(["ns:a:200", "ns:b:201"]));
        let scanner = ExpiryScanner::new(store, "ns", InstantUnit::Seconds);

        let report = scanner.scan_at(at(200)).await.unwrap();
        assert_eq!(report.due, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_keys_untouched() {
        let store = Arc::new(InMemoryTimerStore::with_keys(["ns:1:100", "ns:2:soon", "ns:3"]));
        let scanner = ExpiryScanner::new(store.clone(), "ns", InstantUnit::Seconds);

        let report = scanner.scan_at(at(500)).await.unwrap();

        assert_eq!(report.due, vec!["1".to_string()]);
        assert_eq!(report.malformed, 2);
        assert!(store.contains("ns:2:soon").await);
        assert!(store.contains("ns:3").await);
    }

    #[tokio::test]
    async fn test_extra_segment_keys_are_inert() {
        let store = Arc::new(InMemoryTimerStore::with_keys(["ns:a:b:100", "ns:tenant:42:150", "ns:c:100"]));
        let scanner = ExpiryScanner::new(store.clone(), "ns", InstantUnit::Seconds);

        let report = scanner.scan_at(at(200)).await.unwrap();

        assert_eq!(report.due, vec!["c".to_string()]);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.deleted, 1);
        assert!(store.contains("ns:a:b:100").await);
        assert!(store.contains("ns:tenant:42:150").await);
    }

    #[tokio::test]
    async fn test_nanosecond_keys_use_clock() {
        let now = at(1_700_000_000);
        let due_key = format!("ns:late:{}", InstantUnit::Nanos.of(now) - 1);
        let future_key = format!("ns:early:{}", InstantUnit::Nanos.of(now) + 1_000_000_000);
        let store = Arc::new(InMemoryTimerStore::with_keys([due_key, future_key]));

        let scanner = ExpiryScanner::new(store, "ns", InstantUnit::Nanos)
            .with_clock(Arc::new(FixedClock::new(now)));
        let report = scanner.scan().await.unwrap();

        assert_eq!(report.due, vec!["late".to_string()]);
        assert_eq!(report.scanned_at, now);
    }

    #[tokio::test]
    async fn test_scan_failure_is_fatal_and_deletes_nothing() {
        let store = Arc::new(InMemoryTimerStore::with_keys(["ns:1:1"]));
        store.set_scan_failure(true).await;
        let scanner = ExpiryScanner::new(store.clone(), "ns", InstantUnit::Seconds);

        let err = scanner.scan_at(at(10)).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::StoreScan { .. }));

        store.set_scan_failure(false).await;
        assert!(store.contains("ns:1:1").await);
    }

    #[tokio::test]
    async fn test_delete_failure_still_returns_due() {
        let store = Arc::new(InMemoryTimerStore::with_keys(["ns:1:1"]));
        store.set_delete_failure(true).await;
        let scanner = ExpiryScanner::new(store, "ns", InstantUnit::Seconds);

        let report = scanner.scan_at(at(10)).await.unwrap();
        assert_eq!(report.due, vec!["1".to_string()]);
        assert!(report.delete_failed);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn test_closure_requests_due_at_scan_instant() {
        let store = Arc::new(InMemoryTimerStore::with_keys(["ns:x:1", "ns:y:2"]));
        let scanner = ExpiryScanner::new(store, "ns", InstantUnit::Seconds);

        let report = scanner.scan_at(at(300)).await.unwrap();
        let requests = report.closure_requests();

        assert_eq!(
            requests,
            vec![ClosureRequest::new("x", 300), ClosureRequest::new("y", 300)]
        );
        assert!(requests.iter().all(|r| r.is_due(at(300))));
    }

    #[tokio::test]
    async fn test_empty_namespace() {
        let store = Arc::new(InMemoryTimerStore::new());
        let scanner = ExpiryScanner::new(store, "ns", InstantUnit::Seconds);

        let report = scanner.scan_at(at(300)).await.unwrap();
        assert!(report.due.is_empty());
        assert_eq!(report.keys_found, 0);
        assert!(!report.delete_failed);
    }
}
