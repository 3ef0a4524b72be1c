//! Per-key version tracking and causal assertions.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AccessError;

/// Context a caller carries between dependent operations to assert that
/// the tracker has caught up to a version it saw earlier.
///
/// Serializable so it can cross task boundaries; see [`VersionTracker`]
/// for what assertions can promise once other processes write too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalContext {
    pub key: String,
    pub observed_version: u64,
}

impl CausalContext {
    pub fn new(key: impl Into<String>, observed_version: u64) -> Self {
        Self {
            key: key.into(),
            observed_version,
        }
    }
}

const STRIPES: usize = 64;

/// Per-key monotonic version counters.
///
/// Counters are striped over a fixed set of locks so bumps for unrelated
/// keys rarely contend while bumps for the same key stay serialized. A
/// stripe lock is held only for the map operation, never across I/O.
///
/// The tracker knows only versions this process stamped via
/// [`VersionTracker::next_version`] or fed back through
/// [`VersionTracker::observe`]. Writers in other processes advance the
/// cluster without the tracker noticing, so `current_version` can run
/// behind the true cluster state and causal assertions are best-effort
/// until a read observes the newer version.
pub struct VersionTracker {
    stripes: Vec<Mutex<HashMap<String, u64>>>,
}

impl Default for VersionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionTracker {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn stripe(&self, key: &str) -> &Mutex<HashMap<String, u64>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % STRIPES]
    }

    /// Stamp the next version for `key`. Write path only: every call burns
    /// one version number, even when the write it was stamped for later
    /// fails, so version sequences may contain gaps.
    pub fn next_version(&self, key: &str) -> u64 {
        let mut counters = self.stripe(key).lock();
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Latest version the tracker knows for `key`, 0 if never seen.
    pub fn current_version(&self, key: &str) -> u64 {
        self.stripe(key).lock().get(key).copied().unwrap_or(0)
    }

    /// Fold an externally observed version into the tracker (max-merge).
    /// Read paths call this so writes from other processes eventually
    /// become visible to causal assertions here.
    pub fn observe(&self, key: &str, version: u64) {
        if version == 0 {
            return;
        }
        let mut counters = self.stripe(key).lock();
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter = (*counter).max(version);
    }

    /// Check a causal context against the tracker. Fails exactly when the
    /// context's observed version is ahead of what the tracker knows.
    pub fn assert_causal(&self, ctx: &CausalContext) -> Result<(), AccessError> {
        let current = self.current_version(&ctx.key);
        if current < ctx.observed_version {
            return Err(AccessError::CausalViolation {
                key: ctx.key.clone(),
                observed: ctx.observed_version,
                current,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_versions_start_at_one_and_increase() {
        let tracker = VersionTracker::new();
        assert_eq!(tracker.current_version("k"), 0);
        for expected in 1..=5 {
            assert_eq!(tracker.next_version("k"), expected);
        }
        assert_eq!(tracker.current_version("k"), 5);
    }

    #[test]
    fn test_keys_are_versioned_independently() {
        let tracker = VersionTracker::new();
        tracker.next_version("a");
        tracker.next_version("a");
        tracker.next_version("b");
        assert_eq!(tracker.current_version("a"), 2);
        assert_eq!(tracker.current_version("b"), 1);
        assert_eq!(tracker.current_version("c"), 0);
    }

    #[test]
    fn test_observe_merges_upward_only() {
        let tracker = VersionTracker::new();
        tracker.observe("k", 7);
        assert_eq!(tracker.current_version("k"), 7);
        tracker.observe("k", 3);
        assert_eq!(tracker.current_version("k"), 7);
        // The counter resumes above the merged version.
        assert_eq!(tracker.next_version("k"), 8);
    }

    #[test]
    fn test_observe_zero_is_a_noop() {
        let tracker = VersionTracker::new();
        tracker.observe("k", 0);
        assert_eq!(tracker.current_version("k"), 0);
    }

    #[test]
    fn test_assert_causal_passes_at_or_behind_current() {
        let tracker = VersionTracker::new();
        tracker.next_version("k");
        tracker.next_version("k");
        assert!(tracker.assert_causal(&CausalContext::new("k", 1)).is_ok());
        assert!(tracker.assert_causal(&CausalContext::new("k", 2)).is_ok());
        assert!(tracker.assert_causal(&CausalContext::new("k", 0)).is_ok());
    }

    #[test]
    fn test_assert_causal_fails_when_context_is_ahead() {
        let tracker = VersionTracker::new();
        tracker.next_version("k");
        let err = tracker
            .assert_causal(&CausalContext::new("k", 2))
            .unwrap_err();
        match err {
            AccessError::CausalViolation {
                key,
                observed,
                current,
            } => {
                assert_eq!(key, "k");
                assert_eq!(observed, 2);
                assert_eq!(current, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_causal_context_serde_roundtrip() {
        let ctx = CausalContext::new("user:profile:alice", 42);
        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(serde_json::from_str::<CausalContext>(&json).unwrap(), ctx);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_bumps_yield_unique_versions() {
        let tracker = Arc::new(VersionTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                (0..50)
                    .map(|_| tracker.next_version("shared"))
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for version in handle.await.unwrap() {
                assert!(seen.insert(version), "version {version} issued twice");
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(tracker.current_version("shared"), 400);
    }
}
