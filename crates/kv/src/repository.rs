//! CRUD facade over the coordinated write and read paths.
//!
//! A [`Repository`] owns one keyspace (for instance `user:profile`) and
//! composes the router, version tracker, write coordinator and read
//! selector behind create/get/update/delete/exists. Values are opaque
//! bytes: callers serialize structured payloads before writing and
//! deserialize what comes back.

use std::sync::Arc;

use vernier_metrics::latency::{LatencyAggregator, LatencySummary};
use vernier_metrics::metrics;

use crate::coordinator::{WriteCoordinator, WriteReceipt};
use crate::driver::{StoreDriver, TopologySource};
use crate::error::AccessError;
use crate::policy::{ReadPolicy, WritePolicy};
use crate::reader::{ReadResult, ReadSelector};
use crate::routing::ShardRouter;
use crate::version::{CausalContext, VersionTracker};

/// Keyspace-scoped repository with per-call consistency policies.
///
/// Updates are unconditional overwrites: there is no compare-and-swap and
/// no merge, the newest accepted write simply wins. The stamped version
/// still increases on every accepted write, deletes included.
pub struct Repository<D: StoreDriver> {
    coordinator: WriteCoordinator<D>,
    selector: ReadSelector<D>,
    versions: Arc<VersionTracker>,
    latency: Arc<LatencyAggregator>,
    keyspace: String,
}

impl<D: StoreDriver> std::fmt::Debug for Repository<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("keyspace", &self.keyspace)
            .finish_non_exhaustive()
    }
}

impl<D: StoreDriver> Repository<D> {
    pub fn new(
        driver: Arc<D>,
        topology: Arc<dyn TopologySource>,
        keyspace: impl Into<String>,
    ) -> Self {
        let keyspace = keyspace.into();
        let router = Arc::new(ShardRouter::new(topology));
        let versions = Arc::new(VersionTracker::new());
        let latency = Arc::new(LatencyAggregator::new());

        let coordinator = WriteCoordinator::new(
            driver.clone(),
            router.clone(),
            versions.clone(),
            latency.clone(),
        )
        .with_scope(keyspace.clone());
        let selector = ReadSelector::new(driver, router, versions.clone(), latency.clone())
            .with_scope(keyspace.clone());

        Self {
            coordinator,
            selector,
            versions,
            latency,
            keyspace,
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Full storage key for an id within this keyspace.
    pub fn storage_key(&self, id: &str) -> String {
        format!("{}:{}", self.keyspace, id)
    }

    /// Store a value under a new id. An existing id is silently
    /// overwritten; create and update share last-write-wins semantics.
    pub async fn create(
        &self,
        id: &str,
        value: &[u8],
        policy: WritePolicy,
    ) -> Result<WriteReceipt, AccessError> {
        self.coordinator
            .write(&self.storage_key(id), value.to_vec(), policy)
            .await
    }

    /// Replace the full value for an id.
    pub async fn update(
        &self,
        id: &str,
        value: &[u8],
        policy: WritePolicy,
    ) -> Result<WriteReceipt, AccessError> {
        self.create(id, value, policy).await
    }

    /// Fetch the value for an id under the given read policy.
    pub async fn get(&self, id: &str, policy: ReadPolicy) -> Result<ReadResult, AccessError> {
        self.selector.read(&self.storage_key(id), policy).await
    }

    /// Delete an id by tombstone write; the receipt reports replica
    /// acknowledgments like any other write.
    pub async fn delete(&self, id: &str, policy: WritePolicy) -> Result<WriteReceipt, AccessError> {
        self.coordinator.delete(&self.storage_key(id), policy).await
    }

    /// Whether a live (non-deleted) value exists for the id.
    pub async fn exists(&self, id: &str, policy: ReadPolicy) -> Result<bool, AccessError> {
        Ok(self.get(id, policy).await?.found())
    }

    /// Latest version the tracker knows for an id, 0 if never written.
    pub fn current_version(&self, id: &str) -> u64 {
        self.versions.current_version(&self.storage_key(id))
    }

    /// Check a causal context captured from an earlier receipt or read.
    pub fn assert_causal(&self, ctx: &CausalContext) -> Result<(), AccessError> {
        let checked = self.versions.assert_causal(ctx);
        if checked.is_err() {
            metrics().causal_violations_total.inc();
        }
        checked
    }

    /// Latency summary for one fully qualified tag, such as
    /// `user:profile.write.quorum-2`.
    pub fn latency_summary(&self, tag: &str) -> Option<LatencySummary> {
        self.latency.summary(tag)
    }

    /// Every latency tag recorded so far, sorted.
    pub fn latency_tags(&self) -> Vec<String> {
        self.latency.tags()
    }
}
