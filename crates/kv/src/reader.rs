//! Read path: primary for strong reads, first healthy replica otherwise.
//!
//! A missing key is a normal outcome, not an error. Reads are single-shot:
//! the selector walks endpoints within one call but never re-issues a read
//! on a later schedule.

use std::sync::Arc;

use tracing::debug;
use vernier_common::{EndpointId, Record};
use vernier_metrics::latency::{LatencyAggregator, LatencySample};
use vernier_metrics::metrics;

use crate::driver::{DriverError, StoreDriver};
use crate::error::AccessError;
use crate::policy::ReadPolicy;
use crate::routing::{ShardAssignment, ShardRouter};
use crate::version::{CausalContext, VersionTracker};

/// Which endpoint actually served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedBy {
    Primary(EndpointId),
    Replica(EndpointId),
}

impl ServedBy {
    pub fn endpoint(&self) -> EndpointId {
        match self {
            Self::Primary(id) | Self::Replica(id) => *id,
        }
    }

    pub fn is_replica(&self) -> bool {
        matches!(self, Self::Replica(_))
    }
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub key: String,
    /// The live value; `None` for never-written or deleted keys.
    pub value: Option<Vec<u8>>,
    /// Version at the serving endpoint. Tombstones keep their version;
    /// 0 means the endpoint has never seen the key.
    pub version: u64,
    pub served_by: ServedBy,
    /// Best-effort staleness for replica-served reads: the replica
    /// returned an older version than the local tracker knows for this
    /// key. Always false for primary-served reads, and `!stale` proves
    /// nothing about writers in other processes the tracker has not
    /// observed yet.
    pub stale: bool,
}

impl ReadResult {
    /// Whether a live (non-deleted) value came back.
    pub fn found(&self) -> bool {
        self.value.is_some()
    }

    /// Context for later operations that depend on this read.
    pub fn causal_context(&self) -> CausalContext {
        CausalContext::new(self.key.clone(), self.version)
    }
}

/// Read-side selector, generic over the driver like the coordinator.
pub struct ReadSelector<D: StoreDriver> {
    driver: Arc<D>,
    router: Arc<ShardRouter>,
    versions: Arc<VersionTracker>,
    latency: Arc<LatencyAggregator>,
    scope: Option<String>,
}

impl<D: StoreDriver> std::fmt::Debug for ReadSelector<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSelector")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<D: StoreDriver> ReadSelector<D> {
    pub fn new(
        driver: Arc<D>,
        router: Arc<ShardRouter>,
        versions: Arc<VersionTracker>,
        latency: Arc<LatencyAggregator>,
    ) -> Self {
        Self {
            driver,
            router,
            versions,
            latency,
            scope: None,
        }
    }

    /// Prefix latency tags with a keyspace scope, `<scope>.<policy tag>`.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    fn sample_tag(&self, policy: ReadPolicy) -> String {
        match &self.scope {
            Some(scope) => format!("{}.{}", scope, policy.tag()),
            None => policy.tag().to_string(),
        }
    }

    /// Read `key` with the given policy.
    pub async fn read(&self, key: &str, policy: ReadPolicy) -> Result<ReadResult, AccessError> {
        let started = tokio::time::Instant::now();
        let result = self.read_inner(key, policy).await;

        let tag = self.sample_tag(policy);
        self.latency
            .record(LatencySample::new(&tag, started.elapsed(), result.is_ok()));

        match &result {
            Ok(read) => {
                metrics()
                    .reads_total
                    .with_label_values(&[policy.tag()])
                    .inc();
                if read.stale {
                    metrics().stale_reads_total.inc();
                }
            }
            Err(error) => {
                metrics()
                    .reads_failed_total
                    .with_label_values(&[policy.tag()])
                    .inc();
                debug!(key, %policy, %error, "read failed");
            }
        }
        result
    }

    async fn read_inner(&self, key: &str, policy: ReadPolicy) -> Result<ReadResult, AccessError> {
        let assignment = self
            .router
            .route(key)
            .map_err(|source| AccessError::Unroutable {
                key: key.to_string(),
                policy: policy.to_string(),
                source,
            })?;

        let (record, served_by) = match policy {
            ReadPolicy::Primary => {
                let record = self.read_primary(key, policy, &assignment).await?;
                (record, ServedBy::Primary(assignment.primary.id))
            }
            ReadPolicy::AnyReplica => self.read_first_healthy(key, policy, &assignment).await?,
        };

        Ok(self.finish(key, record, served_by))
    }

    async fn read_primary(
        &self,
        key: &str,
        policy: ReadPolicy,
        assignment: &ShardAssignment,
    ) -> Result<Option<Record>, AccessError> {
        self.driver
            .send_read(&assignment.primary, key)
            .await
            .map_err(|source| AccessError::ReadUnavailable {
                key: key.to_string(),
                policy: policy.to_string(),
                source,
            })
    }

    /// Walk the replicas in assignment order and take the first that
    /// responds, whether or not it has the key. A shard with no replicas
    /// at all serves the read from its primary instead of failing.
    async fn read_first_healthy(
        &self,
        key: &str,
        policy: ReadPolicy,
        assignment: &ShardAssignment,
    ) -> Result<(Option<Record>, ServedBy), AccessError> {
        if assignment.replicas.is_empty() {
            let record = self.read_primary(key, policy, assignment).await?;
            return Ok((record, ServedBy::Primary(assignment.primary.id)));
        }

        let mut last_error = None;
        for replica in &assignment.replicas {
            match self.driver.send_read(replica, key).await {
                Ok(record) => return Ok((record, ServedBy::Replica(replica.id))),
                Err(error) => {
                    debug!(endpoint = %replica.id, key, %error, "replica read failed, trying next");
                    last_error = Some(error);
                }
            }
        }

        // Reached only when every replica errored out.
        let source = last_error.unwrap_or_else(|| {
            DriverError::Unreachable(assignment.primary.id, "no replicas in assignment".into())
        });
        Err(AccessError::ReadUnavailable {
            key: key.to_string(),
            policy: policy.to_string(),
            source,
        })
    }

    /// Fold the served record into a result, feeding the observed version
    /// back into the tracker before judging staleness.
    fn finish(&self, key: &str, record: Option<Record>, served_by: ServedBy) -> ReadResult {
        let (value, version) = match record {
            Some(rec) if rec.is_live() => (Some(rec.value), rec.version),
            Some(rec) => (None, rec.version),
            None => (None, 0),
        };

        self.versions.observe(key, version);
        let current = self.versions.current_version(key);
        let stale = served_by.is_replica() && version < current;

        ReadResult {
            key: key.to_string(),
            value,
            version,
            served_by,
            stale,
        }
    }
}
