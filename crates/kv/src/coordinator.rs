//! Write path: route, stamp a version, write the primary, await replica acks.
//!
//! Every write follows the same sequence:
//! 1. Route the key to its owning shard.
//! 2. Stamp the next per-key version.
//! 3. Send the stamped record to the shard primary. Failure here is fatal:
//!    nothing durable happened.
//! 4. Await replica acknowledgments per the write policy, bounded by the
//!    policy timeout.
//! 5. Record exactly one latency sample, whatever the outcome.
//!
//! A replica-ack shortfall is not an error. The primary accepted the write,
//! so the receipt reports `acked < requested` and the caller decides what
//! partial replication means for it. There are no retries at this layer.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::debug;
use vernier_common::{Endpoint, Record};
use vernier_metrics::latency::{LatencyAggregator, LatencySample};
use vernier_metrics::metrics;

use crate::driver::{DriverError, StoreDriver};
use crate::error::AccessError;
use crate::policy::{WriteConcern, WritePolicy};
use crate::routing::ShardRouter;
use crate::version::{CausalContext, VersionTracker};

/// Outcome of a coordinated write.
///
/// `acked < requested` means the replica wait hit its deadline or lost
/// replicas after the primary had already accepted the write: the record
/// is durable on the primary and replicated as far as reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub key: String,
    /// Version stamped on this write.
    pub version: u64,
    /// Replica acknowledgments received before the deadline.
    pub acked: usize,
    /// Acknowledgments the policy asked for, clamped to the replica count.
    pub requested: usize,
    /// Wall time of the whole call, replica wait included.
    pub elapsed: Duration,
}

impl WriteReceipt {
    /// Did every requested replica acknowledge in time?
    pub fn fully_acked(&self) -> bool {
        self.acked >= self.requested
    }

    /// Context for later operations that depend on this write.
    pub fn causal_context(&self) -> CausalContext {
        CausalContext::new(self.key.clone(), self.version)
    }
}

/// Write-side coordinator.
///
/// Generic over `D: StoreDriver`: deployments hand it the real driver,
/// unit tests use mocks.
pub struct WriteCoordinator<D: StoreDriver> {
    driver: Arc<D>,
    router: Arc<ShardRouter>,
    versions: Arc<VersionTracker>,
    latency: Arc<LatencyAggregator>,
    scope: Option<String>,
}

impl<D: StoreDriver> std::fmt::Debug for WriteCoordinator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<D: StoreDriver> WriteCoordinator<D> {
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

    fn sample_tag(&self, policy: WritePolicy) -> String {
        match &self.scope {
            Some(scope) => format!("{}.{}", scope, policy.tag()),
            None => policy.tag(),
        }
    }

    /// Write `value` under `key` with the given policy.
    pub async fn write(
        &self,
        key: &str,
        value: Vec<u8>,
        policy: WritePolicy,
    ) -> Result<WriteReceipt, AccessError> {
        self.execute(key, Some(value), policy).await
    }

    /// Delete `key` by writing a tombstone through the same path: deletes
    /// get a version and replica acknowledgments like any other write.
    pub async fn delete(&self, key: &str, policy: WritePolicy) -> Result<WriteReceipt, AccessError> {
        self.execute(key, None, policy).await
    }

    async fn execute(
        &self,
        key: &str,
        payload: Option<Vec<u8>>,
        policy: WritePolicy,
    ) -> Result<WriteReceipt, AccessError> {
        let started = tokio::time::Instant::now();
        let result = self.execute_inner(key, payload, policy, started).await;

        let tag = self.sample_tag(policy);
        self.latency
            .record(LatencySample::new(&tag, started.elapsed(), result.is_ok()));

        let label = policy.tag();
        match &result {
            Ok(receipt) => {
                metrics()
                    .writes_total
                    .with_label_values(&[label.as_str()])
                    .inc();
                if !receipt.fully_acked() {
                    metrics().ack_shortfalls_total.inc();
                }
            }
            Err(error) => {
                metrics()
                    .writes_failed_total
                    .with_label_values(&[label.as_str()])
                    .inc();
                debug!(key, %policy, %error, "write failed");
            }
        }
        result
    }

    async fn execute_inner(
        &self,
        key: &str,
        payload: Option<Vec<u8>>,
        policy: WritePolicy,
        started: tokio::time::Instant,
    ) -> Result<WriteReceipt, AccessError> {
        let assignment = self
            .router
            .route(key)
            .map_err(|source| AccessError::Unroutable {
                key: key.to_string(),
                policy: policy.to_string(),
                source,
            })?;

        let version = self.versions.next_version(key);
        let record = match payload {
            Some(value) => Record::new(key, value, version),
            None => Record::tombstone(key, version),
        };

        self.driver
            .send_write(&assignment.primary, &record)
            .await
            .map_err(|source| {
                let endpoint = source.endpoint();
                match source {
                    DriverError::Rejected(..) => AccessError::WriteRejected {
                        key: key.to_string(),
                        policy: policy.to_string(),
                        endpoint,
                        source,
                    },
                    _ => AccessError::PrimaryUnreachable {
                        key: key.to_string(),
                        policy: policy.to_string(),
                        endpoint,
                        source,
                    },
                }
            })?;

        let requested = match policy.concern {
            WriteConcern::None => 0,
            WriteConcern::Quorum(n) => n.min(assignment.replica_count()),
            WriteConcern::All => assignment.replica_count(),
        };

        let acked = if requested == 0 {
            0
        } else {
            self.await_replica_acks(key, version, &assignment.replicas, requested, policy.timeout)
                .await
        };

        if acked < requested {
            debug!(key, version, acked, requested, "replica ack shortfall");
        }

        Ok(WriteReceipt {
            key: key.to_string(),
            version,
            acked,
            requested,
            elapsed: started.elapsed(),
        })
    }

    /// Fan ack waits out to every replica and count confirmations until
    /// `requested` is reached or the deadline passes. Replica-side errors
    /// are logged and counted as missing acks, never escalated.
    async fn await_replica_acks(
        &self,
        key: &str,
        version: u64,
        replicas: &[Endpoint],
        requested: usize,
        timeout: Duration,
    ) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut waits = FuturesUnordered::new();

        for replica in replicas {
            let driver = self.driver.clone();
            let replica = replica.clone();
            let key = key.to_string();
            waits.push(async move {
                let acked = driver
                    .wait_for_replica_ack(&replica, &key, version, timeout)
                    .await;
                (replica.id, acked)
            });
        }

        let mut acks = 0usize;
        while let Some((endpoint, outcome)) = tokio::time::timeout_at(deadline, waits.next())
            .await
            .ok()
            .flatten()
        {
            match outcome {
                Ok(true) => {
                    acks += 1;
                    if acks >= requested {
                        break;
                    }
                }
                Ok(false) => {
                    debug!(%endpoint, key, version, "replica still behind at its deadline");
                }
                Err(error) => {
                    debug!(%endpoint, key, version, %error, "replica ack wait failed");
                }
            }
        }
        acks
    }
}
