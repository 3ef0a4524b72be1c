//! In-process simulated cluster behind the [`StoreDriver`] seam.
//!
//! [`SimCluster`] gives every endpoint its own store map. A write accepted
//! by a shard primary lands there immediately and reaches that shard's
//! replicas only after the configured replication lag, which makes stale
//! replica reads and ack shortfalls reproducible without real processes
//! or sockets. The cluster doubles as the [`TopologySource`] for the
//! snapshot it was built from.

pub mod workload;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;
use vernier_common::{Endpoint, EndpointId, Record, TopologyError, TopologySnapshot};
use vernier_config::{ClusterConfig, VernierConfig};
use vernier_kv::driver::{DriverError, StoreDriver, TopologySource};

type NodeStore = Arc<RwLock<HashMap<String, Record>>>;

/// How often ack waits re-check a replica's applied version.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Apply a record if it is newer than what the store already holds.
fn apply_if_newer(store: &mut HashMap<String, Record>, record: &Record) -> bool {
    match store.get(&record.key) {
        Some(existing) if existing.version >= record.version => false,
        _ => {
            store.insert(record.key.clone(), record.clone());
            true
        }
    }
}

/// Simulated sharded cluster with per-endpoint stores.
pub struct SimCluster {
    snapshot: Arc<TopologySnapshot>,
    stores: HashMap<EndpointId, NodeStore>,
    /// Replica stores per primary, in assignment order.
    replica_stores: HashMap<EndpointId, Vec<NodeStore>>,
    lag: Arc<RwLock<Duration>>,
}

impl std::fmt::Debug for SimCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCluster")
            .field("shards", &self.snapshot.shard_count())
            .field("endpoints", &self.stores.len())
            .finish_non_exhaustive()
    }
}

impl SimCluster {
    /// Build a cluster from the config. Primaries take endpoint ids and
    /// ports `base_port..base_port + shards`; replicas follow in shard
    /// order, so 3 shards with one replica each on base port 7001 occupy
    /// 7001-7006.
    pub fn new(cluster: &ClusterConfig, replication_lag: Duration) -> Result<Self, TopologyError> {
        let mut seats = Vec::with_capacity(cluster.shards);
        let mut next_replica = cluster.shards as u64;
        for shard in 0..cluster.shards as u64 {
            let primary = Endpoint::on_loopback(shard, cluster.base_port + shard as u16);
            let replicas = (0..cluster.replicas_per_shard)
                .map(|_| {
                    let id = next_replica;
                    next_replica += 1;
                    Endpoint::on_loopback(id, cluster.base_port + id as u16)
                })
                .collect();
            seats.push((primary, replicas));
        }
        let snapshot = Arc::new(TopologySnapshot::balanced(seats)?);

        let mut stores = HashMap::new();
        let mut replica_stores: HashMap<EndpointId, Vec<NodeStore>> = HashMap::new();
        for shard in snapshot.shards() {
            let primary_store: NodeStore = Arc::default();
            stores.insert(shard.primary.id, primary_store);

            let mut shard_replicas = Vec::with_capacity(shard.replicas.len());
            for replica in &shard.replicas {
                let store: NodeStore = Arc::default();
                stores.insert(replica.id, store.clone());
                shard_replicas.push(store);
            }
            replica_stores.insert(shard.primary.id, shard_replicas);
        }

        Ok(Self {
            snapshot,
            stores,
            replica_stores,
            lag: Arc::new(RwLock::new(replication_lag)),
        })
    }

    pub fn from_config(config: &VernierConfig) -> Result<Self, TopologyError> {
        Self::new(
            &config.cluster,
            Duration::from_millis(config.sim.replication_lag_ms),
        )
    }

    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.snapshot.clone()
    }

    /// Change the replication lag for writes accepted from now on;
    /// propagation already in flight keeps its original lag.
    pub async fn set_replication_lag(&self, lag: Duration) {
        *self.lag.write().await = lag;
    }

    /// Version an endpoint has applied for `key`, tombstones included.
    pub async fn version_at(&self, endpoint: EndpointId, key: &str) -> Option<u64> {
        let store = self.stores.get(&endpoint)?;
        let map = store.read().await;
        map.get(key).map(|record| record.version)
    }

    /// Live value an endpoint holds for `key`.
    pub async fn value_at(&self, endpoint: EndpointId, key: &str) -> Option<Vec<u8>> {
        let store = self.stores.get(&endpoint)?;
        let map = store.read().await;
        map.get(key)
            .filter(|record| record.is_live())
            .map(|record| record.value.clone())
    }

    fn store(&self, endpoint: &Endpoint) -> Result<&NodeStore, DriverError> {
        self.stores
            .get(&endpoint.id)
            .ok_or_else(|| DriverError::Unreachable(endpoint.id, "unknown endpoint".into()))
    }
}

#[async_trait::async_trait]
impl StoreDriver for SimCluster {
    async fn send_write(&self, endpoint: &Endpoint, record: &Record) -> Result<(), DriverError> {
        let store = self.store(endpoint)?;
        let Some(replicas) = self.replica_stores.get(&endpoint.id) else {
            return Err(DriverError::Rejected(
                endpoint.id,
                "endpoint is not a shard primary".into(),
            ));
        };

        {
            let mut map = store.write().await;
            if !apply_if_newer(&mut map, record) {
                // A newer version is already applied; the late write is
                // accepted and dropped, and replicas keep converging to
                // the newer record.
                debug!(key = %record.key, version = record.version, "dropping superseded write");
                return Ok(());
            }
        }

        let lag = *self.lag.read().await;
        for replica in replicas {
            let replica = replica.clone();
            let record = record.clone();
            tokio::spawn(async move {
                if !lag.is_zero() {
                    tokio::time::sleep(lag).await;
                }
                let mut map = replica.write().await;
                apply_if_newer(&mut map, &record);
            });
        }
        Ok(())
    }

    async fn wait_for_replica_ack(
        &self,
        endpoint: &Endpoint,
        key: &str,
        version: u64,
        timeout: Duration,
    ) -> Result<bool, DriverError> {
        let store = self.store(endpoint)?.clone();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let applied = {
                let map = store.read().await;
                map.get(key).map(|record| record.version).unwrap_or(0)
            };
            if applied >= version {
                return Ok(true);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep_until(deadline.min(now + ACK_POLL_INTERVAL)).await;
        }
    }

    async fn send_read(
        &self,
        endpoint: &Endpoint,
        key: &str,
    ) -> Result<Option<Record>, DriverError> {
        let store = self.store(endpoint)?;
        let map = store.read().await;
        Ok(map.get(key).cloned())
    }
}

impl TopologySource for SimCluster {
    fn current(&self) -> Option<Arc<TopologySnapshot>> {
        Some(self.snapshot.clone())
    }
}
