//! Transport seam between the access layer and the replicated store.
//!
//! Concrete drivers live outside this crate: `vernier-sim` provides an
//! in-process simulated cluster, and a production driver would wrap a
//! real connection pool. Coordinators are generic over [`StoreDriver`]
//! so unit tests can substitute mocks.

use std::sync::Arc;
use std::time::Duration;

use vernier_common::{Endpoint, EndpointId, Record, TopologySnapshot};

/// Transport-level failures reported by a driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("endpoint {0} unreachable: {1}")]
    Unreachable(EndpointId, String),
    #[error("endpoint {0} rejected the request: {1}")]
    Rejected(EndpointId, String),
    #[error("request to endpoint {0} timed out")]
    Timeout(EndpointId),
}

impl DriverError {
    /// The endpoint the failure was observed on.
    pub fn endpoint(&self) -> EndpointId {
        match self {
            Self::Unreachable(id, _) | Self::Rejected(id, _) | Self::Timeout(id) => *id,
        }
    }
}

/// One method per wire operation against the store.
#[async_trait::async_trait]
pub trait StoreDriver: Send + Sync + 'static {
    /// Deliver a stamped record to an endpoint (normally a shard primary).
    async fn send_write(&self, endpoint: &Endpoint, record: &Record) -> Result<(), DriverError>;

    /// Wait until `endpoint` has applied `key` at `version` or newer, or
    /// until `timeout` passes. `Ok(false)` means the deadline expired with
    /// the endpoint still behind; that is not a transport failure.
    async fn wait_for_replica_ack(
        &self,
        endpoint: &Endpoint,
        key: &str,
        version: u64,
        timeout: Duration,
    ) -> Result<bool, DriverError>;

    /// Fetch an endpoint's current record for `key`. `Ok(None)` when the
    /// endpoint has never seen the key.
    async fn send_read(
        &self,
        endpoint: &Endpoint,
        key: &str,
    ) -> Result<Option<Record>, DriverError>;
}

/// Source of the topology snapshot a routing decision is made against.
///
/// `None` until a snapshot has been loaded; routing surfaces that as
/// [`crate::routing::RoutingError::TopologyUnavailable`].
pub trait TopologySource: Send + Sync + 'static {
    fn current(&self) -> Option<Arc<TopologySnapshot>>;
}

/// A fixed snapshot, for tests and static single-snapshot deployments.
pub struct StaticTopology(Arc<TopologySnapshot>);

impl StaticTopology {
    pub fn new(snapshot: TopologySnapshot) -> Self {
        Self(Arc::new(snapshot))
    }
}

impl TopologySource for StaticTopology {
    fn current(&self) -> Option<Arc<TopologySnapshot>> {
        Some(self.0.clone())
    }
}
