//! Fault injection at the driver seam.
//!
//! [`ChaosDriver`] forwards every call to an inner [`StoreDriver`] and
//! degrades it on the way through: endpoints can be taken down outright,
//! replica acknowledgments can go missing while the data still lands,
//! calls can be slowed by a floor plus jitter or dropped at random.
//! Faults are armed through setters and apply to calls issued after the
//! change.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::debug;
use vernier_common::{Endpoint, EndpointId, Record};

use crate::driver::{DriverError, StoreDriver};

#[derive(Default)]
struct ChaosState {
    /// Endpoints refusing every call.
    down: HashSet<EndpointId>,
    /// Endpoints whose ack waits run out the clock. Writes and reads
    /// still pass; only the acknowledgment is lost.
    muted_acks: HashSet<EndpointId>,
    /// Fraction of calls dropped at random, kept in `[0, 1]`.
    drop_rate: f64,
    /// Delay floor added to every forwarded call.
    added_latency: Duration,
    /// Upper bound of the random slice added on top of the floor.
    jitter: Duration,
}

impl ChaosState {
    fn pause(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.added_latency;
        }
        self.added_latency + self.jitter.mul_f64(rand::random::<f64>())
    }
}

/// Driver wrapper that degrades calls on their way to the store.
pub struct ChaosDriver<D: StoreDriver> {
    inner: Arc<D>,
    state: RwLock<ChaosState>,
}

impl<D: StoreDriver> std::fmt::Debug for ChaosDriver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("ChaosDriver");
        if let Ok(state) = self.state.try_read() {
            out.field("down", &state.down.len())
                .field("muted_acks", &state.muted_acks.len())
                .field("drop_rate", &state.drop_rate);
        }
        out.finish_non_exhaustive()
    }
}

impl<D: StoreDriver> ChaosDriver<D> {
    /// Wrap `inner` with no faults armed; everything passes through
    /// untouched until a setter changes that.
    pub fn new(inner: Arc<D>) -> Self {
        Self {
            inner,
            state: RwLock::new(ChaosState::default()),
        }
    }

    /// Refuse every call aimed at `endpoint` until it recovers.
    pub async fn fail_endpoint(&self, endpoint: EndpointId) {
        self.state.write().await.down.insert(endpoint);
        debug!(%endpoint, "endpoint taken down");
    }

    pub async fn recover_endpoint(&self, endpoint: EndpointId) {
        self.state.write().await.down.remove(&endpoint);
        debug!(%endpoint, "endpoint recovered");
    }

    /// Lose acknowledgments from `endpoint`: its ack waits run the
    /// caller's timeout out and report the replica as behind, while the
    /// replicated data keeps arriving. Forces an ack shortfall without
    /// slowing replication itself.
    pub async fn mute_acks(&self, endpoint: EndpointId) {
        self.state.write().await.muted_acks.insert(endpoint);
        debug!(%endpoint, "acks muted");
    }

    pub async fn restore_acks(&self, endpoint: EndpointId) {
        self.state.write().await.muted_acks.remove(&endpoint);
        debug!(%endpoint, "acks restored");
    }

    /// Drop this fraction of calls at random. Out-of-range values are
    /// clamped into `[0, 1]`.
    pub async fn set_drop_rate(&self, rate: f64) {
        self.state.write().await.drop_rate = rate.clamp(0.0, 1.0);
    }

    /// Slow every forwarded call by `floor` plus a random slice of
    /// `jitter`.
    pub async fn set_added_latency(&self, floor: Duration, jitter: Duration) {
        let mut state = self.state.write().await;
        state.added_latency = floor;
        state.jitter = jitter;
    }

    /// Decide a call's fate before it reaches the inner driver.
    async fn admit(&self, endpoint: &Endpoint) -> Result<(), DriverError> {
        let (pause, dropped) = {
            let state = self.state.read().await;
            if state.down.contains(&endpoint.id) {
                return Err(DriverError::Unreachable(
                    endpoint.id,
                    "endpoint is down".into(),
                ));
            }
            let dropped = state.drop_rate > 0.0 && rand::thread_rng().gen_bool(state.drop_rate);
            (state.pause(), dropped)
        };

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        if dropped {
            debug!(endpoint = %endpoint.id, "dropping call");
            return Err(DriverError::Unreachable(endpoint.id, "call dropped".into()));
        }
        Ok(())
    }

    async fn acks_muted(&self, endpoint: EndpointId) -> bool {
        self.state.read().await.muted_acks.contains(&endpoint)
    }
}

#[async_trait::async_trait]
impl<D: StoreDriver> StoreDriver for ChaosDriver<D> {
    async fn send_write(&self, endpoint: &Endpoint, record: &Record) -> Result<(), DriverError> {
        self.admit(endpoint).await?;
        self.inner.send_write(endpoint, record).await
    }

    async fn wait_for_replica_ack(
        &self,
        endpoint: &Endpoint,
        key: &str,
        version: u64,
        timeout: Duration,
    ) -> Result<bool, DriverError> {
        self.admit(endpoint).await?;
        if self.acks_muted(endpoint.id).await {
            // The write lands; the confirmation never comes back.
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }
        self.inner
            .wait_for_replica_ack(endpoint, key, version, timeout)
            .await
    }

    async fn send_read(
        &self,
        endpoint: &Endpoint,
        key: &str,
    ) -> Result<Option<Record>, DriverError> {
        self.admit(endpoint).await?;
        self.inner.send_read(endpoint, key).await
    }
}

// ────────────────────────── Tests ──────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Accepts everything and counts the calls that reached it.
    #[derive(Default)]
    struct CountingDriver {
        forwarded: Mutex<usize>,
    }

    impl CountingDriver {
        fn forwarded(&self) -> usize {
            *self.forwarded.lock()
        }

        fn bump(&self) {
            *self.forwarded.lock() += 1;
        }
    }

    #[async_trait::async_trait]
    impl StoreDriver for CountingDriver {
        async fn send_write(&self, _: &Endpoint, _: &Record) -> Result<(), DriverError> {
            self.bump();
            Ok(())
        }

        async fn wait_for_replica_ack(
            &self,
            _: &Endpoint,
            _: &str,
            _: u64,
            _: Duration,
        ) -> Result<bool, DriverError> {
            self.bump();
            Ok(true)
        }

        async fn send_read(&self, _: &Endpoint, _: &str) -> Result<Option<Record>, DriverError> {
            self.bump();
            Ok(None)
        }
    }

    fn rig() -> (Arc<CountingDriver>, ChaosDriver<CountingDriver>) {
        let inner = Arc::new(CountingDriver::default());
        (inner.clone(), ChaosDriver::new(inner))
    }

    fn ep(id: u64) -> Endpoint {
        Endpoint::on_loopback(id, 7001 + id as u16)
    }

    fn rec(version: u64) -> Record {
        Record::new("k", b"v".to_vec(), version)
    }

    #[tokio::test]
    async fn test_neutral_wrapper_forwards_every_call() {
        let (inner, chaos) = rig();
        let target = ep(1);

        chaos.send_write(&target, &rec(1)).await.unwrap();
        assert_eq!(chaos.send_read(&target, "k").await.unwrap(), None);
        assert!(chaos
            .wait_for_replica_ack(&target, "k", 1, Duration::from_millis(10))
            .await
            .unwrap());
        assert_eq!(inner.forwarded(), 3);
    }

    #[tokio::test]
    async fn test_down_endpoint_refuses_before_the_inner_driver() {
        let (inner, chaos) = rig();
        let target = ep(1);

        chaos.fail_endpoint(target.id).await;
        let err = chaos.send_write(&target, &rec(1)).await.unwrap_err();
        assert!(matches!(err, DriverError::Unreachable(id, _) if id == target.id));
        assert!(chaos.send_read(&target, "k").await.is_err());
        assert!(chaos
            .wait_for_replica_ack(&target, "k", 1, Duration::from_millis(10))
            .await
            .is_err());
        assert_eq!(inner.forwarded(), 0);

        // A sibling endpoint is unaffected, and recovery reopens the path.
        chaos.send_write(&ep(2), &rec(1)).await.unwrap();
        chaos.recover_endpoint(target.id).await;
        chaos.send_write(&target, &rec(2)).await.unwrap();
        assert_eq!(inner.forwarded(), 2);
    }

    #[tokio::test]
    async fn test_muted_acks_run_out_the_clock_and_report_behind() {
        let (inner, chaos) = rig();
        let target = ep(1);
        chaos.mute_acks(target.id).await;

        let started = tokio::time::Instant::now();
        let acked = chaos
            .wait_for_replica_ack(&target, "k", 1, Duration::from_millis(40))
            .await
            .unwrap();
        assert!(!acked);
        assert!(started.elapsed() >= Duration::from_millis(40));

        // The wait never consulted the inner driver, but writes still do.
        assert_eq!(inner.forwarded(), 0);
        chaos.send_write(&target, &rec(1)).await.unwrap();
        assert_eq!(inner.forwarded(), 1);

        chaos.restore_acks(target.id).await;
        assert!(chaos
            .wait_for_replica_ack(&target, "k", 1, Duration::from_millis(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_drop_rate_extremes_and_clamping() {
        let (_, chaos) = rig();
        let target = ep(1);

        chaos.set_drop_rate(1.0).await;
        for _ in 0..8 {
            assert!(chaos.send_write(&target, &rec(1)).await.is_err());
        }

        // Oversized rates behave as certain failure.
        chaos.set_drop_rate(7.5).await;
        assert!(chaos.send_write(&target, &rec(1)).await.is_err());

        chaos.set_drop_rate(0.0).await;
        assert!(chaos.send_write(&target, &rec(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_added_latency_slows_forwarded_calls() {
        let (_, chaos) = rig();
        let target = ep(1);
        chaos
            .set_added_latency(Duration::from_millis(50), Duration::from_millis(20))
            .await;

        let started = tokio::time::Instant::now();
        chaos.send_read(&target, "k").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
