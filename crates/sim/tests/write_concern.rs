//! Write-concern integration tests over the simulated cluster.
//!
//! These exercise the full write path end to end: routing, version
//! stamping, primary writes, replica-ack waits bounded by policy
//! timeouts, and the latency samples the coordinator records along the
//! way.

use std::sync::Arc;
use std::time::Duration;

use vernier_config::ClusterConfig;
use vernier_kv::chaos::ChaosDriver;
use vernier_kv::coordinator::WriteCoordinator;
use vernier_kv::driver::{StoreDriver, TopologySource};
use vernier_kv::error::AccessError;
use vernier_kv::policy::{ReadPolicy, WritePolicy};
use vernier_kv::reader::ReadSelector;
use vernier_kv::routing::ShardRouter;
use vernier_kv::version::VersionTracker;
use vernier_metrics::latency::LatencyAggregator;
use vernier_sim::SimCluster;

// ────────────────────────── Harness ──────────────────────────

struct Harness {
    cluster: Arc<SimCluster>,
    router: Arc<ShardRouter>,
    coordinator: WriteCoordinator<SimCluster>,
    selector: ReadSelector<SimCluster>,
    latency: Arc<LatencyAggregator>,
}

fn harness(shards: usize, replicas: usize, lag: Duration) -> Harness {
    let config = ClusterConfig {
        shards,
        replicas_per_shard: replicas,
        base_port: 7001,
    };
    let cluster = Arc::new(SimCluster::new(&config, lag).unwrap());
    let source: Arc<dyn TopologySource> = cluster.clone();
    let router = Arc::new(ShardRouter::new(source));
    let versions = Arc::new(VersionTracker::new());
    let latency = Arc::new(LatencyAggregator::new());

    let coordinator = WriteCoordinator::new(
        cluster.clone(),
        router.clone(),
        versions.clone(),
        latency.clone(),
    );
    let selector = ReadSelector::new(cluster.clone(), router.clone(), versions, latency.clone());

    Harness {
        cluster,
        router,
        coordinator,
        selector,
        latency,
    }
}

/// Same stack with a [`ChaosDriver`] between the coordinator and the
/// cluster, for the degraded-path tests.
struct ChaosHarness {
    cluster: Arc<SimCluster>,
    chaos: Arc<ChaosDriver<SimCluster>>,
    router: Arc<ShardRouter>,
    coordinator: WriteCoordinator<ChaosDriver<SimCluster>>,
    latency: Arc<LatencyAggregator>,
}

fn chaos_harness(shards: usize, replicas: usize, lag: Duration) -> ChaosHarness {
    let config = ClusterConfig {
        shards,
        replicas_per_shard: replicas,
        base_port: 7001,
    };
    let cluster = Arc::new(SimCluster::new(&config, lag).unwrap());
    let chaos = Arc::new(ChaosDriver::new(cluster.clone()));
    let source: Arc<dyn TopologySource> = cluster.clone();
    let router = Arc::new(ShardRouter::new(source));
    let latency = Arc::new(LatencyAggregator::new());

    let coordinator = WriteCoordinator::new(
        chaos.clone(),
        router.clone(),
        Arc::new(VersionTracker::new()),
        latency.clone(),
    );

    ChaosHarness {
        cluster,
        chaos,
        router,
        coordinator,
        latency,
    }
}

// ────────────────────────── Tests ──────────────────────────

#[tokio::test]
async fn test_all_concern_acks_every_replica() {
    let h = harness(3, 2, Duration::from_millis(20));

    let receipt = h
        .coordinator
        .write(
            "user:profile:alice",
            b"profile".to_vec(),
            WritePolicy::all(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert_eq!(receipt.version, 1);
    assert_eq!(receipt.requested, 2);
    assert_eq!(receipt.acked, 2);
    assert!(receipt.fully_acked());

    // Every replica of the owning shard has the record by now.
    let assignment = h.router.route("user:profile:alice").unwrap();
    for replica in &assignment.replicas {
        assert_eq!(
            h.cluster.version_at(replica.id, "user:profile:alice").await,
            Some(1)
        );
    }
}

#[tokio::test]
async fn test_quorum_timeout_is_shortfall_not_error() {
    // Replication takes far longer than the policy allows, so the ack
    // wait expires. The write itself still succeeded on the primary.
    let h = harness(1, 2, Duration::from_millis(400));

    let receipt = h
        .coordinator
        .write(
            "k",
            b"v".to_vec(),
            WritePolicy::quorum(2, Duration::from_millis(60)),
        )
        .await
        .unwrap();

    assert_eq!(receipt.requested, 2);
    assert!(receipt.acked < 2);
    assert!(!receipt.fully_acked());

    let read = h.selector.read("k", ReadPolicy::Primary).await.unwrap();
    assert_eq!(read.version, receipt.version);
    assert_eq!(read.value, Some(b"v".to_vec()));
    assert!(!read.stale);
}

#[tokio::test]
async fn test_none_concern_then_replica_convergence() {
    let h = harness(1, 1, Duration::from_millis(120));

    let receipt = h
        .coordinator
        .write("k", b"v".to_vec(), WritePolicy::none())
        .await
        .unwrap();
    assert_eq!(receipt.requested, 0);
    assert_eq!(receipt.acked, 0);

    // Visible on the primary at once.
    let primary = h.selector.read("k", ReadPolicy::Primary).await.unwrap();
    assert_eq!(primary.version, 1);
    assert!(primary.found());

    // The replica has not applied yet: stale, no value.
    let early = h.selector.read("k", ReadPolicy::AnyReplica).await.unwrap();
    assert!(early.stale);
    assert!(!early.found());
    assert_eq!(early.version, 0);

    // After the lag the same replica read converges.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let late = h.selector.read("k", ReadPolicy::AnyReplica).await.unwrap();
    assert!(!late.stale);
    assert_eq!(late.version, 1);
    assert_eq!(late.value, Some(b"v".to_vec()));
}

#[tokio::test]
async fn test_quorum_request_is_clamped_to_replica_count() {
    let h = harness(1, 2, Duration::from_millis(10));

    let receipt = h
        .coordinator
        .write(
            "k",
            b"v".to_vec(),
            WritePolicy::quorum(99, Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert_eq!(receipt.requested, 2);
    assert_eq!(receipt.acked, 2);
    assert!(receipt.fully_acked());
}

#[tokio::test]
async fn test_unreachable_primary_fails_the_write() {
    let h = chaos_harness(2, 1, Duration::from_millis(10));

    // Take down the primary the key routes to.
    let assignment = h.router.route("k").unwrap();
    h.chaos.fail_endpoint(assignment.primary.id).await;

    let err = h
        .coordinator
        .write("k", b"v".to_vec(), WritePolicy::none())
        .await
        .unwrap_err();
    match err {
        AccessError::PrimaryUnreachable { key, endpoint, .. } => {
            assert_eq!(key, "k");
            assert_eq!(endpoint, assignment.primary.id);
        }
        other => panic!("unexpected error: {other}"),
    }

    // No hidden retry happened: after recovery the next write succeeds,
    // and the failed attempt left a gap in the version sequence.
    h.chaos.recover_endpoint(assignment.primary.id).await;
    let receipt = h
        .coordinator
        .write("k", b"v".to_vec(), WritePolicy::none())
        .await
        .unwrap();
    assert_eq!(receipt.version, 2);
    assert_eq!(
        h.cluster.version_at(assignment.primary.id, "k").await,
        Some(2)
    );
}

#[tokio::test]
async fn test_lost_acks_surface_as_shortfall_while_data_lands() {
    // Replication is instant here; only the acknowledgments go missing.
    let h = chaos_harness(1, 2, Duration::ZERO);
    let assignment = h.router.route("k").unwrap();
    for replica in &assignment.replicas {
        h.chaos.mute_acks(replica.id).await;
    }

    let receipt = h
        .coordinator
        .write(
            "k",
            b"v".to_vec(),
            WritePolicy::quorum(2, Duration::from_millis(80)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.requested, 2);
    assert_eq!(receipt.acked, 0);
    assert!(!receipt.fully_acked());

    // The replicas applied the write even though no ack came back.
    for replica in &assignment.replicas {
        assert_eq!(
            h.cluster.version_at(replica.id, "k").await,
            Some(receipt.version)
        );
    }

    // With acks flowing again the same concern is satisfied in full.
    for replica in &assignment.replicas {
        h.chaos.restore_acks(replica.id).await;
    }
    let receipt = h
        .coordinator
        .write(
            "k",
            b"v2".to_vec(),
            WritePolicy::quorum(2, Duration::from_secs(1)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.acked, 2);
    assert!(receipt.fully_acked());
}

#[tokio::test]
async fn test_degraded_path_shapes_latency_and_failures() {
    let h = chaos_harness(1, 1, Duration::ZERO);
    h.chaos
        .set_added_latency(Duration::from_millis(20), Duration::from_millis(5))
        .await;

    let policy = WritePolicy::quorum(1, Duration::from_secs(1));
    h.coordinator
        .write("k", b"v1".to_vec(), policy)
        .await
        .unwrap();

    h.chaos.set_drop_rate(1.0).await;
    let err = h
        .coordinator
        .write("k", b"v2".to_vec(), policy)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::PrimaryUnreachable { .. }));

    h.chaos.set_drop_rate(0.0).await;
    h.coordinator
        .write("k", b"v3".to_vec(), policy)
        .await
        .unwrap();

    // Three calls, three samples: the injected floor shows up in the
    // minimum and the dropped call in the success rate.
    let summary = h.latency.summary("write.quorum-1").unwrap();
    assert_eq!(summary.count, 3);
    assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!(summary.min >= Duration::from_millis(20));
}

#[tokio::test]
async fn test_direct_replica_write_is_rejected() {
    let h = harness(1, 1, Duration::ZERO);
    let replica = h.cluster.snapshot().shards()[0].replicas[0].clone();

    let err = h
        .cluster
        .send_write(
            &replica,
            &vernier_common::Record::new("k", b"v".to_vec(), 1),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        vernier_kv::driver::DriverError::Rejected(..)
    ));
}

#[tokio::test]
async fn test_every_write_call_leaves_one_sample() {
    let h = harness(1, 1, Duration::from_millis(5));

    for i in 0..4 {
        h.coordinator
            .write(
                "k",
                format!("v{}", i).into_bytes(),
                WritePolicy::quorum(1, Duration::from_secs(1)),
            )
            .await
            .unwrap();
    }

    assert_eq!(h.latency.sample_count("write.quorum-1"), 4);
    let summary = h.latency.summary("write.quorum-1").unwrap();
    assert_eq!(summary.count, 4);
    assert_eq!(summary.success_rate, 1.0);
    assert!(summary.min <= summary.mean);
    assert!(summary.p95 <= summary.max);
}
