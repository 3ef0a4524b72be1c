//! vernier: drives a profile workload against a simulated replica
//! cluster and reports per-policy latency.
//!
//! Loads config, builds the in-process cluster, walks one profile
//! through its lifecycle, then runs the concurrent workload at each
//! write concern and prints the per-policy latency summaries.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use vernier_kv::policy::{ReadPolicy, WriteConcern, WritePolicy};
use vernier_kv::repository::Repository;
use vernier_sim::workload::run_concurrent;
use vernier_sim::SimCluster;

/// Payload stored under each profile id.
#[derive(Debug, Serialize, Deserialize)]
struct UserProfile {
    user_id: String,
    username: String,
    email: String,
    last_login_ms: u64,
}

impl UserProfile {
    fn sample(id: &str) -> Self {
        Self {
            user_id: id.to_string(),
            username: format!("user-{}", id),
            email: format!("{}@example.com", id),
            last_login_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    vernier_metrics::init_tracing();

    // Load config: first CLI arg is the YAML config path
    let config = match std::env::args().nth(1) {
        Some(path) => vernier_config::load_from_file(std::path::Path::new(&path))
            .unwrap_or_else(|e| {
                tracing::warn!("failed to load config from {}: {}, using defaults", path, e);
                vernier_config::VernierConfig::default()
            }),
        None => vernier_config::VernierConfig::default(),
    };

    tracing::info!(
        "cluster: {} shard(s) x {} replica(s), replication lag {}ms",
        config.cluster.shards,
        config.cluster.replicas_per_shard,
        config.sim.replication_lag_ms
    );

    let cluster = Arc::new(SimCluster::from_config(&config)?);
    let repo = Arc::new(Repository::new(
        cluster.clone(),
        cluster.clone(),
        "user:profile",
    ));

    let timeout = Duration::from_millis(config.workload.write_timeout_ms);
    let concern = WriteConcern::parse(
        &config.workload.write_concern,
        config.workload.required_acks,
    )
    .ok_or_else(|| format!("unknown write concern {:?}", config.workload.write_concern))?;
    let policy = WritePolicy { concern, timeout };
    tracing::info!("configured write policy: {}", policy);

    // Walk one profile through its lifecycle before the workload.
    let alice = serde_json::to_vec(&UserProfile::sample("alice"))?;
    let created = repo.create("alice", &alice, policy).await?;
    tracing::info!(
        "created {} at version {} ({}/{} replica ack(s))",
        repo.storage_key("alice"),
        created.version,
        created.acked,
        created.requested
    );

    let fetched = repo.get("alice", ReadPolicy::Primary).await?;
    if let Some(bytes) = &fetched.value {
        let profile: UserProfile = serde_json::from_slice(bytes)?;
        tracing::info!("fetched {} at version {}", profile.username, fetched.version);
    }

    let mut refreshed = UserProfile::sample("alice");
    refreshed.email = "alice@corp.example".to_string();
    let updated = repo
        .update("alice", &serde_json::to_vec(&refreshed)?, policy)
        .await?;
    tracing::info!("updated to version {}", updated.version);

    repo.delete("alice", policy).await?;
    tracing::info!(
        "deleted; exists = {}",
        repo.exists("alice", ReadPolicy::Primary).await?
    );

    // Concurrent write workload, one round per concern level so the
    // latency report compares them over the same id set.
    let workers = config.workload.concurrency;
    let ops_per_worker = config.workload.operations.div_ceil(workers);
    let levels = [
        WritePolicy::none(),
        WritePolicy::quorum(config.workload.required_acks, timeout),
        WritePolicy::all(timeout),
    ];

    for level in levels {
        tracing::info!(
            "write workload: {} worker(s) x {} op(s) at {}",
            workers,
            ops_per_worker,
            level
        );

        let writer = repo.clone();
        let receipts = run_concurrent(workers, ops_per_worker, move |worker, op| {
            let repo = writer.clone();
            async move {
                let id = format!("user-{}", worker * ops_per_worker + op);
                let bytes =
                    serde_json::to_vec(&UserProfile::sample(&id)).expect("profile serializes");
                repo.create(&id, &bytes, level).await
            }
        })
        .await;

        let ok = receipts.iter().filter(|r| r.is_ok()).count();
        let shortfalls = receipts
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter(|r| !r.fully_acked())
            .count();
        tracing::info!(
            "writes: {} ok, {} failed, {} ack shortfall(s)",
            ok,
            receipts.len() - ok,
            shortfalls
        );
    }

    // Read pass: primary plus replica for every id written above.
    let reader = repo.clone();
    let reads = run_concurrent(workers, ops_per_worker, move |worker, op| {
        let repo = reader.clone();
        async move {
            let id = format!("user-{}", worker * ops_per_worker + op);
            let primary = repo.get(&id, ReadPolicy::Primary).await;
            let replica = repo.get(&id, ReadPolicy::AnyReplica).await;
            (primary, replica)
        }
    })
    .await;

    let stale = reads
        .iter()
        .filter(|(_, replica)| matches!(replica, Ok(r) if r.stale))
        .count();
    tracing::info!(
        "reads: {} id(s), {} stale replica read(s)",
        reads.len(),
        stale
    );

    // Latency report, one line per policy tag.
    for tag in repo.latency_tags() {
        if let Some(s) = repo.latency_summary(&tag) {
            tracing::info!(
                "{}: n={} ok={:.0}% mean={:?} p95={:?} p99={:?} max={:?}",
                tag,
                s.count,
                s.success_rate * 100.0,
                s.mean,
                s.p95,
                s.p99,
                s.max
            );
        }
    }

    tracing::debug!("metrics:\n{}", vernier_metrics::encode_metrics());
    Ok(())
}
