//! Shard routing: key to slot to the owning shard's endpoints.

use std::sync::Arc;

use vernier_common::{key_slot, Endpoint, ShardId, TopologySnapshot};

use crate::driver::TopologySource;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no topology snapshot available")]
    TopologyUnavailable,
    #[error("slot {slot} is not covered by any shard")]
    SlotUncovered { slot: u16 },
}

/// Where one key lives right now: the owning shard's primary and its
/// ordered replicas, cloned out of the snapshot the lookup resolved.
/// Assignments are throwaway values; callers re-route per operation
/// instead of caching them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    pub shard: ShardId,
    pub slot: u16,
    pub primary: Endpoint,
    pub replicas: Vec<Endpoint>,
}

impl ShardAssignment {
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }
}

/// Resolve `key` against an explicit snapshot. Pure: the same key and
/// snapshot always yield the same assignment.
pub fn assign(snapshot: &TopologySnapshot, key: &str) -> Result<ShardAssignment, RoutingError> {
    let slot = key_slot(key);
    let shard = snapshot
        .shard_for_slot(slot)
        .ok_or(RoutingError::SlotUncovered { slot })?;
    Ok(ShardAssignment {
        shard: shard.id,
        slot,
        primary: shard.primary.clone(),
        replicas: shard.replicas.clone(),
    })
}

/// Maps keys onto the current topology snapshot.
///
/// Stateless apart from the snapshot source: every [`ShardRouter::route`]
/// call re-resolves the source, so a swapped snapshot takes effect on the
/// very next operation.
pub struct ShardRouter {
    source: Arc<dyn TopologySource>,
}

impl ShardRouter {
    pub fn new(source: Arc<dyn TopologySource>) -> Self {
        Self { source }
    }

    /// Resolve the shard assignment for `key` against the source's
    /// current snapshot.
    pub fn route(&self, key: &str) -> Result<ShardAssignment, RoutingError> {
        let snapshot = self
            .source
            .current()
            .ok_or(RoutingError::TopologyUnavailable)?;
        assign(&snapshot, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StaticTopology;
    use parking_lot::RwLock;

    fn three_shard_snapshot() -> TopologySnapshot {
        let seats = (0..3u64)
            .map(|i| {
                (
                    Endpoint::on_loopback(i, 7001 + i as u16),
                    vec![Endpoint::on_loopback(10 + i, 7101 + i as u16)],
                )
            })
            .collect();
        TopologySnapshot::balanced(seats).unwrap()
    }

    /// Swappable source used to exercise per-call re-resolution.
    struct SwapTopology(RwLock<Option<Arc<TopologySnapshot>>>);

    impl TopologySource for SwapTopology {
        fn current(&self) -> Option<Arc<TopologySnapshot>> {
            self.0.read().clone()
        }
    }

    #[test]
    fn test_route_is_deterministic() {
        let router = ShardRouter::new(Arc::new(StaticTopology::new(three_shard_snapshot())));
        for key in ["user:profile:alice", "user:profile:bob", "k"] {
            let first = router.route(key).unwrap();
            let second = router.route(key).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_assignment_matches_slot_ownership() {
        let snapshot = three_shard_snapshot();
        for i in 0..200 {
            let key = format!("user:profile:user{:04}", i);
            let assignment = assign(&snapshot, &key).unwrap();
            assert_eq!(assignment.slot, key_slot(&key));
            let owner = snapshot.shard_for_slot(assignment.slot).unwrap();
            assert_eq!(assignment.shard, owner.id);
            assert_eq!(assignment.primary, owner.primary);
            assert_eq!(assignment.replicas, owner.replicas);
        }
    }

    #[test]
    fn test_missing_snapshot_is_unavailable() {
        let router = ShardRouter::new(Arc::new(SwapTopology(RwLock::new(None))));
        assert_eq!(
            router.route("user:profile:alice").unwrap_err(),
            RoutingError::TopologyUnavailable
        );
    }

    #[test]
    fn test_route_picks_up_swapped_snapshot() {
        let source = Arc::new(SwapTopology(RwLock::new(None)));
        let router = ShardRouter::new(source.clone());
        assert!(router.route("user:profile:alice").is_err());

        *source.0.write() = Some(Arc::new(three_shard_snapshot()));
        let before = router.route("user:profile:alice").unwrap();

        // Shrink to a single shard; the next call must see the new layout.
        let single = TopologySnapshot::balanced(vec![(
            Endpoint::on_loopback(99, 9001),
            vec![Endpoint::on_loopback(100, 9002)],
        )])
        .unwrap();
        *source.0.write() = Some(Arc::new(single));
        let after = router.route("user:profile:alice").unwrap();

        assert_eq!(after.primary.id.0, 99);
        assert_ne!(before.primary, after.primary);
    }

    #[test]
    fn test_uncovered_slot_is_reported() {
        // A hand-built topology covering only the low half of the slot space.
        let shard = vernier_common::ShardTopology {
            id: ShardId(0),
            slots: vernier_common::SlotRange::new(0, 8000),
            primary: Endpoint::on_loopback(0, 7001),
            replicas: vec![],
        };
        let snapshot = TopologySnapshot::from_shards(vec![shard]).unwrap();

        let mut saw_uncovered = false;
        for i in 0..500 {
            let key = format!("key{}", i);
            if key_slot(&key) > 8000 {
                saw_uncovered = true;
                assert_eq!(
                    assign(&snapshot, &key).unwrap_err(),
                    RoutingError::SlotUncovered {
                        slot: key_slot(&key)
                    }
                );
            }
        }
        assert!(saw_uncovered);
    }
}
