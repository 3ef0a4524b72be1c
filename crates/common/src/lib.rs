//! vernier-common: shared types for the vernier access layer.
//!
//! Provides endpoint identity, the 16384-slot keyspace math, cluster
//! topology snapshots, and the versioned record exchanged with the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Number of hash slots the keyspace is divided into.
pub const SLOT_COUNT: u16 = 16384;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Identifier for a single store endpoint (one primary or replica process).
///
/// Assigned by whoever builds the topology snapshot; stable for the
/// lifetime of that snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// A store endpoint: stable id plus socket address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub addr: SocketAddr,
}

impl Endpoint {
    pub fn new(id: u64, addr: SocketAddr) -> Self {
        Self {
            id: EndpointId(id),
            addr,
        }
    }

    /// Convenience for tests and local simulation: loopback on `port`.
    pub fn on_loopback(id: u64, port: u16) -> Self {
        Self::new(id, SocketAddr::from(([127, 0, 0, 1], port)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Identifier for a shard (a contiguous block of hash slots).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Slot math
// ---------------------------------------------------------------------------

/// Map a key to its hash slot.
///
/// CRC32 of the key bytes, reduced mod [`SLOT_COUNT`]. Stable across
/// processes and releases; routing only works if every client agrees on
/// this function.
pub fn key_slot(key: &str) -> u16 {
    (crc32fast::hash(key.as_bytes()) % SLOT_COUNT as u32) as u16
}

/// An inclusive range of hash slots owned by one shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        assert!(start <= end, "slot range start must be <= end");
        Self { start, end }
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }

    /// Number of slots in the range (at least 1).
    pub fn slot_count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("topology must contain at least one shard")]
    NoShards,
}

/// One shard of the cluster: its slot range, the primary that accepts
/// writes, and the ordered list of replicas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTopology {
    pub id: ShardId,
    pub slots: SlotRange,
    pub primary: Endpoint,
    pub replicas: Vec<Endpoint>,
}

/// An immutable snapshot of cluster topology.
///
/// Built by whoever owns cluster membership (config, a discovery sidecar,
/// a test) and shared read-only. The access layer re-reads the current
/// snapshot on every routed call and never mutates one, so swapping in a
/// fresh snapshot takes effect on the next operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    shards: Vec<ShardTopology>,
}

impl TopologySnapshot {
    /// Spread the slot space across the given (primary, replicas) seats in
    /// contiguous blocks. Remainder slots go to the lowest-numbered shards,
    /// so 3 shards split 16384 as 5462/5461/5461.
    pub fn balanced(seats: Vec<(Endpoint, Vec<Endpoint>)>) -> Result<Self, TopologyError> {
        if seats.is_empty() {
            return Err(TopologyError::NoShards);
        }

        let n = seats.len();
        let base = SLOT_COUNT as usize / n;
        let rem = SLOT_COUNT as usize % n;

        let mut shards = Vec::with_capacity(n);
        let mut start = 0usize;
        for (i, (primary, replicas)) in seats.into_iter().enumerate() {
            let size = base + usize::from(i < rem);
            let end = start + size - 1;
            shards.push(ShardTopology {
                id: ShardId(i as u32),
                slots: SlotRange::new(start as u16, end as u16),
                primary,
                replicas,
            });
            start = end + 1;
        }

        Ok(Self { shards })
    }

    /// Build from explicit shard definitions (ranges already assigned).
    ///
    /// No overlap/coverage checking is done here; a slot left uncovered
    /// surfaces as a routing error when a key lands on it.
    pub fn from_shards(shards: Vec<ShardTopology>) -> Result<Self, TopologyError> {
        if shards.is_empty() {
            return Err(TopologyError::NoShards);
        }
        Ok(Self { shards })
    }

    pub fn shards(&self) -> &[ShardTopology] {
        &self.shards
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The shard owning `slot`, if any shard's range covers it.
    pub fn shard_for_slot(&self, slot: u16) -> Option<&ShardTopology> {
        self.shards.iter().find(|s| s.slots.contains(slot))
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A versioned record as exchanged with the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// The key (opaque string).
    pub key: String,
    /// Value bytes (empty if tombstone). Callers serialize structured
    /// payloads before handing them in; this layer never inspects them.
    pub value: Vec<u8>,
    /// Per-key version stamped by the access layer; strictly increasing
    /// across all writes the primary accepts for this key.
    pub version: u64,
    /// Whether this is a delete tombstone.
    pub tombstone: bool,
    /// Wall-clock timestamp (millis since epoch).
    pub last_modified_ms: u64,
}

impl Record {
    /// Create a new live record.
    pub fn new(key: impl Into<String>, value: Vec<u8>, version: u64) -> Self {
        Self {
            key: key.into(),
            value,
            version,
            tombstone: false,
            last_modified_ms: now_ms(),
        }
    }

    /// Create a tombstone record.
    pub fn tombstone(key: impl Into<String>, version: u64) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            version,
            tombstone: true,
            last_modified_ms: now_ms(),
        }
    }

    pub fn is_live(&self) -> bool {
        !self.tombstone
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
