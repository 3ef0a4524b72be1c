//! Per-operation consistency policies.

use std::fmt;
use std::time::Duration;

/// How many replica acknowledgments a write waits for after the primary
/// has accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    /// Return as soon as the primary accepts; replication is not awaited.
    None,
    /// Wait for `n` replica acks, clamped to the shard's replica count.
    Quorum(usize),
    /// Wait for every replica in the assignment.
    All,
}

impl WriteConcern {
    /// Parse a config-file concern name. `required_acks` feeds the quorum
    /// size and is ignored for the other levels.
    pub fn parse(name: &str, required_acks: usize) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "quorum" => Some(Self::Quorum(required_acks)),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Write-side policy: concern level plus the replica-ack deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub concern: WriteConcern,
    /// Bound on the replica-ack wait. Unused by [`WriteConcern::None`].
    pub timeout: Duration,
}

impl WritePolicy {
    pub fn none() -> Self {
        Self {
            concern: WriteConcern::None,
            timeout: Duration::ZERO,
        }
    }

    pub fn quorum(required_acks: usize, timeout: Duration) -> Self {
        Self {
            concern: WriteConcern::Quorum(required_acks),
            timeout,
        }
    }

    pub fn all(timeout: Duration) -> Self {
        Self {
            concern: WriteConcern::All,
            timeout,
        }
    }

    /// Latency-tag fragment for this policy, e.g. `write.quorum-2`.
    pub fn tag(&self) -> String {
        match self.concern {
            WriteConcern::None => "write.none".to_string(),
            WriteConcern::Quorum(n) => format!("write.quorum-{}", n),
            WriteConcern::All => "write.all".to_string(),
        }
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.concern {
            WriteConcern::None => write!(f, "none"),
            WriteConcern::Quorum(n) => {
                write!(f, "quorum({}, {}ms)", n, self.timeout.as_millis())
            }
            WriteConcern::All => write!(f, "all({}ms)", self.timeout.as_millis()),
        }
    }
}

/// Which endpoint a read targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// The shard primary; sees the most recently accepted write.
    Primary,
    /// The first healthy replica in assignment order; may lag the primary.
    AnyReplica,
}

impl ReadPolicy {
    /// Latency-tag fragment for this policy.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Primary => "read.primary",
            Self::AnyReplica => "read.replica",
        }
    }
}

impl fmt::Display for ReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::AnyReplica => write!(f, "any-replica"),
        }
    }
}
