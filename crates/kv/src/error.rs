//! Error taxonomy for the access layer.
//!
//! Only outcomes the caller cannot act on as data are errors here. A
//! replica-ack shortfall comes back as a successful write receipt with
//! `acked < requested`, and a missing key as a read result without a
//! value; neither appears in this enum.

use vernier_common::EndpointId;

use crate::driver::DriverError;
use crate::routing::RoutingError;

/// Fatal outcomes of access-layer operations. Every variant names the
/// key and the policy in effect when the operation failed.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("cannot route key {key:?} (policy {policy}): {source}")]
    Unroutable {
        key: String,
        policy: String,
        #[source]
        source: RoutingError,
    },

    #[error("primary {endpoint} unreachable for key {key:?} (policy {policy}): {source}")]
    PrimaryUnreachable {
        key: String,
        policy: String,
        endpoint: EndpointId,
        #[source]
        source: DriverError,
    },

    #[error("write of key {key:?} rejected by primary {endpoint} (policy {policy}): {source}")]
    WriteRejected {
        key: String,
        policy: String,
        endpoint: EndpointId,
        #[source]
        source: DriverError,
    },

    #[error("read of key {key:?} failed on every eligible endpoint (policy {policy}): {source}")]
    ReadUnavailable {
        key: String,
        policy: String,
        #[source]
        source: DriverError,
    },

    #[error("causal violation on key {key:?}: observed version {observed} is ahead of current {current}")]
    CausalViolation {
        key: String,
        observed: u64,
        current: u64,
    },
}

impl AccessError {
    /// The key the failed operation targeted.
    pub fn key(&self) -> &str {
        match self {
            Self::Unroutable { key, .. }
            | Self::PrimaryUnreachable { key, .. }
            | Self::WriteRejected { key, .. }
            | Self::ReadUnavailable { key, .. }
            | Self::CausalViolation { key, .. } => key,
        }
    }
}
