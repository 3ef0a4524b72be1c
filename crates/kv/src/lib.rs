//! Tunable-consistency access layer over a sharded, replicated KV store.
//!
//! Provides: slot-based shard routing, per-key version tracking with
//! causal assertions, a write coordinator with per-call write concern,
//! a read selector with staleness exposure, and a keyspace repository
//! facade on top.

pub mod chaos;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod policy;
pub mod reader;
pub mod repository;
pub mod routing;
pub mod version;
