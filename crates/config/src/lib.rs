//! Configuration schema and loader for the vernier demo cluster.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the demo binary and the simulated cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VernierConfig {
    /// Cluster shape (shards, replicas, ports).
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Simulated store behaviour.
    #[serde(default)]
    pub sim: SimConfig,

    /// Workload driven by the demo binary.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of shards (primaries).
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Replicas attached to each shard.
    #[serde(default = "default_replicas_per_shard")]
    pub replicas_per_shard: usize,

    /// First port; primaries take `base_port..`, replicas follow.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            replicas_per_shard: default_replicas_per_shard(),
            base_port: default_base_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Delay before a primary-accepted write becomes visible on a replica.
    #[serde(default = "default_replication_lag_ms")]
    pub replication_lag_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            replication_lag_ms: default_replication_lag_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Writes issued per write-concern level.
    #[serde(default = "default_operations")]
    pub operations: usize,

    /// Concurrent writer tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Write concern: "none", "quorum", "all".
    #[serde(default = "default_write_concern")]
    pub write_concern: String,

    /// Replica acks required when `write_concern` is "quorum".
    #[serde(default = "default_required_acks")]
    pub required_acks: usize,

    /// Replica-ack wait deadline in milliseconds.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            operations: default_operations(),
            concurrency: default_concurrency(),
            write_concern: default_write_concern(),
            required_acks: default_required_acks(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

// --- Defaults ---

fn default_shards() -> usize {
    3
}
fn default_replicas_per_shard() -> usize {
    1
}
fn default_base_port() -> u16 {
    7001
}
fn default_replication_lag_ms() -> u64 {
    40
}
fn default_operations() -> usize {
    50
}
fn default_concurrency() -> usize {
    5
}
fn default_write_concern() -> String {
    "quorum".to_string()
}
fn default_required_acks() -> usize {
    1
}
fn default_write_timeout_ms() -> u64 {
    1000
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

const WRITE_CONCERNS: &[&str] = &["none", "quorum", "all"];

impl VernierConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.shards == 0 {
            return Err(ConfigError::Invalid("cluster.shards must be > 0".into()));
        }
        if self.workload.operations == 0 {
            return Err(ConfigError::Invalid("workload.operations must be > 0".into()));
        }
        if self.workload.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "workload.concurrency must be > 0".into(),
            ));
        }
        if !WRITE_CONCERNS.contains(&self.workload.write_concern.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "workload.write_concern must be one of {:?}, got {:?}",
                WRITE_CONCERNS, self.workload.write_concern
            )));
        }
        if self.workload.write_concern == "quorum" && self.workload.required_acks == 0 {
            return Err(ConfigError::Invalid(
                "workload.required_acks must be > 0 with quorum write concern".into(),
            ));
        }
        if self.workload.required_acks > self.cluster.replicas_per_shard {
            return Err(ConfigError::Invalid(format!(
                "workload.required_acks ({}) must be <= cluster.replicas_per_shard ({})",
                self.workload.required_acks, self.cluster.replicas_per_shard
            )));
        }
        Ok(())
    }
}

/// Load a `VernierConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<VernierConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: VernierConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Load a `VernierConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<VernierConfig, ConfigError> {
    let config: VernierConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
