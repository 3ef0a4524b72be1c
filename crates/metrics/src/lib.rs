//! Metrics and tracing setup for vernier.
//!
//! Provides a global [`AccessMetrics`] singleton backed by the `prometheus`
//! crate, plus the sample-exact [`latency`] aggregator used for per-policy
//! latency summaries.

pub mod latency;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<AccessMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static AccessMetrics {
    METRICS.get_or_init(AccessMetrics::new)
}

/// All Prometheus metrics for the access layer.
pub struct AccessMetrics {
    pub registry: Registry,

    // ── Operation counters, by policy tag ──
    pub writes_total: IntCounterVec,
    pub writes_failed_total: IntCounterVec,
    pub reads_total: IntCounterVec,
    pub reads_failed_total: IntCounterVec,

    // ── Consistency signals ──
    pub ack_shortfalls_total: IntCounter,
    pub stale_reads_total: IntCounter,
    pub causal_violations_total: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for AccessMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessMetrics").finish_non_exhaustive()
    }
}

impl AccessMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let writes_total = IntCounterVec::new(
            Opts::new("vernier_writes_total", "Writes issued, by write policy"),
            &["policy"],
        )
        .expect("writes_total counter vec");
        let writes_failed_total = IntCounterVec::new(
            Opts::new(
                "vernier_writes_failed_total",
                "Writes that failed at the primary, by write policy",
            ),
            &["policy"],
        )
        .expect("writes_failed_total counter vec");

        let reads_total = IntCounterVec::new(
            Opts::new("vernier_reads_total", "Reads issued, by read policy"),
            &["policy"],
        )
        .expect("reads_total counter vec");
        let reads_failed_total = IntCounterVec::new(
            Opts::new(
                "vernier_reads_failed_total",
                "Reads that failed on every eligible endpoint, by read policy",
            ),
            &["policy"],
        )
        .expect("reads_failed_total counter vec");

        let ack_shortfalls_total = IntCounter::with_opts(Opts::new(
            "vernier_ack_shortfalls_total",
            "Writes that returned with fewer replica acks than requested",
        ))
        .expect("ack_shortfalls counter");
        let stale_reads_total = IntCounter::with_opts(Opts::new(
            "vernier_stale_reads_total",
            "Replica reads that returned an older version than the tracker knows",
        ))
        .expect("stale_reads counter");
        let causal_violations_total = IntCounter::with_opts(Opts::new(
            "vernier_causal_violations_total",
            "Causal-context assertions that failed",
        ))
        .expect("causal_violations counter");

        // Register all metrics
        registry
            .register(Box::new(writes_total.clone()))
            .expect("register writes_total");
        registry
            .register(Box::new(writes_failed_total.clone()))
            .expect("register writes_failed_total");
        registry
            .register(Box::new(reads_total.clone()))
            .expect("register reads_total");
        registry
            .register(Box::new(reads_failed_total.clone()))
            .expect("register reads_failed_total");
        registry
            .register(Box::new(ack_shortfalls_total.clone()))
            .expect("register ack_shortfalls_total");
        registry
            .register(Box::new(stale_reads_total.clone()))
            .expect("register stale_reads_total");
        registry
            .register(Box::new(causal_violations_total.clone()))
            .expect("register causal_violations_total");

        Self {
            registry,
            writes_total,
            writes_failed_total,
            reads_total,
            reads_failed_total,
            ack_shortfalls_total,
            stale_reads_total,
            causal_violations_total,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
///
/// There is no HTTP listener here; embedding applications expose this
/// however they already serve operational endpoints.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

// ────────────────────────── Tests ──────────────────────────
