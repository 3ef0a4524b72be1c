//! Sample-exact latency aggregation.
//!
//! Unlike the Prometheus histograms (bucketed, pre-aggregated), this module
//! keeps every raw sample and computes exact percentiles at query time by
//! sorting a snapshot copy. That is what makes write-concern comparisons
//! meaningful at small sample counts, where bucket boundaries would swallow
//! the differences.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// A single operation latency sample. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySample {
    /// Bucket tag, by convention `<scope>.<op>.<policy>`.
    pub tag: String,
    pub duration: Duration,
    pub success: bool,
    /// Wall-clock millis at record time.
    pub recorded_at_ms: u64,
}

impl LatencySample {
    pub fn new(tag: impl Into<String>, duration: Duration, success: bool) -> Self {
        Self {
            tag: tag.into(),
            duration,
            success,
            recorded_at_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Aggregate view over one tag's samples.
///
/// Duration stats cover every sample recorded for the tag, failures
/// included; `success_rate` reports the success fraction separately.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub success_rate: f64,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    fn from_samples(samples: &[LatencySample]) -> Self {
        let count = samples.len();
        let successes = samples.iter().filter(|s| s.success).count();

        let mut sorted: Vec<Duration> = samples.iter().map(|s| s.duration).collect();
        sorted.sort_unstable();

        let total: Duration = sorted.iter().sum();

        Self {
            count,
            success_rate: successes as f64 / count as f64,
            min: sorted[0],
            max: sorted[count - 1],
            mean: total / count as u32,
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

/// Exact percentile over an ascending-sorted sample set: the value at index
/// `ceil(p/100 * n) - 1`, clamped to `[0, n-1]`.
///
/// Panics if `sorted` is empty.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    assert!(!sorted.is_empty(), "percentile of empty sample set");
    let idx = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

/// Append-only per-tag sample buffers with query-time summaries.
///
/// Samples are only ever appended, never removed or reordered in place;
/// queries sort a snapshot copy. Buffers grow without bound, which is the
/// point for comparison runs and acceptable at lab scale.
#[derive(Debug, Default)]
pub struct LatencyAggregator {
    buffers: Mutex<HashMap<String, Vec<LatencySample>>>,
}

impl LatencyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample to its tag's buffer.
    pub fn record(&self, sample: LatencySample) {
        let mut buffers = self.buffers.lock();
        buffers.entry(sample.tag.clone()).or_default().push(sample);
    }

    /// Summarize one tag. `None` if the tag has never been recorded.
    pub fn summary(&self, tag: &str) -> Option<LatencySummary> {
        let samples = self.buffers.lock().get(tag).cloned()?;
        Some(LatencySummary::from_samples(&samples))
    }

    /// All tags seen so far, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.buffers.lock().keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn sample_count(&self, tag: &str) -> usize {
        self.buffers.lock().get(tag).map_or(0, Vec::len)
    }
}
