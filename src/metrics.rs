//! In-process counters for the oracle, surfaced through `/status`.
//!
//! All counters are backed by atomics for lock-free concurrent access.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated metrics for the randomness oracle.
///
/// Thread-safe via atomics; shared as `Arc<Metrics>`.
pub struct Metrics {
    /// Total number of unique randomness requests dispatched.
    pub requests_received: AtomicU64,
    /// Total number of requests successfully fulfilled on-chain.
    pub requests_fulfilled: AtomicU64,
    /// Total number of fulfillments that failed permanently.
    pub requests_failed: AtomicU64,
    /// Sum of fulfillment latencies in milliseconds (for computing average).
    pub fulfillment_latency_sum_ms: AtomicU64,
    /// Number of fulfilled requests contributing to the latency sum.
    pub fulfillment_count: AtomicU64,
    /// Total number of completed key rotations.
    pub key_rotations: AtomicU64,
}

impl Metrics {
    /// Create a new zeroed metrics instance.
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            requests_fulfilled: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            fulfillment_latency_sum_ms: AtomicU64::new(0),
            fulfillment_count: AtomicU64::new(0),
            key_rotations: AtomicU64::new(0),
        }
    }

    /// Record a new unique request dispatched to the pipeline.
    pub fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful fulfillment with its latency.
    pub fn record_fulfillment(&self, latency_ms: u64) {
        self.requests_fulfilled.fetch_add(1, Ordering::Relaxed);
        self.fulfillment_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.fulfillment_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a permanently failed fulfillment.
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed key rotation.
    pub fn record_rotation(&self) {
        self.key_rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Compute average fulfillment latency in milliseconds, or 0 if none.
    pub fn avg_latency_ms(&self) -> u64 {
        let count = self.fulfillment_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.fulfillment_latency_sum_ms.load(Ordering::Relaxed) / count
    }

    /// Serialize metrics as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests_received": self.requests_received.load(Ordering::Relaxed),
            "requests_fulfilled": self.requests_fulfilled.load(Ordering::Relaxed),
            "requests_failed": self.requests_failed.load(Ordering::Relaxed),
            "avg_fulfillment_latency_ms": self.avg_latency_ms(),
            "key_rotations": self.key_rotations.load(Ordering::Relaxed),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_latency_handles_empty_and_populated_counters() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_latency_ms(), 0);

        metrics.record_fulfillment(100);
        metrics.record_fulfillment(300);
        assert_eq!(metrics.avg_latency_ms(), 200);
    }
}
