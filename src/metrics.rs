//! Metrics and observability for manual_frames

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Global metrics collector
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Extraction pipeline
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub coalesced_requests: AtomicU64,
    pub tool_invocations: AtomicU64,
    pub tool_failures: AtomicU64,

    // Per-operation counters
    pub uploads: AtomicU64,
    pub frame_requests: AtomicU64,
    pub candidate_requests: AtomicU64,
    pub step_edits: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        match op {
            "manual.create" | "manual.attach_video" => self.uploads.fetch_add(1, Ordering::Relaxed),
            "frame.generate" => self.frame_requests.fetch_add(1, Ordering::Relaxed),
            "frame.candidates" | "step.candidates" => self.candidate_requests.fetch_add(1, Ordering::Relaxed),
            op if op.starts_with("step.") => self.step_edits.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_invocation(&self, success: bool) {
        self.tool_invocations.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            cache: CacheMetrics {
                hits: self.cache_hits.load(Ordering::Relaxed),
                misses: self.cache_misses.load(Ordering::Relaxed),
                coalesced: self.coalesced_requests.load(Ordering::Relaxed),
                tool_invocations: self.tool_invocations.load(Ordering::Relaxed),
                tool_failures: self.tool_failures.load(Ordering::Relaxed),
            },
            operations: OperationMetrics {
                uploads: self.uploads.load(Ordering::Relaxed),
                frame_requests: self.frame_requests.load(Ordering::Relaxed),
                candidate_requests: self.candidate_requests.load(Ordering::Relaxed),
                step_edits: self.step_edits.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub cache: CacheMetrics,
    pub operations: OperationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub tool_invocations: u64,
    pub tool_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub uploads: u64,
    pub frame_requests: u64,
    pub candidate_requests: u64,
    pub step_edits: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_counters() {
        let metrics = Metrics::new();
        metrics.record_request("frame.generate", true, 10);
        metrics.record_request("step.shift", false, 30);
        metrics.record_request("metrics", true, 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.avg_latency_ms, 14);
        assert_eq!(snapshot.operations.frame_requests, 1);
        assert_eq!(snapshot.operations.step_edits, 1);
    }

    #[test]
    fn test_tool_invocations() {
        let metrics = Metrics::new();
        metrics.record_tool_invocation(true);
        metrics.record_tool_invocation(false);
        let cache = metrics.snapshot().cache;
        assert_eq!(cache.tool_invocations, 2);
        assert_eq!(cache.tool_failures, 1);
    }
}
