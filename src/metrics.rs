//! Prometheus metrics for the cache tiers
//!
//! Process-wide counters shared by every cache instance:
//! - Resident map hits, misses and spills
//! - Store reads and writes
//! - Chunks held by all allocators, bytes resident in all LRU maps

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref CACHE_HITS: IntCounterVec = IntCounterVec::new(
        Opts::new("tiercache_hits_total", "Lookups served from resident memory"),
        &["map"]
    ).unwrap();

    pub static ref CACHE_MISSES: IntCounterVec = IntCounterVec::new(
        Opts::new("tiercache_misses_total", "Lookups sent to the persistent store"),
        &["map"]
    ).unwrap();

    pub static ref SPILLS_TOTAL: IntCounter = IntCounter::new(
        "tiercache_spills_total",
        "Resident entries moved to the persistent store"
    ).unwrap();

    pub static ref STORE_WRITES: IntCounter = IntCounter::new(
        "tiercache_store_writes_total",
        "Records written to the persistent store"
    ).unwrap();

    pub static ref STORE_READS: IntCounter = IntCounter::new(
        "tiercache_store_reads_total",
        "Records read from the persistent store"
    ).unwrap();

    pub static ref CHUNKS_HELD: IntGauge = IntGauge::new(
        "tiercache_chunks",
        "Chunks currently held by chunk allocators"
    ).unwrap();

    pub static ref RESIDENT_BYTES: IntGauge = IntGauge::new(
        "tiercache_resident_bytes",
        "Encoded bytes resident in LRU maps"
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(CACHE_HITS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CACHE_MISSES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(SPILLS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(STORE_WRITES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(STORE_READS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CHUNKS_HELD.clone())).ok();
    METRICS_REGISTRY.register(Box::new(RESIDENT_BYTES.clone())).ok();
}

/// Render the registry in the Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_registered_metrics() {
        init_metrics();
        SPILLS_TOTAL.inc();
        CACHE_HITS.with_label_values(&["lru"]).inc();

        let text = export_metrics();
        assert!(text.contains("tiercache_spills_total"));
        assert!(text.contains("tiercache_hits_total"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(!export_metrics().starts_with("# Error"));
    }
}
