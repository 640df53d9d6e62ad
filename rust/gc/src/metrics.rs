use opentelemetry::metrics::{Counter, Gauge, Histogram};

#[derive(Debug, Clone)]
pub(crate) struct GcManagerMetrics {
    pub(crate) push_attempts: Counter<u64>,
    pub(crate) push_skipped: Counter<u64>,
    pub(crate) push_failures: Counter<u64>,
    pub(crate) fatal_push_failures: Counter<u64>,
    pub(crate) push_duration_ms: Histogram<u64>,
    pub(crate) effective_safepoint: Gauge<u64>,
}

impl GcManagerMetrics {
    pub(crate) fn new() -> Self {
        let meter = opentelemetry::global::meter("cdc");
        Self {
            push_attempts: meter
                .u64_counter("gc_manager.push_attempts")
                .with_description("Service safepoint updates sent upstream")
                .build(),
            push_skipped: meter
                .u64_counter("gc_manager.push_skipped")
                .with_description("Safepoint updates suppressed by the update interval")
                .build(),
            push_failures: meter
                .u64_counter("gc_manager.push_failures")
                .with_description("Safepoint updates that failed after retries")
                .build(),
            fatal_push_failures: meter
                .u64_counter("gc_manager.fatal_push_failures")
                .with_description("Safepoint update failures past the gc ttl grace window")
                .build(),
            push_duration_ms: meter
                .u64_histogram("gc_manager.push_duration_ms")
                .with_description("Duration of safepoint updates including retries")
                .with_unit("ms")
                .build(),
            effective_safepoint: meter
                .u64_gauge("gc_manager.effective_safepoint")
                .with_description("Last cluster-wide safepoint confirmed by the upstream")
                .build(),
        }
    }
}
