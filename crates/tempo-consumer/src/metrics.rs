//! Consumer observability handle: lag, per-tenant open bytes, cut latency,
//! and orphan-cleanup failures. Not named in spec.md §4.2 directly, but
//! spec.md §5 "Backpressure" and §7's orphan failure counter both describe
//! signals a running consumer must expose; this is the typed handle that
//! carries them (spec.md §9 "Global state -> typed handle").

use std::time::Duration;

use tempo_proto::TenantId;

/// A cheaply-cloned handle around the process-global `metrics` registry,
/// the same pattern the teacher stack uses for its own counters — no
/// per-component registry, just consistently-named instruments.
#[derive(Clone, Default)]
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    pub fn new() -> Self {
        ConsumerMetrics
    }

    pub fn record_append(&self, partition: u32, batch_bytes: u64) {
        metrics::counter!("tempo_consumer_spans_appended_total", "partition" => partition.to_string())
            .increment(1);
        metrics::counter!("tempo_consumer_bytes_appended_total", "partition" => partition.to_string())
            .increment(batch_bytes);
    }

    pub fn set_lag(&self, partition: u32, lag: u64) {
        metrics::gauge!("tempo_consumer_lag_records", "partition" => partition.to_string())
            .set(lag as f64);
    }

    pub fn set_tenant_open_bytes(&self, tenant: &TenantId, bytes: u64) {
        metrics::gauge!("tempo_consumer_tenant_open_bytes", "tenant" => tenant.as_str().to_string())
            .set(bytes as f64);
    }

    pub fn record_cut(&self, tenant: &TenantId, span_count: u64, latency: Duration) {
        metrics::counter!("tempo_consumer_cuts_total", "tenant" => tenant.as_str().to_string())
            .increment(1);
        metrics::counter!("tempo_consumer_cut_spans_total", "tenant" => tenant.as_str().to_string())
            .increment(span_count);
        metrics::histogram!("tempo_consumer_cut_latency_seconds", "tenant" => tenant.as_str().to_string())
            .record(latency.as_secs_f64());
    }

    pub fn record_orphan_cleanup_failure(&self, tenant: &TenantId) {
        metrics::counter!("tempo_consumer_orphan_cleanup_failures_total", "tenant" => tenant.as_str().to_string())
            .increment(1);
    }
}
