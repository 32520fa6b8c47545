//! Compactor observability handle: jobs run, spans deduplicated, blocks
//! retired by retention, and per-block cleanup failures — the same
//! typed-handle pattern `tempo_consumer::ConsumerMetrics` uses (spec.md §9
//! "Global state -> typed handle").

use std::time::Duration;

use tempo_proto::TenantId;

#[derive(Clone, Default)]
pub struct CompactorMetrics;

impl CompactorMetrics {
    pub fn new() -> Self {
        CompactorMetrics
    }

    pub fn record_job(&self, tenant: &TenantId, level: u32, input_blocks: usize, span_count: u64, latency: Duration) {
        let tenant = tenant.as_str().to_string();
        metrics::counter!("tempo_compactor_jobs_total", "tenant" => tenant.clone(), "level" => level.to_string())
            .increment(1);
        metrics::counter!("tempo_compactor_input_blocks_total", "tenant" => tenant.clone())
            .increment(input_blocks as u64);
        metrics::counter!("tempo_compactor_output_spans_total", "tenant" => tenant.clone())
            .increment(span_count);
        metrics::histogram!("tempo_compactor_job_latency_seconds", "tenant" => tenant)
            .record(latency.as_secs_f64());
    }

    pub fn record_retention_removal(&self, tenant: &TenantId, block_count: usize) {
        metrics::counter!("tempo_compactor_retention_removed_total", "tenant" => tenant.as_str().to_string())
            .increment(block_count as u64);
    }

    pub fn record_cleanup_failure(&self, tenant: &TenantId) {
        metrics::counter!("tempo_compactor_block_cleanup_failures_total", "tenant" => tenant.as_str().to_string())
            .increment(1);
    }

    pub fn set_backlog(&self, tenant: &TenantId, groups_pending: u64) {
        metrics::gauge!("tempo_compactor_backlog_groups", "tenant" => tenant.as_str().to_string())
            .set(groups_pending as f64);
    }
}
