/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub requests_accepted: Counter,
    pub requests_completed: Counter,
    pub requests_superseded: Counter,
    pub requests_failed: Counter,
    pub dates_processed: Counter,
    pub dates_from_cache: Counter,
    pub dates_no_imagery: Counter,
    pub dates_transient_failures: Counter,
    pub ledger_merges: Counter,

    // ヒストグラム
    pub request_duration: Histogram,
    pub date_processing_duration: Histogram,

    // ゲージ
    pub inflight_requests: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            requests_accepted: register_counter_with_registry!(
                "hydrosens_requests_accepted_total",
                "Total number of analysis requests accepted",
                registry
            )?,
            requests_completed: register_counter_with_registry!(
                "hydrosens_requests_completed_total",
                "Total number of analysis requests completed",
                registry
            )?,
            requests_superseded: register_counter_with_registry!(
                "hydrosens_requests_superseded_total",
                "Total number of analysis requests superseded by a newer one",
                registry
            )?,
            requests_failed: register_counter_with_registry!(
                "hydrosens_requests_failed_total",
                "Total number of analysis requests that failed",
                registry
            )?,
            dates_processed: register_counter_with_registry!(
                "hydrosens_dates_processed_total",
                "Total number of dates computed by the imagery pipeline",
                registry
            )?,
            dates_from_cache: register_counter_with_registry!(
                "hydrosens_dates_from_cache_total",
                "Total number of requested dates served from the ledger cache",
                registry
            )?,
            dates_no_imagery: register_counter_with_registry!(
                "hydrosens_dates_no_imagery_total",
                "Total number of dates confirmed to have no usable imagery",
                registry
            )?,
            dates_transient_failures: register_counter_with_registry!(
                "hydrosens_dates_transient_failures_total",
                "Total number of per-date failures that stayed retryable",
                registry
            )?,
            ledger_merges: register_counter_with_registry!(
                "hydrosens_ledger_merges_total",
                "Total number of ledger merge operations",
                registry
            )?,
            request_duration: register_histogram_with_registry!(
                "hydrosens_request_duration_seconds",
                "Duration of entire analysis request processing",
                registry
            )?,
            date_processing_duration: register_histogram_with_registry!(
                "hydrosens_date_processing_duration_seconds",
                "Duration of single-date imagery pipeline calls",
                registry
            )?,
            inflight_requests: register_gauge_with_registry!(
                "hydrosens_inflight_requests",
                "Number of currently running analysis requests",
                registry
            )?,
        })
    }

    /// テスト用に独立したレジストリでメトリクスを作成する。
    #[cfg(test)]
    pub(crate) fn for_tests() -> std::sync::Arc<Self> {
        let registry = Registry::new();
        std::sync::Arc::new(Self::new(&registry).expect("fresh registry accepts all metrics"))
    }
}
