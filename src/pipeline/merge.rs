/// 結果マージステージ。
///
/// キャッシュヒット・ランナー報告・台帳マージを束ね、最終レスポンスを
/// 組み立てる。`NO_DATA` として永続化するのはコラボレーターが画像なしを
/// 明示した日付だけで、一時的な失敗やキャンセルで未着手の日付は台帳に
/// 痕跡を残さない（将来のリクエストで再処理される）。台帳マージの呼び出しは
/// リクエストあたり厳密に1回。
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use super::runner::RunnerReport;
use crate::observability::metrics::Metrics;
use crate::store::{MetricSet, RegionLedger, StorageError};

pub(crate) struct ResultMerger {
    ledger: Arc<RegionLedger>,
    metrics: Arc<Metrics>,
}

impl ResultMerger {
    pub(crate) fn new(ledger: Arc<RegionLedger>, metrics: Arc<Metrics>) -> Self {
        Self { ledger, metrics }
    }

    /// 新しい結果を台帳へ取り込み、呼び出し元へ返す出力を組み立てる。
    ///
    /// 戻り値は `cached ∪ new` で、`NO_DATA` の日付は永続化専用の概念として
    /// レスポンスには決して含めない。
    ///
    /// # Errors
    /// 台帳マージに失敗した場合は [`StorageError`]。そのバッチの行は一切
    /// 可視化されない。
    pub(crate) async fn finalize(
        &self,
        region: &str,
        cached: BTreeMap<NaiveDate, MetricSet>,
        report: &RunnerReport,
    ) -> Result<BTreeMap<NaiveDate, MetricSet>, StorageError> {
        self.ledger
            .merge(region, &report.metrics, &report.no_imagery)
            .await?;
        self.metrics.ledger_merges.inc();
        #[allow(clippy::cast_precision_loss)]
        self.metrics.dates_from_cache.inc_by(cached.len() as f64);

        info!(
            region,
            cached = cached.len(),
            fresh = report.metrics.len(),
            no_data = report.no_imagery.len(),
            retryable = report.transient_failures.len(),
            skipped = report.remaining.len(),
            "request results merged into ledger"
        );

        let mut outputs = cached;
        outputs.extend(report.metrics.iter().map(|(date, metrics)| (*date, *metrics)));
        Ok(outputs)
    }
}
