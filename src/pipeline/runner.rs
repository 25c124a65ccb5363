/// 解析ランナー。
///
/// キャッシュミスの日付だけを1日ずつ独立に外部パイプラインへ依頼する。
/// 日付単位の失敗はバッチ全体を止めず、設定不備だけを即時失敗とする。
/// キャンセルは日付境界でのみ確認する（書き込み途中の割り込みはしない）。
/// 外部サービスへの同時呼び出し数はプロセス全体で共有するセマフォで
/// 制限するため、追い越されて破棄待ちのワーカーと新しいワーカーが
/// 重なっても上限を超えない。
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::clients::{DailyMetricsRequest, DailyVerdict, ImageryPipeline, PipelineError};
use crate::observability::metrics::Metrics;
use crate::schema::AnalysisRequest;
use crate::store::MetricSet;
use crate::supervisor::CancelToken;

/// ランナーの実行報告。
///
/// 永続化する `NO_DATA` 集合の計算はマージャーに集約するため、ランナーは
/// 「どの日付がどの種類の決着に至ったか」だけを報告する。コラボレーターが
/// 画像なしを明示した日付のみ `no_imagery` に入り、一時的な失敗や
/// キャンセルで未着手の日付は将来のリクエストで再処理可能なまま残る。
#[derive(Debug, Default)]
pub(crate) struct RunnerReport {
    pub(crate) metrics: BTreeMap<NaiveDate, MetricSet>,
    pub(crate) no_imagery: BTreeSet<NaiveDate>,
    pub(crate) transient_failures: BTreeSet<NaiveDate>,
    /// キャンセルにより未着手のまま残った日付。昇順。
    pub(crate) remaining: Vec<NaiveDate>,
}

impl RunnerReport {
    #[must_use]
    pub(crate) fn was_cancelled(&self) -> bool {
        !self.remaining.is_empty()
    }
}

pub(crate) struct AnalysisRunner {
    pipeline: Arc<dyn ImageryPipeline>,
    permits: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl AnalysisRunner {
    pub(crate) fn new(
        pipeline: Arc<dyn ImageryPipeline>,
        permits: Arc<Semaphore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pipeline,
            permits,
            metrics,
        }
    }

    /// ミス日付列を処理し、日付ごとの決着を報告する。
    ///
    /// # Errors
    /// コラボレーターが設定不備を報告した場合は [`PipelineError::Configuration`]
    /// でバッチ全体を失敗させる。それまでに完了した日付の結果は破棄される
    /// （台帳への書き込みはマージャーが行うため、この時点では何も永続化
    /// されていない）。
    pub(crate) async fn run(
        &self,
        request: &AnalysisRequest,
        dates: &[NaiveDate],
        cancel: &CancelToken,
    ) -> Result<RunnerReport, PipelineError> {
        let mut report = RunnerReport::default();

        for (index, date) in dates.iter().enumerate() {
            if cancel.is_cancelled() {
                report.remaining = dates[index..].to_vec();
                info!(
                    region = %request.region_name,
                    completed = index,
                    remaining = report.remaining.len(),
                    "analysis cancelled at a date boundary"
                );
                break;
            }

            let Ok(_permit) = self.permits.acquire().await else {
                // セマフォはプロセス終了まで閉じない
                report.remaining = dates[index..].to_vec();
                break;
            };

            let timer = self.metrics.date_processing_duration.start_timer();
            let outcome = self
                .pipeline
                .compute_daily_metrics(&daily_request(request, *date))
                .await;
            timer.observe_duration();

            match outcome {
                Ok(DailyVerdict::Metrics(metrics)) => {
                    self.metrics.dates_processed.inc();
                    report.metrics.insert(*date, metrics.normalized());
                }
                Ok(DailyVerdict::NoImagery) => {
                    self.metrics.dates_no_imagery.inc();
                    info!(region = %request.region_name, date = %date, "no imagery for date");
                    report.no_imagery.insert(*date);
                }
                Err(PipelineError::Configuration(message)) => {
                    return Err(PipelineError::Configuration(message));
                }
                Err(PipelineError::Transient(error)) => {
                    self.metrics.dates_transient_failures.inc();
                    warn!(
                        region = %request.region_name,
                        date = %date,
                        error = %error,
                        "per-date processing failed, date stays retryable"
                    );
                    report.transient_failures.insert(*date);
                }
            }
        }

        Ok(report)
    }
}

fn daily_request(request: &AnalysisRequest, date: NaiveDate) -> DailyMetricsRequest {
    DailyMetricsRequest {
        region: request.region_name.clone(),
        date,
        polygon: request.polygon.clone(),
        crs: request.crs.clone(),
        soil_condition: request.soil_condition,
        precipitation_mm: request.precipitation_mm,
        endmember_count: request.endmember_count,
    }
}
