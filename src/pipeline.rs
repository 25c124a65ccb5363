/// 解析ワークフローのオーケストレーター。
///
/// 1リクエスト分の流れ（レンジ展開 → キャッシュ照合 → ミス日付の処理 →
/// 台帳マージ → 出力組み立て）をステージとして束ねる。追い越し（エポック）
/// の判定は [`crate::supervisor::RequestSupervisor`] の責務で、ここでは
/// キャンセルトークンを日付境界でランナーへ引き渡すだけに留める。
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::info;

pub(crate) mod merge;
pub(crate) mod reconcile;
pub(crate) mod runner;

use merge::ResultMerger;
use reconcile::CacheReconciler;
use runner::AnalysisRunner;

use crate::clients::{ImageryPipeline, PipelineError};
use crate::observability::metrics::Metrics;
use crate::schema::AnalysisRequest;
use crate::store::{MetricSet, RegionLedger, StorageError};
use crate::supervisor::CancelToken;
use crate::util::dates::{InvalidRangeError, expand_date_range};

/// ワークフロー実行の失敗。
#[derive(Debug, Error)]
pub(crate) enum WorkflowError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub(crate) struct AnalysisWorkflow {
    reconciler: CacheReconciler,
    runner: AnalysisRunner,
    merger: ResultMerger,
}

impl AnalysisWorkflow {
    pub(crate) fn new(
        ledger: Arc<RegionLedger>,
        pipeline: Arc<dyn ImageryPipeline>,
        permits: Arc<Semaphore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            reconciler: CacheReconciler::new(Arc::clone(&ledger)),
            runner: AnalysisRunner::new(pipeline, permits, Arc::clone(&metrics)),
            merger: ResultMerger::new(ledger, metrics),
        }
    }

    /// 1リクエスト分を最後まで実行する。
    ///
    /// キャンセルされた場合でも、それまでに完了した日付分は台帳へ
    /// マージしてから戻る（部分的な進捗は次のリクエストのキャッシュを
    /// 強化する）。
    ///
    /// # Errors
    /// レンジ不正・台帳I/O失敗・コラボレーターの設定不備はそれぞれ
    /// [`WorkflowError`] の対応する変種で返す。
    pub(crate) async fn execute(
        &self,
        request: &AnalysisRequest,
        cancel: &CancelToken,
    ) -> Result<BTreeMap<NaiveDate, MetricSet>, WorkflowError> {
        let requested = expand_date_range(request.start_date, request.end_date)?;
        let outcome = self
            .reconciler
            .reconcile(&request.region_name, &requested)
            .await?;

        let report = self
            .runner
            .run(request, &outcome.dates_to_process, cancel)
            .await?;

        if report.was_cancelled() {
            info!(
                region = %request.region_name,
                merged = report.metrics.len(),
                "merging partial progress of a cancelled request"
            );
        }

        let outputs = self
            .merger
            .finalize(&request.region_name, outcome.cached, &report)
            .await?;
        Ok(outputs)
    }
}
