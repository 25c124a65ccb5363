/// リクエスト監督者 — 追い越し（supersession）の状態機械。
///
/// プロセス全体で論理的に「現在」の解析リクエストは常に1つで、新しい
/// リクエストが到着すると進行中のリクエストへキャンセル信号を送り、
/// 自分が現在のエポックになる。追い越されたワーカーは日付境界で停止し、
/// 完了済みの進捗を台帳へマージしたうえで、計算結果ではなく
/// [`AnalyzeError::Superseded`] を呼び出し元へ返す。
///
/// 地域が異なるリクエスト同士でも追い越しが起きる（プロセス全体で
/// 単一の実行スロット）。既知の制約。
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, warn};

use crate::clients::PipelineError;
use crate::observability::metrics::Metrics;
use crate::pipeline::{AnalysisWorkflow, WorkflowError};
use crate::schema::AnalysisRequest;
use crate::store::{MetricSet, StorageError};
use crate::util::dates::InvalidRangeError;

/// 協調的キャンセルトークン。
///
/// ランナーが日付境界でのみ確認する。ラスター処理の途中で割り込まない
/// ため、書きかけのファイルを壊すことはない。
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 解析リクエストの最終的な失敗・制御フロー結果。
#[derive(Debug, Error)]
pub(crate) enum AnalyzeError {
    /// より新しいリクエストに追い越された。失敗ではなく期待される制御フロー。
    #[error("request superseded by a newer analysis request")]
    Superseded,
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("imagery pipeline configuration error: {0}")]
    Configuration(String),
}

impl From<WorkflowError> for AnalyzeError {
    fn from(error: WorkflowError) -> Self {
        match error {
            WorkflowError::InvalidRange(e) => AnalyzeError::InvalidRange(e),
            WorkflowError::Storage(e) => AnalyzeError::Storage(e),
            WorkflowError::Pipeline(PipelineError::Configuration(message)) => {
                AnalyzeError::Configuration(message)
            }
            // ランナーは一時的失敗を日付単位で吸収するため、ここへは
            // 設定不備しか到達しない
            WorkflowError::Pipeline(PipelineError::Transient(e)) => {
                AnalyzeError::Configuration(e.to_string())
            }
        }
    }
}

#[derive(Debug)]
struct ActiveRequest {
    epoch: u64,
    cancel: CancelToken,
}

#[derive(Debug, Default)]
struct SupervisorState {
    last_epoch: u64,
    current: Option<ActiveRequest>,
}

pub(crate) struct RequestSupervisor {
    workflow: AnalysisWorkflow,
    state: Mutex<SupervisorState>,
    metrics: Arc<Metrics>,
}

impl RequestSupervisor {
    pub(crate) fn new(workflow: AnalysisWorkflow, metrics: Arc<Metrics>) -> Self {
        Self {
            workflow,
            state: Mutex::new(SupervisorState::default()),
            metrics,
        }
    }

    /// リクエストを受理し、完了（または追い越し）まで呼び出し元を待たせる。
    ///
    /// 受理時にエポックを採番し、進行中の古いエポックがあればキャンセル
    /// 信号を送る（応答は待たない — 停止できないワーカーとは並走し、
    /// その結果値は破棄される）。ワーカーは完了時にまず部分進捗を台帳へ
    /// マージし、そのあとで自分がまだ現在のエポックかを判定する。
    ///
    /// # Errors
    /// 追い越された場合は [`AnalyzeError::Superseded`]。それ以外は
    /// ワークフローのエラーをそのまま写像する。
    pub(crate) async fn submit(
        &self,
        request: AnalysisRequest,
    ) -> Result<BTreeMap<NaiveDate, MetricSet>, AnalyzeError> {
        let (epoch, cancel) = self.begin(&request);
        self.metrics.requests_accepted.inc();
        self.metrics.inflight_requests.inc();
        let timer = self.metrics.request_duration.start_timer();

        let result = self.workflow.execute(&request, &cancel).await;

        timer.observe_duration();
        self.metrics.inflight_requests.dec();
        let still_current = self.finish(epoch);

        if !still_current {
            self.metrics.requests_superseded.inc();
            info!(
                epoch,
                region = %request.region_name,
                "request finished after being superseded, discarding its response"
            );
            return Err(AnalyzeError::Superseded);
        }

        match result {
            Ok(outputs) => {
                self.metrics.requests_completed.inc();
                Ok(outputs)
            }
            Err(error) => {
                self.metrics.requests_failed.inc();
                warn!(epoch, region = %request.region_name, error = %error, "analysis request failed");
                Err(error.into())
            }
        }
    }

    /// エポックを採番し、進行中のリクエストへキャンセル信号を送る。
    fn begin(&self, request: &AnalysisRequest) -> (u64, CancelToken) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.last_epoch += 1;
        let epoch = state.last_epoch;

        if let Some(previous) = state.current.take() {
            info!(
                superseded_epoch = previous.epoch,
                new_epoch = epoch,
                region = %request.region_name,
                "superseding in-flight analysis request"
            );
            previous.cancel.cancel();
        }

        let cancel = CancelToken::default();
        state.current = Some(ActiveRequest {
            epoch,
            cancel: cancel.clone(),
        });
        info!(epoch, region = %request.region_name, "analysis request accepted");
        (epoch, cancel)
    }

    /// 完了したエポックがまだ現在かどうかを判定し、現在なら解放する。
    fn finish(&self, epoch: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match &state.current {
            Some(active) if active.epoch == epoch => {
                state.current = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    use crate::clients::{DailyMetricsRequest, DailyVerdict, ImageryPipeline};
    use crate::store::RegionLedger;

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid test date")
    }

    fn request_for(region: &str, start: &str, end: &str) -> AnalysisRequest {
        AnalysisRequest {
            region_name: region.to_string(),
            polygon: vec![[5.1, 52.0], [5.2, 52.0], [5.2, 52.1]],
            crs: "EPSG:4326".to_string(),
            start_date: date(start),
            end_date: date(end),
            soil_condition: 2,
            precipitation_mm: 10.0,
            endmember_count: 3,
        }
    }

    fn sample_metrics() -> MetricSet {
        MetricSet {
            ndvi: 0.4,
            vegetation_fraction: 0.6,
            soil_fraction: 0.3,
            impervious_fraction: 0.1,
            curve_number: 71.0,
            temperature: 19.5,
            precipitation: 2.5,
        }
    }

    /// `slow` 地域の最初の呼び出しだけ解放されるまでブロックするモック。
    struct BlockingPipeline {
        started: Notify,
        release: Notify,
        slow_started: AtomicBool,
        calls: AtomicUsize,
    }

    impl BlockingPipeline {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: Notify::new(),
                release: Notify::new(),
                slow_started: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ImageryPipeline for BlockingPipeline {
        async fn compute_daily_metrics(
            &self,
            request: &DailyMetricsRequest,
        ) -> Result<DailyVerdict, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.region == "slow" && !self.slow_started.swap(true, Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            Ok(DailyVerdict::Metrics(sample_metrics()))
        }

        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn supervisor_with(
        root: &std::path::Path,
        pipeline: Arc<dyn ImageryPipeline>,
    ) -> Arc<RequestSupervisor> {
        let ledger = Arc::new(RegionLedger::new(root));
        let metrics = Metrics::for_tests();
        let workflow = AnalysisWorkflow::new(
            ledger,
            pipeline,
            Arc::new(Semaphore::new(4)),
            Arc::clone(&metrics),
        );
        Arc::new(RequestSupervisor::new(workflow, metrics))
    }

    #[tokio::test]
    async fn newer_request_supersedes_the_in_flight_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = BlockingPipeline::new();
        let supervisor = supervisor_with(dir.path(), Arc::clone(&pipeline) as _);

        let older = Arc::clone(&supervisor);
        let first = tokio::spawn(async move {
            older.submit(request_for("slow", "2024-01-01", "2024-01-02")).await
        });

        // 最初のワーカーが外部呼び出しへ入るまで待つ
        pipeline.started.notified().await;

        let second = supervisor
            .submit(request_for("other", "2024-02-01", "2024-02-01"))
            .await
            .expect("newest request wins");
        assert_eq!(second.len(), 1);

        // 追い越されたワーカーを解放して完了させる
        pipeline.release.notify_one();
        let first_result = first.await.expect("task joins");
        assert!(matches!(first_result, Err(AnalyzeError::Superseded)));
    }

    #[tokio::test]
    async fn superseded_worker_keeps_its_partial_progress_in_the_ledger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = BlockingPipeline::new();
        let supervisor = supervisor_with(dir.path(), Arc::clone(&pipeline) as _);

        let older = Arc::clone(&supervisor);
        let first = tokio::spawn(async move {
            older.submit(request_for("slow", "2024-01-01", "2024-01-03")).await
        });

        pipeline.started.notified().await;
        supervisor
            .submit(request_for("other", "2024-02-01", "2024-02-01"))
            .await
            .expect("newest request wins");
        pipeline.release.notify_one();
        let first_result = first.await.expect("task joins");
        assert!(matches!(first_result, Err(AnalyzeError::Superseded)));

        // 進行中だった1日目は完了扱いでマージされ、残りは未着手のまま
        let ledger = RegionLedger::new(dir.path());
        let listing = ledger.list("slow").await.expect("list");
        assert_eq!(listing.len(), 1);
        assert!(listing.contains_key(&date("2024-01-01")));
    }

    #[tokio::test]
    async fn sequential_requests_complete_normally() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = BlockingPipeline::new();
        let supervisor = supervisor_with(dir.path(), pipeline as _);

        let first = supervisor
            .submit(request_for("a", "2024-01-01", "2024-01-01"))
            .await
            .expect("first completes");
        assert_eq!(first.len(), 1);

        let second = supervisor
            .submit(request_for("b", "2024-01-01", "2024-01-01"))
            .await
            .expect("second completes");
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn invalid_range_maps_to_the_analyze_error_taxonomy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = BlockingPipeline::new();
        let supervisor = supervisor_with(dir.path(), pipeline as _);

        let error = supervisor
            .submit(request_for("a", "2024-01-05", "2024-01-01"))
            .await
            .expect_err("must fail");
        assert!(matches!(error, AnalyzeError::InvalidRange(_)));
    }
}
