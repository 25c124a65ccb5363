/// 外部の画像・ラスターパイプラインサービスへのクライアント。
///
/// 1暦日分の指標計算を `POST /v1/metrics/daily` に委譲する。レスポンスは
/// パース前にJSON Schemaで検証し、「画像なし」確認は正常系の判定として
/// 呼び出し元へ返す。ネットワーク起因の失敗はFull Jitter付きで再試行し、
/// 設定不備（無効なCRS、欠損データセットなど）は即座に打ち切る。
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::schema::imagery::DAILY_METRICS_RESPONSE_SCHEMA;
use crate::schema::validate_json;
use crate::store::MetricSet;
use crate::util::retry::{RetryConfig, is_retryable_error};

const MAX_ERROR_BODY_LENGTH: usize = 500;

/// 1暦日分の計算依頼。
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DailyMetricsRequest {
    pub(crate) region: String,
    pub(crate) date: NaiveDate,
    pub(crate) polygon: Vec<[f64; 2]>,
    pub(crate) crs: String,
    pub(crate) soil_condition: u8,
    pub(crate) precipitation_mm: f64,
    pub(crate) endmember_count: u8,
}

/// 1暦日分の確定結果。
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DailyVerdict {
    Metrics(MetricSet),
    /// 当日の画像が存在しないことをコラボレーターが明示的に確認した。
    NoImagery,
}

/// パイプライン呼び出しの失敗分類。
///
/// `Configuration` はバッチ全体を即座に失敗させる。`Transient` は当日分のみ
/// スキップされ、将来のリクエストで再試行可能なまま残る（`NO_DATA` として
/// 永続化されることはない）。
#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("imagery pipeline configuration error: {0}")]
    Configuration(String),
    #[error("transient imagery pipeline failure: {0}")]
    Transient(#[source] anyhow::Error),
}

/// 画像パイプラインコラボレーターの抽象。テストではモックに差し替える。
#[async_trait]
pub(crate) trait ImageryPipeline: Send + Sync {
    async fn compute_daily_metrics(
        &self,
        request: &DailyMetricsRequest,
    ) -> Result<DailyVerdict, PipelineError>;

    async fn ping(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) struct ImageryPipelineConfig {
    pub(crate) base_url: String,
    pub(crate) connect_timeout: Duration,
    /// `None` はパイプライン完了を無期限に待つ。
    pub(crate) total_timeout: Option<Duration>,
    pub(crate) retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub(crate) struct ImageryPipelineClient {
    client: Client,
    metrics_endpoint: Url,
    health_endpoint: Url,
    retry: RetryConfig,
}

enum RequestFailure {
    Fatal(String),
    Retryable(anyhow::Error),
}

impl ImageryPipelineClient {
    /// # Errors
    /// ベースURLが不正、またはHTTPクライアントの構築に失敗した場合。
    pub(crate) fn new(config: ImageryPipelineConfig) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(&config.base_url).context("invalid imagery pipeline base URL")?;
        let metrics_endpoint = base_url
            .join("v1/metrics/daily")
            .context("failed to build metrics endpoint URL")?;
        let health_endpoint = base_url
            .join("health/live")
            .context("failed to build health endpoint URL")?;

        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.total_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("failed to build imagery pipeline HTTP client")?;

        Ok(Self {
            client,
            metrics_endpoint,
            health_endpoint,
            retry: config.retry,
        })
    }

    async fn request_once(
        &self,
        request: &DailyMetricsRequest,
    ) -> Result<DailyVerdict, RequestFailure> {
        let response = self
            .client
            .post(self.metrics_endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|error| {
                let retryable = is_retryable_error(&error);
                let error = anyhow::Error::new(error);
                if retryable {
                    RequestFailure::Retryable(error)
                } else {
                    RequestFailure::Retryable(error.context("imagery pipeline request failed"))
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(RequestFailure::Fatal(truncate_body(&body)));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RequestFailure::Fatal(format!(
                "metrics endpoint {} not found; check IMAGERY_PIPELINE_BASE_URL",
                self.metrics_endpoint
            )));
        }
        if !status.is_success() {
            return Err(RequestFailure::Retryable(anyhow!(
                "imagery pipeline responded with status {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| RequestFailure::Retryable(anyhow::Error::new(error)))?;

        if !validate_json(&DAILY_METRICS_RESPONSE_SCHEMA, &payload).valid {
            return Err(RequestFailure::Retryable(anyhow!(
                "imagery pipeline response violates the daily metrics contract"
            )));
        }

        match payload["status"].as_str() {
            Some("no_imagery") => Ok(DailyVerdict::NoImagery),
            Some("ok") => {
                let metrics: MetricSet = serde_json::from_value(payload["metrics"].clone())
                    .map_err(|error| RequestFailure::Retryable(anyhow::Error::new(error)))?;
                Ok(DailyVerdict::Metrics(metrics.normalized()))
            }
            // スキーマ検証済みのため到達しないが、契約逸脱として扱う
            _ => Err(RequestFailure::Retryable(anyhow!(
                "imagery pipeline returned an unknown status"
            ))),
        }
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "imagery pipeline rejected the request".to_string();
    }
    if trimmed.chars().count() <= MAX_ERROR_BODY_LENGTH {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(MAX_ERROR_BODY_LENGTH).collect();
    format!("{truncated}... (truncated)")
}

#[async_trait]
impl ImageryPipeline for ImageryPipelineClient {
    async fn compute_daily_metrics(
        &self,
        request: &DailyMetricsRequest,
    ) -> Result<DailyVerdict, PipelineError> {
        let mut attempt = 0;
        loop {
            match self.request_once(request).await {
                Ok(verdict) => return Ok(verdict),
                Err(RequestFailure::Fatal(message)) => {
                    return Err(PipelineError::Configuration(message));
                }
                Err(RequestFailure::Retryable(error)) => {
                    attempt += 1;
                    if !self.retry.can_retry(attempt) {
                        return Err(PipelineError::Transient(error));
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        date = %request.date,
                        region = %request.region,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "imagery pipeline call failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.client
            .get(self.health_endpoint.clone())
            .send()
            .await
            .context("imagery pipeline is unreachable")?
            .error_for_status()
            .context("imagery pipeline health check failed")?;
        Ok(())
    }
}
