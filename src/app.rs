use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::sync::Semaphore;

use crate::{
    api,
    clients::{ImageryPipeline, ImageryPipelineClient, ImageryPipelineConfig},
    config::Config,
    observability::Telemetry,
    pipeline::AnalysisWorkflow,
    store::RegionLedger,
    supervisor::RequestSupervisor,
    util::retry::RetryConfig,
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    supervisor: Arc<RequestSupervisor>,
    imagery_client: Arc<ImageryPipelineClient>,
    ledger: Arc<RegionLedger>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn supervisor(&self) -> &RequestSupervisor {
        &self.registry.supervisor
    }

    pub(crate) fn imagery_client(&self) -> Arc<ImageryPipelineClient> {
        Arc::clone(&self.registry.imagery_client)
    }

    pub(crate) fn ledger(&self) -> Arc<RegionLedger> {
        Arc::clone(&self.registry.ledger)
    }

    #[allow(dead_code)]
    pub(crate) fn config(&self) -> &Config {
        &self.registry.config
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;

        let retry = RetryConfig {
            max_attempts: config.http_max_retries(),
            base_delay_ms: config.http_backoff_base_ms(),
            max_delay_ms: config.http_backoff_cap_ms(),
        };
        let imagery_client = Arc::new(ImageryPipelineClient::new(ImageryPipelineConfig {
            base_url: config.imagery_pipeline_base_url().to_string(),
            connect_timeout: config.imagery_connect_timeout(),
            total_timeout: config.pipeline_total_timeout(),
            retry,
        })?);

        let ledger = Arc::new(RegionLedger::new(config.output_master()));
        let permits = Arc::new(Semaphore::new(config.pipeline_max_concurrency().get()));
        let metrics = Arc::clone(telemetry.metrics());
        let workflow = AnalysisWorkflow::new(
            Arc::clone(&ledger),
            Arc::clone(&imagery_client) as Arc<dyn ImageryPipeline>,
            permits,
            Arc::clone(&metrics),
        );
        let supervisor = Arc::new(RequestSupervisor::new(workflow, metrics));

        Ok(Self {
            config,
            telemetry,
            supervisor,
            imagery_client,
            ledger,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
