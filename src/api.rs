pub(crate) mod analyze;
pub(crate) mod health;
pub(crate) mod ledger;
pub(crate) mod metrics;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/analyze", post(analyze::submit))
        .route("/v1/regions/{region}/ledger", get(ledger::list_region))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
