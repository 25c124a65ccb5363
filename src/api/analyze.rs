use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info};

use crate::{
    app::AppState,
    schema::{AnalyzeRequest, MetricOutput},
    supervisor::AnalyzeError,
};

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    region_name: String,
    outputs: BTreeMap<NaiveDate, MetricOutput>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// `POST /v1/analyze`
///
/// 完了までブロックし、要求レンジ全体の指標を返す。より新しい
/// リクエストに追い越された場合は `409 Conflict`（ボディなし）。
pub(crate) async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> impl IntoResponse {
    let request = match payload.validate() {
        Ok(request) => request,
        Err(error) => {
            let body = Json(ErrorResponse {
                error: error.to_string(),
            });
            return (StatusCode::BAD_REQUEST, body).into_response();
        }
    };

    let region_name = request.region_name.clone();
    match state.supervisor().submit(request).await {
        Ok(metrics) => {
            info!(region = %region_name, days = metrics.len(), "analysis request served");
            let outputs = metrics
                .into_iter()
                .map(|(date, set)| (date, MetricOutput::from(set)))
                .collect();
            let body = Json(AnalyzeResponse {
                region_name,
                outputs,
            });
            (StatusCode::OK, body).into_response()
        }
        Err(AnalyzeError::Superseded) => StatusCode::CONFLICT.into_response(),
        Err(AnalyzeError::InvalidRange(error)) => {
            let body = Json(ErrorResponse {
                error: error.to_string(),
            });
            (StatusCode::BAD_REQUEST, body).into_response()
        }
        Err(AnalyzeError::Storage(error)) => {
            error!(region = %region_name, %error, "ledger storage failure");
            let body = Json(ErrorResponse {
                error: "ledger storage failure".to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
        Err(AnalyzeError::Configuration(detail)) => {
            error!(region = %region_name, detail, "imagery pipeline rejected the request");
            let body = Json(ErrorResponse { error: detail });
            (StatusCode::BAD_GATEWAY, body).into_response()
        }
    }
}
