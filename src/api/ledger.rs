use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::error;

use crate::{app::AppState, schema::MetricOutput, store::LedgerRow};

#[derive(Debug, Serialize)]
struct LedgerEntry {
    date: NaiveDate,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<MetricOutput>,
}

#[derive(Debug, Serialize)]
struct LedgerListing {
    region_name: String,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// `GET /v1/regions/{region}/ledger`
///
/// 台帳の全行を日付昇順で返す。未知の地域は空の台帳として扱う。
pub(crate) async fn list_region(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> impl IntoResponse {
    match state.ledger().list(&region).await {
        Ok(rows) => {
            let entries = rows
                .into_iter()
                .map(|(date, row)| match row {
                    LedgerRow::Metrics(set) => LedgerEntry {
                        date,
                        status: "data",
                        metrics: Some(MetricOutput::from(set)),
                    },
                    LedgerRow::NoData(_) => LedgerEntry {
                        date,
                        status: "no_data",
                        metrics: None,
                    },
                })
                .collect();
            let body = Json(LedgerListing {
                region_name: region,
                entries,
            });
            (StatusCode::OK, body).into_response()
        }
        Err(error) => {
            error!(region, %error, "failed to read region ledger");
            let body = Json(ErrorResponse {
                error: "ledger storage failure".to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}
