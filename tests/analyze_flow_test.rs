/// 解析リクエストの受理から台帳参照までを通しで検証する。
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hydrosens_worker::{
    app::{ComponentRegistry, build_router},
    config::Config,
};

static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

fn metrics_body(ndvi: f64) -> Value {
    json!({
        "status": "ok",
        "metrics": {
            "ndvi": ndvi,
            "vegetation_fraction": 0.6,
            "soil_fraction": 0.3,
            "impervious_fraction": 0.1,
            "curve_number": 71.0,
            "temperature": 19.5,
            "precipitation": 2.5
        }
    })
}

fn analyze_body(start: &str, end: &str) -> Body {
    Body::from(
        json!({
            "region_name": "Field-9",
            "polygon": [[5.1, 52.0], [5.2, 52.0], [5.2, 52.1]],
            "start_date": start,
            "end_date": end,
            "soil_condition": 2,
            "precipitation_mm": 12.5
        })
        .to_string(),
    )
}

async fn app_for(server: &MockServer, output_master: &std::path::Path) -> Router {
    let config = {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        // SAFETY: tests adjust deterministic environment state under the mutex.
        unsafe {
            std::env::set_var("OUTPUT_MASTER", output_master);
            std::env::set_var("IMAGERY_PIPELINE_BASE_URL", server.uri());
            std::env::set_var("HTTP_BACKOFF_BASE_MS", "1");
            std::env::set_var("HTTP_BACKOFF_CAP_MS", "2");
        }
        Config::from_env().expect("config loads")
    };
    let registry = ComponentRegistry::build(config).expect("registry builds");
    build_router(registry)
}

async fn post_analyze(app: &Router, start: &str, end: &str) -> (StatusCode, Value) {
    let request = Request::post("/v1/analyze")
        .header("content-type", "application/json")
        .body(analyze_body(start, end))
        .expect("request builds");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request succeeds");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let payload = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("valid json")
    };
    (status, payload)
}

#[tokio::test]
async fn analysis_fills_the_ledger_and_serves_repeats_from_cache() {
    let server = MockServer::start().await;
    // 2024-01-02だけ画像なし、それ以外は成功
    Mock::given(method("POST"))
        .and(path("/v1/metrics/daily"))
        .and(body_partial_json(json!({ "date": "2024-01-02" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "no_imagery" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/metrics/daily"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body(0.41)))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let app = app_for(&server, dir.path()).await;

    let (status, payload) = post_analyze(&app, "2024-01-01", "2024-01-03").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["region_name"], "Field-9");
    let results = payload["outputs"].as_object().expect("outputs object");
    assert_eq!(results.len(), 2);
    assert!(results.contains_key("2024-01-01"));
    assert!(!results.contains_key("2024-01-02"));
    assert!(results.contains_key("2024-01-03"));
    assert!(results["2024-01-01"].get("impervious_fraction").is_none());

    // 台帳ファイルが地域ディレクトリ配下に作られる
    assert!(dir.path().join("Field-9").join("ledger.json").is_file());

    // 同一レンジの再リクエストはコラボレーターを一切呼ばない
    let (status, repeat) = post_analyze(&app, "2024-01-01", "2024-01-03").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(repeat["outputs"], payload["outputs"]);
    let calls = server.received_requests().await.expect("recorded requests");
    assert_eq!(calls.len(), 3);
}

#[tokio::test]
async fn ledger_endpoint_lists_rows_in_date_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/metrics/daily"))
        .and(body_partial_json(json!({ "date": "2024-01-02" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "no_imagery" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/metrics/daily"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body(0.5)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let app = app_for(&server, dir.path()).await;

    let (status, _) = post_analyze(&app, "2024-01-01", "2024-01-03").await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::get("/v1/regions/Field-9/ledger")
        .body(Body::empty())
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let payload: Value = serde_json::from_slice(&bytes).expect("valid json");

    let entries = payload["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["date"], "2024-01-01");
    assert_eq!(entries[0]["status"], "data");
    assert_eq!(entries[1]["date"], "2024-01-02");
    assert_eq!(entries[1]["status"], "no_data");
    assert!(entries[1].get("metrics").is_none());
    assert_eq!(entries[2]["date"], "2024-01-03");
}

#[tokio::test]
async fn unknown_region_ledger_is_empty() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let app = app_for(&server, dir.path()).await;

    let request = Request::get("/v1/regions/nowhere/ledger")
        .body(Body::empty())
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let payload: Value = serde_json::from_slice(&bytes).expect("valid json");
    assert_eq!(payload["entries"].as_array().expect("entries").len(), 0);
}

#[tokio::test]
async fn invalid_polygon_is_rejected_before_processing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let app = app_for(&server, dir.path()).await;

    let request = Request::post("/v1/analyze")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "region_name": "Field-9",
                "polygon": [[5.1, 52.0], [5.2, 52.0]],
                "start_date": "2024-01-01",
                "end_date": "2024-01-03",
                "soil_condition": 2,
                "precipitation_mm": 12.5
            })
            .to_string(),
        ))
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let calls = server.received_requests().await.expect("recorded requests");
    assert!(calls.is_empty());
}

#[tokio::test]
async fn reversed_date_range_is_rejected() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let app = app_for(&server, dir.path()).await;

    let (status, payload) = post_analyze(&app, "2024-01-05", "2024-01-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(payload["error"].as_str().expect("error message").contains("range"));
}

#[tokio::test]
async fn collaborator_rejection_maps_to_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/metrics/daily"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown CRS authority: FOO"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let app = app_for(&server, dir.path()).await;

    let (status, payload) = post_analyze(&app, "2024-01-01", "2024-01-01").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(
        payload["error"]
            .as_str()
            .expect("error message")
            .contains("unknown CRS authority")
    );
}

#[tokio::test]
async fn metrics_endpoint_exposes_request_counters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/metrics/daily"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body(0.3)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let app = app_for(&server, dir.path()).await;

    let (status, _) = post_analyze(&app, "2024-01-01", "2024-01-01").await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::get("/metrics")
        .body(Body::empty())
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let rendered = String::from_utf8(bytes.to_vec()).expect("utf8 body");
    assert!(rendered.contains("hydrosens_requests_completed_total 1"));
    assert!(rendered.contains("hydrosens_dates_processed_total 1"));
}
