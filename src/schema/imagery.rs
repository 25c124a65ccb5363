/// 画像パイプラインサービスとの契約をJSON Schemaで定義する。
///
/// `POST /v1/metrics/daily` の200レスポンスは、指標一式（`status: "ok"`）か
/// 「当日の画像なし」確認（`status: "no_imagery"`）のどちらか。クライアントは
/// パース前にこのスキーマで検証する。
use once_cell::sync::Lazy;
use serde_json::{Value, json};

pub(crate) static DAILY_METRICS_RESPONSE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "HydroSENS daily metrics response",
        "type": "object",
        "required": ["status"],
        "properties": {
            "status": { "type": "string", "enum": ["ok", "no_imagery"] },
            "metrics": {
                "type": "object",
                "required": [
                    "ndvi",
                    "vegetation_fraction",
                    "soil_fraction",
                    "impervious_fraction",
                    "curve_number",
                    "temperature",
                    "precipitation"
                ],
                "properties": {
                    "ndvi": { "type": "number" },
                    "vegetation_fraction": { "type": "number" },
                    "soil_fraction": { "type": "number" },
                    "impervious_fraction": { "type": "number" },
                    "curve_number": { "type": "number" },
                    "temperature": { "type": "number" },
                    "precipitation": { "type": "number" }
                }
            }
        },
        "if": {
            "properties": { "status": { "const": "ok" } }
        },
        "then": {
            "required": ["status", "metrics"]
        }
    })
});
