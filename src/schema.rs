/// リクエスト検証と外部契約のスキーマ定義。
///
/// 解析リクエストは処理開始前にここで検証し、検証済みの不変な
/// [`AnalysisRequest`] に変換してから先へ渡す。画像パイプラインの
/// レスポンス契約は [`imagery`] のJSON Schemaで実行時に検証する。
pub(crate) mod imagery;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub(crate) const DEFAULT_CRS: &str = "EPSG:4326";
pub(crate) const DEFAULT_ENDMEMBER_COUNT: u8 = 3;

/// `POST /v1/analyze` の受信ボディ。
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnalyzeRequest {
    pub(crate) region_name: String,
    pub(crate) polygon: Vec<[f64; 2]>,
    #[serde(default = "default_crs")]
    pub(crate) crs: String,
    pub(crate) start_date: NaiveDate,
    pub(crate) end_date: NaiveDate,
    pub(crate) soil_condition: u8,
    pub(crate) precipitation_mm: f64,
    #[serde(default = "default_endmember_count")]
    pub(crate) endmember_count: u8,
}

fn default_crs() -> String {
    DEFAULT_CRS.to_string()
}

const fn default_endmember_count() -> u8 {
    DEFAULT_ENDMEMBER_COUNT
}

/// 検証済みの解析リクエスト。受理後は不変。
#[derive(Debug, Clone)]
pub(crate) struct AnalysisRequest {
    pub(crate) region_name: String,
    pub(crate) polygon: Vec<[f64; 2]>,
    pub(crate) crs: String,
    pub(crate) start_date: NaiveDate,
    pub(crate) end_date: NaiveDate,
    pub(crate) soil_condition: u8,
    pub(crate) precipitation_mm: f64,
    pub(crate) endmember_count: u8,
}

/// リクエストの静的検証エラー。処理開始前に呼び出し元へそのまま返す。
#[derive(Debug, Error, Clone, PartialEq)]
pub(crate) enum ValidationError {
    #[error("region_name must not be empty")]
    EmptyRegionName,
    #[error("polygon must contain at least 3 vertices, got {0}")]
    PolygonTooSmall(usize),
    #[error("polygon vertex {index} is out of range: lon {lon}, lat {lat}")]
    VertexOutOfRange { index: usize, lon: f64, lat: f64 },
    #[error("crs must be an authority:code pair, got {0:?}")]
    Crs(String),
    #[error("soil_condition must be 1, 2 or 3, got {0}")]
    SoilCondition(u8),
    #[error("endmember_count must be 2 or 3, got {0}")]
    EndmemberCount(u8),
    #[error("precipitation_mm must be a finite non-negative number")]
    Precipitation,
}

impl AnalyzeRequest {
    /// ボディを検証し、検証済みリクエストへ変換する。
    ///
    /// 日付順序の検証はここでは行わない。レンジ展開時に
    /// `InvalidRangeError` として扱う。
    ///
    /// # Errors
    /// いずれかのフィールドが契約を満たさない場合は [`ValidationError`]。
    pub(crate) fn validate(self) -> Result<AnalysisRequest, ValidationError> {
        if self.region_name.trim().is_empty() {
            return Err(ValidationError::EmptyRegionName);
        }
        if self.polygon.len() < 3 {
            return Err(ValidationError::PolygonTooSmall(self.polygon.len()));
        }
        for (index, [lon, lat]) in self.polygon.iter().enumerate() {
            let in_range =
                lon.is_finite() && lat.is_finite() && (-180.0..=180.0).contains(lon) && (-90.0..=90.0).contains(lat);
            if !in_range {
                return Err(ValidationError::VertexOutOfRange {
                    index,
                    lon: *lon,
                    lat: *lat,
                });
            }
        }
        let crs = self.crs.trim();
        if crs.is_empty() || !crs.contains(':') {
            return Err(ValidationError::Crs(self.crs.clone()));
        }
        if !(1..=3).contains(&self.soil_condition) {
            return Err(ValidationError::SoilCondition(self.soil_condition));
        }
        if !matches!(self.endmember_count, 2 | 3) {
            return Err(ValidationError::EndmemberCount(self.endmember_count));
        }
        if !self.precipitation_mm.is_finite() || self.precipitation_mm < 0.0 {
            return Err(ValidationError::Precipitation);
        }

        Ok(AnalysisRequest {
            region_name: self.region_name.trim().to_string(),
            polygon: self.polygon,
            crs: crs.to_string(),
            start_date: self.start_date,
            end_date: self.end_date,
            soil_condition: self.soil_condition,
            precipitation_mm: self.precipitation_mm,
            endmember_count: self.endmember_count,
        })
    }
}

/// APIレスポンスへ出す1日分の指標。
///
/// `impervious_fraction` は内部専用のため含めない。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct MetricOutput {
    pub(crate) ndvi: f64,
    pub(crate) vegetation_fraction: f64,
    pub(crate) soil_fraction: f64,
    pub(crate) curve_number: f64,
    pub(crate) temperature: f64,
    pub(crate) precipitation_mm: f64,
}

impl From<crate::store::MetricSet> for MetricOutput {
    fn from(metrics: crate::store::MetricSet) -> Self {
        Self {
            ndvi: metrics.ndvi,
            vegetation_fraction: metrics.vegetation_fraction,
            soil_fraction: metrics.soil_fraction,
            curve_number: metrics.curve_number,
            temperature: metrics.temperature,
            precipitation_mm: metrics.precipitation,
        }
    }
}

/// スキーマ検証結果。
#[derive(Debug)]
pub(crate) struct SchemaCheck {
    pub(crate) valid: bool,
}

/// JSON Schemaでデータを検証する。
pub(crate) fn validate_json(schema_json: &Value, instance: &Value) -> SchemaCheck {
    match jsonschema::validator_for(schema_json) {
        Ok(schema) => SchemaCheck {
            valid: schema.is_valid(instance),
        },
        Err(_) => SchemaCheck { valid: false },
    }
}
