/// 台帳の行モデル。
///
/// 1暦日は高々1行に対応し、行は「指標一式」か「画像なし確認済み」の
/// どちらかを取る。後者は `NO_DATA` という文字列リテラルとして永続化され、
/// 「まだ試行していない」状態（行が存在しない）とは区別される。
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 1暦日分の解析結果。
///
/// 上流のラスターパイプラインはNaN/Infを含む値を返すことがあるため、
/// 永続化前に [`MetricSet::normalized`] で0へ正規化する（上流の文書化された
/// 不変条件をそのまま引き継ぐ）。`impervious_fraction` は内部専用で、
/// APIレスポンスには含めない。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct MetricSet {
    pub(crate) ndvi: f64,
    pub(crate) vegetation_fraction: f64,
    pub(crate) soil_fraction: f64,
    pub(crate) impervious_fraction: f64,
    pub(crate) curve_number: f64,
    pub(crate) temperature: f64,
    pub(crate) precipitation: f64,
}

impl MetricSet {
    /// 非有限値（NaN/Inf）を0へ置き換えた値を返す。
    #[must_use]
    pub(crate) fn normalized(mut self) -> Self {
        for value in [
            &mut self.ndvi,
            &mut self.vegetation_fraction,
            &mut self.soil_fraction,
            &mut self.impervious_fraction,
            &mut self.curve_number,
            &mut self.temperature,
            &mut self.precipitation,
        ] {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
        self
    }

    /// すべてのフィールドが有限値かどうか。
    #[must_use]
    pub(crate) fn is_finite(&self) -> bool {
        [
            self.ndvi,
            self.vegetation_fraction,
            self.soil_fraction,
            self.impervious_fraction,
            self.curve_number,
            self.temperature,
            self.precipitation,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// 「画像なし」を確認済みであることを示す永続センチネル。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum NoDataMarker {
    #[serde(rename = "NO_DATA")]
    NoData,
}

/// 台帳の1行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum LedgerRow {
    Metrics(MetricSet),
    NoData(NoDataMarker),
}

impl LedgerRow {
    #[must_use]
    pub(crate) const fn is_no_data(&self) -> bool {
        matches!(self, LedgerRow::NoData(_))
    }
}

/// 1地域分の台帳ドキュメント。ISO日付キーで昇順に並ぶ。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct LedgerDocument {
    #[serde(default)]
    pub(crate) rows: BTreeMap<NaiveDate, LedgerRow>,
}
