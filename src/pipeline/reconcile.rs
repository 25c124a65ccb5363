/// キャッシュ照合ステージ。
///
/// 要求された日付列を台帳と突き合わせ、「処理が必要な日付」と
/// 「キャッシュ済みの出力」に分割する。台帳が完全に空の地域も
/// 一般のミス判定がそのまま扱うため、特別扱いはしない（末尾の
/// 欠落だけを検出するような変種設計を排除するための方針）。
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::store::{MetricSet, RegionLedger, StorageError};

#[derive(Debug, Default)]
pub(crate) struct ReconcileOutcome {
    /// 台帳に完全な行がない日付。昇順。
    pub(crate) dates_to_process: Vec<NaiveDate>,
    /// 台帳から組み立てたキャッシュヒット。
    pub(crate) cached: BTreeMap<NaiveDate, MetricSet>,
}

pub(crate) struct CacheReconciler {
    ledger: Arc<RegionLedger>,
}

impl CacheReconciler {
    pub(crate) fn new(ledger: Arc<RegionLedger>) -> Self {
        Self { ledger }
    }

    /// # Errors
    /// 台帳の読み取りに失敗した場合は [`StorageError`]。
    pub(crate) async fn reconcile(
        &self,
        region: &str,
        requested: &[NaiveDate],
    ) -> Result<ReconcileOutcome, StorageError> {
        let lookup = self.ledger.lookup(region, requested).await?;
        info!(
            region,
            requested = requested.len(),
            cached = lookup.hits.len(),
            to_process = lookup.misses.len(),
            "reconciled request against ledger"
        );
        Ok(ReconcileOutcome {
            dates_to_process: lookup.misses,
            cached: lookup.hits,
        })
    }
}
