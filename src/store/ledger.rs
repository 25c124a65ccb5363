/// 地域ごとの永続台帳。
///
/// `OUTPUT_MASTER` 配下に `<sanitized-region>/ledger.json` を1ドキュメント
/// ずつ持ち、日付→行の対応を保持する。マージはプロセス全体の非同期ロックで
/// 直列化した read-modify-write で、一時ファイルへの書き込み + rename により
/// 読み手が書きかけのドキュメントを観測しないことを保証する。
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{LedgerDocument, LedgerRow, MetricSet, NoDataMarker};
use crate::util::region::sanitize_region_name;

const LEDGER_FILE_NAME: &str = "ledger.json";

/// 台帳ストレージの失敗。
///
/// 呼び出し側はこれをリクエスト失敗として扱う。マージは自バッチに関して
/// 全か無かで、部分的な書き込みが可視化されることはない。
#[derive(Debug, Error)]
pub(crate) enum StorageError {
    #[error("ledger I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger document at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `lookup` の結果。ヒットは完全な指標行のみ、ミスは昇順。
///
/// `NO_DATA` 確認済みの日付はどちらにも含まれない（自動再処理の対象に
/// しないため）。
#[derive(Debug, Default)]
pub(crate) struct LedgerLookup {
    pub(crate) hits: BTreeMap<NaiveDate, MetricSet>,
    pub(crate) misses: Vec<NaiveDate>,
}

pub(crate) struct RegionLedger {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl RegionLedger {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn region_dir(&self, region: &str) -> PathBuf {
        self.root.join(sanitize_region_name(region))
    }

    fn ledger_path(&self, region: &str) -> PathBuf {
        self.region_dir(region).join(LEDGER_FILE_NAME)
    }

    /// 要求された日付集合を台帳と突き合わせる。
    ///
    /// # Errors
    /// 台帳ファイルの読み取りやデコードに失敗した場合は [`StorageError`]。
    pub(crate) async fn lookup(
        &self,
        region: &str,
        dates: &[NaiveDate],
    ) -> Result<LedgerLookup, StorageError> {
        let document = self.load(region).await?;
        let mut lookup = LedgerLookup::default();

        for date in dates {
            match document.rows.get(date) {
                Some(LedgerRow::Metrics(metrics)) if metrics.is_finite() => {
                    lookup.hits.insert(*date, *metrics);
                }
                // 不完全な行は再処理対象に戻す
                Some(LedgerRow::Metrics(_)) => lookup.misses.push(*date),
                // NO_DATA確認済み: ヒットにもミスにも含めない
                Some(LedgerRow::NoData(_)) => {}
                None => lookup.misses.push(*date),
            }
        }

        debug!(
            region,
            requested = dates.len(),
            hits = lookup.hits.len(),
            misses = lookup.misses.len(),
            "ledger lookup"
        );
        Ok(lookup)
    }

    /// 新しい行と `NO_DATA` 日付をひとつのバッチとして取り込む。
    ///
    /// 同一日付の既存行は置き換える（last-writer-wins）。両入力が空なら
    /// I/Oなしで成功を返す。書き込みは一時ファイル + rename で原子的に行い、
    /// 同時に走る別バッチの無関係な日付を失わないよう、read-modify-write
    /// 全体をロックで直列化する。
    ///
    /// # Errors
    /// 読み書きに失敗した場合は [`StorageError`]。その場合このバッチの行は
    /// 一切可視化されない。
    pub(crate) async fn merge(
        &self,
        region: &str,
        new_rows: &BTreeMap<NaiveDate, MetricSet>,
        no_data_dates: &BTreeSet<NaiveDate>,
    ) -> Result<(), StorageError> {
        if new_rows.is_empty() && no_data_dates.is_empty() {
            debug!(region, "nothing to merge");
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;

        let mut document = self.load(region).await?;
        for (date, metrics) in new_rows {
            document
                .rows
                .insert(*date, LedgerRow::Metrics(metrics.normalized()));
        }
        for date in no_data_dates {
            document
                .rows
                .insert(*date, LedgerRow::NoData(NoDataMarker::NoData));
        }

        self.persist(region, &document).await?;
        info!(
            region,
            merged_rows = new_rows.len(),
            no_data = no_data_dates.len(),
            total_rows = document.rows.len(),
            "ledger merge committed"
        );
        Ok(())
    }

    /// 地域の全行を日付昇順で返す（診断用途）。
    ///
    /// # Errors
    /// 台帳ファイルの読み取りやデコードに失敗した場合は [`StorageError`]。
    pub(crate) async fn list(
        &self,
        region: &str,
    ) -> Result<BTreeMap<NaiveDate, LedgerRow>, StorageError> {
        Ok(self.load(region).await?.rows)
    }

    async fn load(&self, region: &str) -> Result<LedgerDocument, StorageError> {
        let path = self.ledger_path(region);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LedgerDocument::default());
            }
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt { path, source })
    }

    async fn persist(&self, region: &str, document: &LedgerDocument) -> Result<(), StorageError> {
        let dir = self.region_dir(region);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;

        let path = self.ledger_path(region);
        let tmp_path = dir.join(format!("{LEDGER_FILE_NAME}.tmp-{}", Uuid::new_v4()));
        let payload =
            serde_json::to_vec_pretty(document).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?;

        write_and_sync(&tmp_path, &payload).await?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| StorageError::Io { path, source })?;
        Ok(())
    }
}

async fn write_and_sync(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    let io_error = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    file.write_all(payload).await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    Ok(())
}
