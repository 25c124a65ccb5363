/// 日付レンジ展開ユーティリティ。
///
/// リクエストの `[start_date, end_date]` を両端を含む暦日の昇順リストに
/// 展開する。I/Oなしの純関数で、キャンセル対応は不要。
use chrono::NaiveDate;
use thiserror::Error;

/// `end_date` が `start_date` より前の場合のエラー。
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid date range: end {end} is before start {start}")]
pub(crate) struct InvalidRangeError {
    pub(crate) start: NaiveDate,
    pub(crate) end: NaiveDate,
}

/// 両端を含む日付レンジを暦日のリストへ展開する。
///
/// 戻り値は昇順・重複なしで、要素数は `(end - start).num_days() + 1` になる。
///
/// # Errors
/// `end < start` の場合は [`InvalidRangeError`] を返す。
pub(crate) fn expand_date_range(
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NaiveDate>, InvalidRangeError> {
    if end < start {
        return Err(InvalidRangeError { start, end });
    }

    let span = usize::try_from((end - start).num_days()).unwrap_or(0) + 1;
    let mut dates = Vec::with_capacity(span);
    let mut current = start;
    while current <= end {
        dates.push(current);
        let Some(next) = current.succ_opt() else {
            break;
        };
        current = next;
    }
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid test date")
    }

    #[rstest]
    #[case("2024-01-01", "2024-01-01", 1)]
    #[case("2024-01-01", "2024-01-03", 3)]
    #[case("2024-02-27", "2024-03-02", 5)] // うるう年2月をまたぐ
    #[case("2023-12-30", "2024-01-02", 4)]
    fn expand_returns_inclusive_day_count(
        #[case] start: &str,
        #[case] end: &str,
        #[case] expected: usize,
    ) {
        let dates = expand_date_range(date(start), date(end)).expect("valid range");
        assert_eq!(dates.len(), expected);
    }

    #[test]
    fn expand_is_ascending_without_duplicates() {
        let dates =
            expand_date_range(date("2024-01-01"), date("2024-01-31")).expect("valid range");
        assert_eq!(dates.len(), 31);
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(dates.first(), Some(&date("2024-01-01")));
        assert_eq!(dates.last(), Some(&date("2024-01-31")));
    }

    #[test]
    fn expand_rejects_reversed_range() {
        let error = expand_date_range(date("2024-01-03"), date("2024-01-01"))
            .expect_err("reversed range must fail");
        assert_eq!(
            error,
            InvalidRangeError {
                start: date("2024-01-03"),
                end: date("2024-01-01"),
            }
        );
    }
}
