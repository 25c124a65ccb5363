/// 地域名のサニタイズ。
///
/// 地域名は人間が付けた任意の文字列で、台帳のディレクトリ名として
/// そのまま使えるとは限らない。パス区切りや制御文字を `_` へ置換し、
/// パストラバーサルに使える「ドットのみ」の名前も潰す。
const ALLOWED_PUNCTUATION: [char; 3] = ['-', '_', '.'];

/// 台帳パスとして安全な地域名を返す。
#[must_use]
pub(crate) fn sanitize_region_name(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c) {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        sanitized
    }
}
