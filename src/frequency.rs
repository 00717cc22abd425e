use crate::types::Frequency;
use regex_lite::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// 周波数トークンの解析エラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrequencyError {
    /// 認識できない書式
    #[error("周波数の書式が不正です: {0}")]
    InvalidFormat(String),

    /// u64 に収まらない値
    #[error("周波数が大きすぎます: {0}")]
    Overflow(String),
}

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)(?:\.(\d*))?([kKmMgG]?)$").expect("静的な正規表現")
    })
}

fn bare_decimal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d*)\.(\d*)$").expect("静的な正規表現"))
}

/// 周波数トークンを Hz に変換
///
/// 2つの書式を受け付ける。
///
/// - 引用符付き: `"121.5M"`, `"121500k"`, `"121500000"`。
///   単位 k/M/G (大文字小文字を問わない) はそれぞれ 10^3/10^6/10^9 倍、
///   単位なしは Hz とみなす。
/// - 引用符なし: 小数点を含めば MHz、含まなければ Hz。
///
/// 結果は常に切り捨て。小数は10進のまま桁をずらして計算するので
/// 浮動小数点の丸め誤差は入らない。
///
/// # Examples
///
/// ```
/// # use airband_relay::frequency::parse_frequency;
/// assert_eq!(parse_frequency("121500000").unwrap(), 121_500_000);
/// assert_eq!(parse_frequency("121.5").unwrap(), 121_500_000);
/// assert_eq!(parse_frequency("\"145.5M\"").unwrap(), 145_500_000);
/// assert_eq!(parse_frequency("\"145.5\"").unwrap(), 145);
/// ```
pub fn parse_frequency(token: &str) -> Result<Frequency, FrequencyError> {
    let token = token.trim();

    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        let inner = &token[1..token.len() - 1];
        let caps = quoted_pattern()
            .captures(inner)
            .ok_or_else(|| FrequencyError::InvalidFormat(token.to_string()))?;

        let int_part = caps.get(1).map_or("", |m| m.as_str());
        let frac_part = caps.get(2).map_or("", |m| m.as_str());
        let exponent = match caps.get(3).map_or("", |m| m.as_str()) {
            "k" | "K" => 3,
            "m" | "M" => 6,
            "g" | "G" => 9,
            _ => 0,
        };
        return scale_decimal(int_part, frac_part, exponent, token);
    }

    if token.contains('.') {
        // 引用符なしの小数は MHz
        let caps = bare_decimal_pattern()
            .captures(token)
            .ok_or_else(|| FrequencyError::InvalidFormat(token.to_string()))?;
        let int_part = caps.get(1).map_or("", |m| m.as_str());
        let frac_part = caps.get(2).map_or("", |m| m.as_str());
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(FrequencyError::InvalidFormat(token.to_string()));
        }
        return scale_decimal(int_part, frac_part, 6, token);
    }

    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrequencyError::InvalidFormat(token.to_string()));
    }
    token
        .parse::<Frequency>()
        .map_err(|_| FrequencyError::Overflow(token.to_string()))
}

/// `int_part.frac_part * 10^exponent` を切り捨てで計算
fn scale_decimal(
    int_part: &str,
    frac_part: &str,
    exponent: usize,
    token: &str,
) -> Result<Frequency, FrequencyError> {
    let overflow = || FrequencyError::Overflow(token.to_string());

    // 指数の桁数までの小数部だけを残し、足りない桁は0で埋める
    let mut digits = String::with_capacity(int_part.len() + exponent);
    digits.push_str(int_part);
    digits.extend(frac_part.chars().take(exponent));
    let kept = frac_part.len().min(exponent);
    digits.extend(std::iter::repeat('0').take(exponent - kept));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse::<Frequency>().map_err(|_| overflow())
}

/// ルーム名などに使う人間向けラベル (例: `145.500MHz`)
///
/// MHz 単位の小数点以下3桁表記。
pub fn frequency_label(frequency: Frequency) -> String {
    format!("{:.3}MHz", frequency as f64 / 1_000_000.0)
}
