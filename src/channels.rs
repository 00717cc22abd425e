use crate::frequency::parse_frequency;
use crate::types::Frequency;
use anyhow::{Context, Result};
use regex_lite::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// `channels: ( ... );` セクションが見つからない理由
///
/// 診断用。どの理由でも「チャンネルなし」として扱われる。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    #[error("'channels:' セクションが見つかりません")]
    MissingChannelsKeyword,

    #[error("'channels:' の後に '(' が見つかりません")]
    MissingOpenParen,

    #[error("'channels: (' に対応する ')' が見つかりません")]
    UnbalancedParens,

    #[error("閉じ括弧 ')' の直後に ';' がありません")]
    MissingTerminator,
}

/// 1つのチャンネル定義 (`{ ... }` の中身)
///
/// 解析中だけ存在する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBlock<'a> {
    text: &'a str,
}

fn disable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bdisable\s*=\s*true\s*;").expect("静的な正規表現"))
}

fn freq_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bfreq\s*=\s*(.*?);").expect("静的な正規表現"))
}

impl<'a> ChannelBlock<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    /// ブロックの生テキスト
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// `disable = true;` が含まれているか
    pub fn is_disabled(&self) -> bool {
        disable_pattern().is_match(self.text)
    }

    /// `freq = <token>;` の `<token>` 部分 (最初の1つ)
    pub fn freq_token(&self) -> Option<&'a str> {
        freq_pattern()
            .captures(self.text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
    }
}

/// `channels: ( ... );` の括弧内を取り出す
///
/// 値の中に括弧が含まれていても良いように、ネストを数えて
/// 対応する閉じ括弧を探す。閉じ括弧の直後は `;` でなければならない。
pub fn extract_channels_section(content: &str) -> Result<&str, ExtractError> {
    let channels_start = content
        .find("channels:")
        .ok_or(ExtractError::MissingChannelsKeyword)?;

    let paren_start = content[channels_start..]
        .find('(')
        .map(|offset| channels_start + offset)
        .ok_or(ExtractError::MissingOpenParen)?;

    let mut depth = 0usize;
    for (i, c) in content[paren_start..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let close = paren_start + i;
                    return if content[close + 1..].starts_with(';') {
                        Ok(&content[paren_start + 1..close])
                    } else {
                        Err(ExtractError::MissingTerminator)
                    };
                }
            }
            _ => {}
        }
    }

    Err(ExtractError::UnbalancedParens)
}

/// セクション本文を `{` と直後の `}` で区切ったブロックに分割
///
/// チャンネル定義はネストしない前提。閉じられていない `{` 以降は無視する。
pub fn split_channel_blocks(section: &str) -> Vec<ChannelBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = section;

    while let Some(open) = rest.find('{') {
        let after_open = &rest[open + 1..];
        match after_open.find('}') {
            Some(close) => {
                blocks.push(ChannelBlock::new(&after_open[..close]));
                rest = &after_open[close + 1..];
            }
            None => break,
        }
    }

    blocks
}

/// 設定テキストからチャンネルブロックを抽出
pub fn extract_channel_blocks(content: &str) -> Result<Vec<ChannelBlock<'_>>, ExtractError> {
    extract_channels_section(content).map(split_channel_blocks)
}

/// 設定テキストからチャンネル周波数の一覧を作成
///
/// 出現順を保ち、重複は除去しない。
/// 1つのチャンネルの周波数が解析できなくても残りの処理は続ける。
/// セクションが見つからない場合は空の一覧を返す。
///
/// # Examples
///
/// ```
/// # use airband_relay::channels::parse_channels;
/// let conf = r#"
/// devices: ({
///   channels: (
///     { freq = 121500000; },
///     { freq = "145.5M"; disable = true; }
///   );
/// });
/// "#;
/// assert_eq!(parse_channels(conf, true), vec![121_500_000]);
/// assert_eq!(parse_channels(conf, false), vec![121_500_000, 145_500_000]);
/// ```
pub fn parse_channels(content: &str, skip_disabled: bool) -> Vec<Frequency> {
    let blocks = match extract_channel_blocks(content) {
        Ok(blocks) => blocks,
        Err(e) => {
            log::warn!("チャンネル設定を抽出できません: {}", e);
            return Vec::new();
        }
    };

    log::info!("チャンネルブロックを {} 件検出", blocks.len());

    let mut frequencies = Vec::with_capacity(blocks.len());
    let mut enabled_count = 0;

    for block in &blocks {
        let disabled = block.is_disabled();
        if !disabled {
            enabled_count += 1;
        }
        if skip_disabled && disabled {
            log::debug!("無効なチャンネルをスキップ: {{{}}}", block.text().trim());
            continue;
        }

        let Some(token) = block.freq_token() else {
            log::debug!("freq の指定がないブロック: {{{}}}", block.text().trim());
            continue;
        };

        match parse_frequency(token) {
            Ok(frequency) => frequencies.push(frequency),
            Err(e) => log::warn!("周波数 '{}' を解析できません: {}", token, e),
        }
    }

    log::info!("有効なチャンネル数: {}", enabled_count);

    frequencies
}

/// 設定ファイルを読み込んでチャンネル周波数の一覧を作成
///
/// # Errors
///
/// ファイルを開けない場合にエラーを返す。呼び出し側は空の一覧と
/// 同じく扱ってよい。
pub fn load_channels<P: AsRef<Path>>(path: P, skip_disabled: bool) -> Result<Vec<Frequency>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("チャンネル設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
    Ok(parse_channels(&content, skip_disabled))
}
