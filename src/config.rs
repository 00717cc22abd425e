use crate::types::DEFAULT_WAVEFORM_POINTS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub recordings: RecordingsConfig,
}

/// ルームの公開設定
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomVisibility {
    /// ルームディレクトリに公開（招待なしで参加可能）
    Public,
    /// 非公開
    Private,
}

impl RoomVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomVisibility::Public => "public",
            RoomVisibility::Private => "private",
        }
    }
}

/// Matrix ホームサーバー設定
///
/// # デフォルト値
///
/// - `homeserver_url`: "http://localhost:8008"
/// - `user`: "airband"
/// - `password`: "" (環境変数 `BOT_PASSWORD` で与える想定)
/// - `domain`: "localhost"
/// - `room_visibility`: public
#[derive(Clone, Deserialize, Serialize)]
pub struct MatrixConfig {
    #[serde(default = "default_homeserver_url")]
    pub homeserver_url: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_room_visibility")]
    pub room_visibility: RoomVisibility,
}

// パスワードをログに出さない
impl std::fmt::Debug for MatrixConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixConfig")
            .field("homeserver_url", &self.homeserver_url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("domain", &self.domain)
            .field("room_visibility", &self.room_visibility)
            .finish()
    }
}

/// rtl_airband チャンネル設定の読み込み
///
/// # デフォルト値
///
/// - `config_path`: "/etc/rtl_airband.conf"
/// - `skip_disabled`: true (`disable = true;` のチャンネルを除外)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_config_path")]
    pub config_path: String,
    #[serde(default = "default_skip_disabled")]
    pub skip_disabled: bool,
}

/// 録音ディレクトリの監視とアップロード設定
///
/// # デフォルト値
///
/// - `watch_dir`: "/recordings"
/// - `extensions`: ["mp3", "wav", "flac"]
/// - `settle_delay_ms`: 1000 ms (書き込み完了待ち)
/// - `min_duration_ms`: 0 ms (フィルタなし)
/// - `waveform_points`: 100
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingsConfig {
    #[serde(default = "default_watch_dir")]
    pub watch_dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub min_duration_ms: u64,
    #[serde(default = "default_waveform_points")]
    pub waveform_points: usize,
}

// Default functions
fn default_homeserver_url() -> String {
    "http://localhost:8008".to_string()
}

fn default_user() -> String {
    "airband".to_string()
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_room_visibility() -> RoomVisibility {
    RoomVisibility::Public
}

fn default_config_path() -> String {
    "/etc/rtl_airband.conf".to_string()
}

fn default_skip_disabled() -> bool {
    true
}

fn default_watch_dir() -> String {
    "/recordings".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["mp3".to_string(), "wav".to_string(), "flac".to_string()]
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_waveform_points() -> usize {
    DEFAULT_WAVEFORM_POINTS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            matrix: MatrixConfig::default(),
            channels: ChannelsConfig::default(),
            recordings: RecordingsConfig::default(),
        }
    }
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            homeserver_url: default_homeserver_url(),
            user: default_user(),
            password: String::new(),
            domain: default_domain(),
            room_visibility: default_room_visibility(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            skip_disabled: default_skip_disabled(),
        }
    }
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            extensions: default_extensions(),
            settle_delay_ms: default_settle_delay_ms(),
            min_duration_ms: 0,
            waveform_points: default_waveform_points(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use airband_relay::config::Config;
    /// let config = Config::from_file("airband-relay.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    /// 環境変数で設定を上書き
    ///
    /// | 環境変数 | 設定項目 |
    /// |---|---|
    /// | `SYNAPSE_URL` | `matrix.homeserver_url` |
    /// | `BOT_USER` | `matrix.user` |
    /// | `BOT_PASSWORD` | `matrix.password` |
    /// | `MATRIX_DOMAIN` | `matrix.domain` |
    /// | `SKIP_DISABLED_CHANNELS` | `channels.skip_disabled` |
    /// | `RTL_AIRBAND_CONF` | `channels.config_path` |
    /// | `RECORDINGS_DIR` | `recordings.watch_dir` |
    /// | `MIN_AUDIO_DURATION` | `recordings.min_duration_ms` |
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// 任意の取得関数で設定を上書き（テスト用に環境変数から分離）
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SYNAPSE_URL") {
            self.matrix.homeserver_url = v;
        }
        if let Some(v) = lookup("BOT_USER") {
            self.matrix.user = v;
        }
        if let Some(v) = lookup("BOT_PASSWORD") {
            self.matrix.password = v;
        }
        if let Some(v) = lookup("MATRIX_DOMAIN") {
            self.matrix.domain = v;
        }
        if let Some(v) = lookup("SKIP_DISABLED_CHANNELS") {
            self.channels.skip_disabled = parse_bool(&v)
                .with_context(|| format!("SKIP_DISABLED_CHANNELS の値が不正: {}", v))?;
        }
        if let Some(v) = lookup("RTL_AIRBAND_CONF") {
            self.channels.config_path = v;
        }
        if let Some(v) = lookup("RECORDINGS_DIR") {
            self.recordings.watch_dir = v;
        }
        if let Some(v) = lookup("MIN_AUDIO_DURATION") {
            self.recordings.min_duration_ms = v
                .trim()
                .parse()
                .with_context(|| format!("MIN_AUDIO_DURATION の値が不正: {}", v))?;
        }
        Ok(())
    }

    /// 必須項目を検証
    pub fn validate(&self) -> Result<()> {
        if self.matrix.homeserver_url.trim().is_empty() {
            anyhow::bail!("matrix.homeserver_url が空です");
        }
        if self.matrix.user.trim().is_empty() {
            anyhow::bail!("matrix.user が空です");
        }
        if self.matrix.domain.trim().is_empty() {
            anyhow::bail!("matrix.domain が空です");
        }
        if self.recordings.waveform_points == 0 {
            anyhow::bail!("recordings.waveform_points は1以上が必要です");
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => anyhow::bail!("真偽値として解釈できません: {}", other),
    }
}
