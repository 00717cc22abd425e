use serde::Serialize;
use std::path::PathBuf;

/// 周波数 (Hz)
///
/// チャンネル設定から得られる非負の整数値。
/// ディスパッチキャッシュのキーとして使われる。
pub type Frequency = u64;

/// 波形ダイジェストのデフォルト点数
pub const DEFAULT_WAVEFORM_POINTS: usize = 100;

/// 波形ダイジェストの最大値
pub const WAVEFORM_MAX: u32 = 1000;

/// デコード済みの音声データ
///
/// 1クリップ分のモノラル化されたサンプル列。
/// ダイジェスト計算が終わったら破棄される。
///
/// # Examples
///
/// ```
/// # use airband_relay::types::DecodedAudio;
/// let audio = DecodedAudio {
///     samples: vec![0.0f32; 8000], // 1秒分 @ 8kHz
///     sample_rate: 8000,
///     source_channels: 1,
/// };
/// assert_eq!(audio.duration_ms(), 1000);
/// ```
#[derive(Clone, Debug)]
pub struct DecodedAudio {
    /// モノラルサンプル (-1.0 ~ 1.0)
    pub samples: Vec<f32>,

    /// サンプリングレート (Hz)
    pub sample_rate: u32,

    /// 元ファイルのチャンネル数
    ///
    /// 2以上の場合はフレーム毎に平均してモノラル化済み
    pub source_channels: u16,
}

impl DecodedAudio {
    /// 再生時間（ミリ秒）
    ///
    /// サンプリングレートが0の場合は0を返す。
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// 音声ダイジェスト
///
/// 再生時間と固定長の振幅エンベロープの組。
/// メッセージのペイロードに添付された後に破棄される。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AudioDigest {
    /// 再生時間（ミリ秒）
    pub duration_ms: u64,

    /// 0〜1000 に正規化された RMS 波形
    pub waveform: Vec<u32>,
}

impl AudioDigest {
    /// デコード失敗時の代替ダイジェスト
    pub fn silent(num_points: usize) -> Self {
        Self {
            duration_ms: 0,
            waveform: vec![0; num_points],
        }
    }
}

/// ファイル準備完了イベント
///
/// ファイル監視スレッドから非同期ランタイム側へ渡される。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReadyEvent {
    /// 作成された（またはリネームされた）ファイルのパス
    pub path: PathBuf,
}

/// 音声メッセージの `info` ブロック
#[derive(Clone, Debug, Serialize)]
pub struct AudioInfo {
    pub mimetype: String,
    pub size: u64,
    pub duration: u64,
}

/// MSC1767 の音声ブロック
#[derive(Clone, Debug, Serialize)]
pub struct ExtensibleAudio {
    pub duration: u64,
    pub waveform: Vec<u32>,
}

/// ルームに送信する `m.audio` メッセージ
///
/// # JSON出力例
///
/// ```json
/// {
///   "msgtype": "m.audio",
///   "body": "tower_20250102_143015_121500000.mp3",
///   "url": "mxc://example.org/abcdef",
///   "info": { "mimetype": "audio/mpeg", "size": 48213, "duration": 4210 },
///   "org.matrix.msc1767.audio": { "duration": 4210, "waveform": [0, 12, 1000] },
///   "org.matrix.msc3245.voice": {}
/// }
/// ```
#[derive(Clone, Debug, Serialize)]
pub struct AudioMessage {
    pub msgtype: String,
    pub body: String,
    pub url: String,
    pub info: AudioInfo,
    #[serde(rename = "org.matrix.msc1767.audio")]
    pub audio: ExtensibleAudio,
    #[serde(rename = "org.matrix.msc3245.voice")]
    pub voice: serde_json::Map<String, serde_json::Value>,
}

impl AudioMessage {
    /// アップロード結果とダイジェストからメッセージを作成
    pub fn new(
        filename: String,
        content_uri: String,
        mimetype: &str,
        size: u64,
        digest: &AudioDigest,
    ) -> Self {
        Self {
            msgtype: "m.audio".to_string(),
            body: filename,
            url: content_uri,
            info: AudioInfo {
                mimetype: mimetype.to_string(),
                size,
                duration: digest.duration_ms,
            },
            audio: ExtensibleAudio {
                duration: digest.duration_ms,
                waveform: digest.waveform.clone(),
            },
            voice: serde_json::Map::new(),
        }
    }
}

/// 拡張子から MIME タイプを決定
pub fn mime_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
