//! airband-relay - rtl_airband の録音を周波数毎の Matrix ルームへ転送するシステム
//!
//! rtl_airband の設定ファイルからチャンネル（周波数）を読み取り、
//! 周波数毎にルームを用意する。録音ディレクトリに新しいクリップが
//! 現れたら、再生時間と波形を計算して対応するルームへ送信する。
//!
//! # 主な機能
//!
//! - **チャンネル設定の解析**: `channels: ( ... );` セクションの括弧の対応を数えて抽出し、無効なチャンネルを除外
//! - **周波数表記の変換**: `121500000` / `121.5` / `"121.5M"` などの表記を Hz に統一
//! - **音声ダイジェスト**: 再生時間 (ms) と 100 点の RMS 波形 (0〜1000)
//! - **最小再生時間フィルタ**: スケルチのノイズなど短すぎるクリップを破棄
//! - **Matrix 連携**: ルームの解決・作成、メディアのアップロード、音声メッセージの送信
//!
//! # アーキテクチャ
//!
//! ```text
//! [rtl_airband.conf] → [channels] → [DispatchCache] ← [RoomBackend]
//!                                          ↓                ↑
//! [録音ディレクトリ] → [RecordingWatcher] → mpsc → [RecordingUploader]
//!                                                       ↓
//!                                              [decoder] → [digest]
//! ```
//!
//! # 使用例
//!
//! ```
//! use airband_relay::channels::parse_channels;
//! use airband_relay::frequency::frequency_label;
//!
//! let conf = r#"channels: ( { freq = 121.5; }, { freq = "118150k"; } );"#;
//! let labels: Vec<String> = parse_channels(conf, true)
//!     .into_iter()
//!     .map(frequency_label)
//!     .collect();
//! assert_eq!(labels, vec!["121.500MHz", "118.150MHz"]);
//! ```

pub mod channels;
pub mod config;
pub mod decoder;
pub mod digest;
pub mod dispatch;
pub mod frequency;
pub mod matrix_api;
pub mod room_backend;
pub mod types;
pub mod uploader;
pub mod watcher;
