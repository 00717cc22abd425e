use crate::config::RecordingsConfig;
use crate::digest::digest_file;
use crate::dispatch::DispatchCache;
use crate::frequency::frequency_label;
use crate::room_backend::RoomBackend;
use crate::types::{mime_type_for, AudioDigest, AudioMessage, FileReadyEvent, Frequency};
use anyhow::{Context, Result};
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// ファイル名から周波数を取り出す (`..._<digits>.<ext>`)
pub fn extract_frequency<P: AsRef<Path>>(path: P) -> Option<Frequency> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"_(\d+)\.[A-Za-z0-9]+$").expect("静的な正規表現"));

    let filename = path.as_ref().file_name()?.to_str()?;
    pattern
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// 1ファイル分の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// アップロードとメッセージ送信に成功
    Sent { room_id: String, content_uri: String },
    /// ファイル名に周波数が含まれない
    NoFrequency,
    /// 対応するルームがない周波数
    Unmapped(Frequency),
    /// 最小再生時間に満たない
    TooShort { duration_ms: u64 },
    /// ファイル読み込み・アップロード・送信のいずれかに失敗
    Failed,
}

/// アップロード処理の設定
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// ファイルに触る前の待ち時間（書き込み途中の読み込み防止）
    pub settle_delay: Duration,
    /// これより短いクリップは送信しない (ms)
    pub min_duration_ms: u64,
    /// 波形の点数
    pub waveform_points: usize,
}

impl From<&RecordingsConfig> for UploadSettings {
    fn from(config: &RecordingsConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            min_duration_ms: config.min_duration_ms,
            waveform_points: config.waveform_points,
        }
    }
}

/// 録音ファイルをルームへ送る処理パイプライン
///
/// 待機 → デコード → ダイジェスト → アップロード → 送信 を1ファイルずつ順に行う。
/// 対応表は起動時に構築された読み取り専用のものを共有する。
#[derive(Clone)]
pub struct RecordingUploader {
    backend: Arc<dyn RoomBackend>,
    cache: Arc<DispatchCache>,
    settings: UploadSettings,
}

impl RecordingUploader {
    pub fn new(
        backend: Arc<dyn RoomBackend>,
        cache: Arc<DispatchCache>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            backend,
            cache,
            settings,
        }
    }

    /// ファイルの送り先ルームを決定
    pub fn route(&self, path: &Path) -> Result<(Frequency, String), UploadOutcome> {
        let frequency = extract_frequency(path).ok_or(UploadOutcome::NoFrequency)?;
        let room_id = self
            .cache
            .get(frequency)
            .ok_or(UploadOutcome::Unmapped(frequency))?;
        Ok((frequency, room_id.to_string()))
    }

    /// ファイル準備完了イベントを処理
    pub async fn handle(&self, event: FileReadyEvent) -> UploadOutcome {
        let path = event.path;

        let (frequency, room_id) = match self.route(&path) {
            Ok(routed) => routed,
            Err(outcome) => {
                match &outcome {
                    UploadOutcome::NoFrequency => {
                        log::warn!("ファイル名から周波数を取得できないため破棄します: {:?}", path)
                    }
                    UploadOutcome::Unmapped(frequency) => log::warn!(
                        "{} に対応するルームがないため破棄します: {:?}",
                        frequency_label(*frequency),
                        path
                    ),
                    _ => {}
                }
                return outcome;
            }
        };

        log::info!(
            "{} の新しい録音: {:?} → {}",
            frequency_label(frequency),
            path,
            room_id
        );

        // 書き込み完了を待つ
        tokio::time::sleep(self.settings.settle_delay).await;

        let digest = self.compute_digest(path.clone()).await;
        if digest.duration_ms < self.settings.min_duration_ms {
            log::info!(
                "再生時間 {}ms が最小値 {}ms 未満のためスキップ: {:?}",
                digest.duration_ms,
                self.settings.min_duration_ms,
                path
            );
            return UploadOutcome::TooShort {
                duration_ms: digest.duration_ms,
            };
        }

        match self.upload_and_send(&path, &room_id, &digest).await {
            Ok(content_uri) => {
                log::info!("送信完了: {:?} → {} ({})", path, room_id, content_uri);
                UploadOutcome::Sent {
                    room_id,
                    content_uri,
                }
            }
            Err(e) => {
                log::error!("アップロードに失敗: {:?}: {:#}", path, e);
                UploadOutcome::Failed
            }
        }
    }

    /// デコードはブロッキング処理なので専用スレッドで実行
    async fn compute_digest(&self, path: PathBuf) -> AudioDigest {
        let num_points = self.settings.waveform_points;
        match tokio::task::spawn_blocking(move || digest_file(path, num_points)).await {
            Ok(digest) => digest,
            Err(e) => {
                log::warn!("ダイジェスト計算タスクが異常終了: {}", e);
                AudioDigest::silent(num_points)
            }
        }
    }

    async fn upload_and_send(
        &self,
        path: &Path,
        room_id: &str,
        digest: &AudioDigest,
    ) -> Result<String> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("ファイルの読み込みに失敗: {:?}", path))?;
        let size = data.len() as u64;

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        let mime_type = mime_type_for(extension);

        let content_uri = self
            .backend
            .upload(data, mime_type, &filename)
            .await
            .context("アップロード失敗")?;
        log::debug!("アップロード完了: {}", content_uri);

        let message = AudioMessage::new(filename, content_uri.clone(), mime_type, size, digest);
        self.backend
            .send_message(room_id, &message)
            .await
            .context("メッセージ送信失敗")?;

        Ok(content_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room_backend::testing::{Call, MockBackend};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn settings(min_duration_ms: u64) -> UploadSettings {
        UploadSettings {
            settle_delay: Duration::ZERO,
            min_duration_ms,
            waveform_points: 100,
        }
    }

    fn uploader(backend: Arc<MockBackend>, min_duration_ms: u64) -> RecordingUploader {
        let mut rooms = HashMap::new();
        rooms.insert(121_500_000, "!tower:example.org".to_string());
        RecordingUploader::new(
            backend,
            Arc::new(DispatchCache::from_map(rooms)),
            settings(min_duration_ms),
        )
    }

    fn write_wav(path: &Path, sample_rate: u32, num_samples: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..num_samples {
            writer
                .write_sample(((i as f32 * 0.1).sin() * 10000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_extract_frequency() {
        assert_eq!(
            extract_frequency("/recordings/tower_20250102_143015_121500000.mp3"),
            Some(121_500_000)
        );
        assert_eq!(extract_frequency("ground_118150000.wav"), Some(118_150_000));
        assert_eq!(extract_frequency("/recordings/tower_121500000.mp3.tmp"), None);
        assert_eq!(extract_frequency("/recordings/tower.mp3"), None);
        assert_eq!(extract_frequency("/recordings/tower_abc.mp3"), None);
        assert_eq!(extract_frequency("/recordings/_121500000"), None);
        assert_eq!(extract_frequency("/recordings/x_99999999999999999999999.mp3"), None);
    }

    #[test]
    fn test_settings_from_config() {
        let config = RecordingsConfig::default();
        let settings = UploadSettings::from(&config);
        assert_eq!(settings.settle_delay, Duration::from_millis(1000));
        assert_eq!(settings.min_duration_ms, 0);
        assert_eq!(settings.waveform_points, 100);
    }

    #[tokio::test]
    async fn test_mapped_clip_is_uploaded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_20250102_143015_121500000.wav");
        write_wav(&path, 8000, 4000); // 500ms

        let backend = Arc::new(MockBackend::new());
        let outcome = uploader(backend.clone(), 250)
            .handle(FileReadyEvent { path: path.clone() })
            .await;

        assert_eq!(
            outcome,
            UploadOutcome::Sent {
                room_id: "!tower:example.org".to_string(),
                content_uri: "mxc://test/tower_20250102_143015_121500000.wav".to_string(),
            }
        );

        let size = fs::metadata(&path).unwrap().len() as usize;
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            Call::Upload {
                mime_type: "audio/wav".to_string(),
                filename: "tower_20250102_143015_121500000.wav".to_string(),
                size,
            }
        );
        assert_eq!(
            calls[1],
            Call::Send {
                room_id: "!tower:example.org".to_string(),
                body: "tower_20250102_143015_121500000.wav".to_string(),
                duration_ms: 500,
                waveform_len: 100,
            }
        );
    }

    #[test]
    fn test_route_distinguishes_drop_reasons() {
        let uploader = uploader(Arc::new(MockBackend::new()), 0);
        assert_eq!(
            uploader.route(Path::new("/recordings/tower_121500000.mp3")),
            Ok((121_500_000, "!tower:example.org".to_string()))
        );
        assert_eq!(
            uploader.route(Path::new("/recordings/tower_132025000.mp3")),
            Err(UploadOutcome::Unmapped(132_025_000))
        );
        assert_eq!(
            uploader.route(Path::new("/recordings/tower.mp3")),
            Err(UploadOutcome::NoFrequency)
        );
    }

    #[tokio::test]
    async fn test_unmapped_frequency_makes_no_network_call() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_132025000.wav");
        write_wav(&path, 8000, 4000);

        let backend = Arc::new(MockBackend::new());
        let outcome = uploader(backend.clone(), 0)
            .handle(FileReadyEvent { path })
            .await;

        assert_eq!(outcome, UploadOutcome::Unmapped(132_025_000));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_filename_without_frequency_is_dropped() {
        let backend = Arc::new(MockBackend::new());
        let outcome = uploader(backend.clone(), 0)
            .handle(FileReadyEvent {
                path: PathBuf::from("/recordings/notes.txt"),
            })
            .await;

        assert_eq!(outcome, UploadOutcome::NoFrequency);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_short_clip_is_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_121500000.wav");
        write_wav(&path, 8000, 800); // 100ms

        let backend = Arc::new(MockBackend::new());
        let outcome = uploader(backend.clone(), 250)
            .handle(FileReadyEvent { path })
            .await;

        assert_eq!(outcome, UploadOutcome::TooShort { duration_ms: 100 });
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_clip_is_filtered_by_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_121500000.mp3");
        fs::write(&path, b"garbage").unwrap();

        let backend = Arc::new(MockBackend::new());
        let outcome = uploader(backend.clone(), 1)
            .handle(FileReadyEvent { path })
            .await;

        assert_eq!(outcome, UploadOutcome::TooShort { duration_ms: 0 });
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_skips_send() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_121500000.wav");
        write_wav(&path, 8000, 4000);

        let backend = Arc::new(MockBackend {
            fail_upload: true,
            ..MockBackend::default()
        });
        let outcome = uploader(backend.clone(), 0)
            .handle(FileReadyEvent { path })
            .await;

        assert_eq!(outcome, UploadOutcome::Failed);
        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::Upload { .. }));
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_121500000.wav");
        write_wav(&path, 8000, 4000);

        let backend = Arc::new(MockBackend {
            fail_send: true,
            ..MockBackend::default()
        });
        let outcome = uploader(backend.clone(), 0)
            .handle(FileReadyEvent { path })
            .await;

        assert_eq!(outcome, UploadOutcome::Failed);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_file_removed_before_upload() {
        let backend = Arc::new(MockBackend::new());
        let outcome = uploader(backend.clone(), 0)
            .handle(FileReadyEvent {
                path: PathBuf::from("/nonexistent/tower_121500000.wav"),
            })
            .await;

        assert_eq!(outcome, UploadOutcome::Failed);
        assert!(backend.calls().is_empty());
    }
}
