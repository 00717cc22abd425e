use crate::types::FileReadyEvent;
use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// 録音ディレクトリの監視
///
/// 通知はファイル監視スレッド上で呼ばれるので、非同期ランタイムへは
/// チャンネル経由で渡す（コールバック内では待たない）。
/// 作成とリネーム先の両方を「ファイル準備完了」として扱う。
pub struct RecordingWatcher {
    watch_dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl RecordingWatcher {
    /// 監視を開始
    ///
    /// ディレクトリが存在しない場合は作成する。サブディレクトリは監視しない。
    ///
    /// # Arguments
    /// * `watch_dir` - 監視するディレクトリ
    /// * `extensions` - 対象とする拡張子（大文字小文字を区別しない）
    /// * `sender` - 非同期ランタイム側への送信チャンネル
    pub fn start<P: AsRef<Path>>(
        watch_dir: P,
        extensions: Vec<String>,
        sender: mpsc::Sender<FileReadyEvent>,
    ) -> Result<Self> {
        let watch_dir = watch_dir.as_ref().to_path_buf();

        if !watch_dir.exists() {
            fs::create_dir_all(&watch_dir)
                .with_context(|| format!("録音ディレクトリの作成に失敗: {:?}", watch_dir))?;
            log::info!("録音ディレクトリを作成しました: {:?}", watch_dir);
        }

        let extensions: Vec<String> = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for path in ready_paths(&event) {
                        if !has_extension(&path, &extensions) {
                            log::debug!("対象外のファイルを無視: {:?}", path);
                            continue;
                        }
                        log::debug!("ファイル準備完了: {:?}", path);

                        // 非同期送信（ブロッキングしない）
                        match sender.try_send(FileReadyEvent { path }) {
                            Ok(_) => {}
                            Err(mpsc::error::TrySendError::Full(event)) => {
                                log::warn!("イベントキューが満杯のため破棄: {:?}", event.path);
                            }
                            Err(mpsc::error::TrySendError::Closed(event)) => {
                                log::warn!("イベントキューがクローズ済み: {:?}", event.path);
                            }
                        }
                    }
                }
                Err(e) => log::error!("ファイル監視エラー: {}", e),
            }
        })
        .context("ファイル監視の作成に失敗")?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("ディレクトリの監視開始に失敗: {:?}", watch_dir))?;

        log::info!("録音ディレクトリの監視を開始しました: {:?}", watch_dir);

        Ok(Self {
            watch_dir,
            watcher: Some(watcher),
        })
    }

    /// 監視を停止
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.watch_dir) {
                log::debug!("監視解除エラー: {}", e);
            }
            drop(watcher);
            log::info!("録音ディレクトリの監視を停止しました");
        }
    }
}

impl Drop for RecordingWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// イベントから「準備完了」になったファイルのパスを取り出す
///
/// - 作成: 対象パス
/// - リネーム: 移動先のパス (`foo.mp3.tmp` → `foo.mp3`)
///
/// リネームは `To` と `Both` の2回通知されるので `To` だけを使う。
/// 外部から移動してきたファイルも `To` で届く。
fn ready_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::File)
        | EventKind::Create(CreateKind::Any)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().filter(|p| !p.is_dir()).cloned().collect()
        }
        _ => Vec::new(),
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
