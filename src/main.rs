use airband_relay::channels::load_channels;
use airband_relay::config::Config;
use airband_relay::dispatch::DispatchCache;
use airband_relay::frequency::frequency_label;
use airband_relay::matrix_api::MatrixBackend;
use airband_relay::room_backend::RoomBackend;
use airband_relay::uploader::{RecordingUploader, UploadSettings};
use airband_relay::watcher::RecordingWatcher;
use anyhow::Result;
use env_logger::Env;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// ファイル監視 → 非同期ランタイム間のキュー長
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// 設定ファイルのデフォルトパス
const DEFAULT_CONFIG_PATH: &str = "airband-relay.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .filter_module("symphonia", log::LevelFilter::Warn)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper", log::LevelFilter::Warn)
        .init();

    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            args[2].as_str()
        } else {
            DEFAULT_CONFIG_PATH
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // チャンネル一覧表示モード（通信なし）
    // 使い方: --list-channels [rtl_airband.conf] [config.toml]
    if args.len() > 1 && args[1] == "--list-channels" {
        let (conf_arg, config_path) = list_channels_args(&args[2..]);
        let mut config = Config::load_or_default(config_path)?;
        config.apply_env_overrides()?;
        let conf_path = conf_arg
            .map(str::to_string)
            .unwrap_or_else(|| config.channels.config_path.clone());
        let frequencies = load_channels(&conf_path, config.channels.skip_disabled)?;
        println!("{} のチャンネル:", conf_path);
        for frequency in frequencies {
            println!("  {:>12} Hz  {}", frequency, frequency_label(frequency));
        }
        return Ok(());
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        args[1].as_str()
    } else {
        DEFAULT_CONFIG_PATH
    };

    // 設定を読み込み
    let mut config = Config::load_or_default(config_path)?;
    config.apply_env_overrides()?;
    config.validate()?;

    log::info!("airband-relay を起動します");
    log::info!("設定: {:?}", config);

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let matrix = MatrixBackend::login(&config.matrix).await?;
    log::info!("ボットユーザー: {}", matrix.user_id());
    let backend: Arc<dyn RoomBackend> = Arc::new(matrix);

    // チャンネル設定を読み込み
    let frequencies = match load_channels(
        &config.channels.config_path,
        config.channels.skip_disabled,
    ) {
        Ok(frequencies) => frequencies,
        Err(e) => {
            log::error!("{:#}", e);
            Vec::new()
        }
    };
    if frequencies.is_empty() {
        log::error!(
            "設定ファイルに周波数が見つかりません: {}",
            config.channels.config_path
        );
        close_backend(backend.as_ref()).await;
        anyhow::bail!("チャンネルがありません");
    }

    // 周波数 → ルームの対応表を構築（失敗したら起動中止）
    let cache = match DispatchCache::build(
        backend.as_ref(),
        &frequencies,
        &config.matrix.domain,
        config.matrix.room_visibility,
    )
    .await
    {
        Ok(cache) => cache,
        Err(e) => {
            close_backend(backend.as_ref()).await;
            return Err(e);
        }
    };
    log::info!("{} 個の周波数をルームに対応付けました", cache.len());

    let uploader = RecordingUploader::new(
        backend.clone(),
        Arc::new(cache),
        UploadSettings::from(&config.recordings),
    );

    // 録音ディレクトリの監視を開始
    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let mut watcher = RecordingWatcher::start(
        &config.recordings.watch_dir,
        config.recordings.extensions.clone(),
        tx,
    )?;

    log::info!("録音の監視を開始しました (Ctrl+C で停止)");

    // メインループ: ファイル毎に独立したタスクで処理
    let mut tasks = JoinSet::new();
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            Some(event) = rx.recv() => {
                let uploader = uploader.clone();
                tasks.spawn(async move { uploader.handle(event).await });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok(outcome) => log::debug!("処理結果: {:?}", outcome),
                    Err(e) => log::error!("アップロードタスクが異常終了: {}", e),
                }
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                // タイムアウト: ループを継続して running をチェック
            }
        }
    }

    // クリーンアップ
    log::info!("停止処理を開始します...");

    watcher.stop();
    rx.close();

    // 処理中のタスクの完了を待つ
    if !tasks.is_empty() {
        log::info!("処理中の {} 件の完了を待ちます", tasks.len());
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            log::error!("アップロードタスクが異常終了: {}", e);
        }
    }

    close_backend(backend.as_ref()).await;

    log::info!("airband-relay を終了しました");

    Ok(())
}

async fn close_backend(backend: &dyn RoomBackend) {
    if let Err(e) = backend.close().await {
        log::warn!("ログアウトに失敗: {:#}", e);
    }
}

/// `--list-channels` の残りの引数から (rtl_airband.conf, 設定ファイル) を取り出す
fn list_channels_args(rest: &[String]) -> (Option<&str>, &str) {
    let conf_path = rest.first().map(String::as_str);
    let config_path = rest
        .get(1)
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    (conf_path, config_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_list_channels_args() {
        assert_eq!(list_channels_args(&args(&[])), (None, "airband-relay.toml"));
        assert_eq!(
            list_channels_args(&args(&["/etc/rtl_airband.conf"])),
            (Some("/etc/rtl_airband.conf"), "airband-relay.toml")
        );
        assert_eq!(
            list_channels_args(&args(&["rtl.conf", "/etc/airband-relay.toml"])),
            (Some("rtl.conf"), "/etc/airband-relay.toml")
        );
    }
}
