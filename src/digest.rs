use crate::decoder::decode_file;
use crate::types::{AudioDigest, DecodedAudio, WAVEFORM_MAX};
use std::path::Path;

/// 音声ダイジェストエンジン
///
/// デコード済みのサンプル列から再生時間と固定長の波形を計算する。
///
/// # アルゴリズム
///
/// 1. サンプル列を `num_points` 個の連続した区間に分割
///    (区間長は `max(1, サンプル数 / num_points)`)
/// 2. 各区間の RMS (二乗平均平方根) を計算。空の区間と NaN は 0
/// 3. 最大 RMS が 1000 になるように正規化し、切り捨てで整数化
///
/// 音声エネルギーがあれば最大値は必ず 1000 になる。
///
/// # Examples
///
/// ```
/// # use airband_relay::digest::compute_digest;
/// # use airband_relay::types::DecodedAudio;
/// let audio = DecodedAudio {
///     samples: (0..8000).map(|i| if i < 4000 { 0.5 } else { 0.25 }).collect(),
///     sample_rate: 8000,
///     source_channels: 1,
/// };
/// let digest = compute_digest(&audio, 100);
/// assert_eq!(digest.duration_ms, 1000);
/// assert_eq!(digest.waveform[0], 1000);
/// assert_eq!(digest.waveform[99], 500);
/// ```
pub fn compute_digest(audio: &DecodedAudio, num_points: usize) -> AudioDigest {
    AudioDigest {
        duration_ms: audio.duration_ms(),
        waveform: compute_waveform(&audio.samples, num_points),
    }
}

/// 区間毎の RMS を 0〜1000 に正規化した波形を計算
pub fn compute_waveform(samples: &[f32], num_points: usize) -> Vec<u32> {
    if samples.is_empty() {
        return vec![0; num_points];
    }

    let segment_size = (samples.len() / num_points.max(1)).max(1);

    let rms_values: Vec<f64> = (0..num_points)
        .map(|i| {
            let start = (i * segment_size).min(samples.len());
            let end = (start + segment_size).min(samples.len());
            let rms = calculate_rms(&samples[start..end]);
            if rms.is_nan() {
                0.0
            } else {
                rms
            }
        })
        .collect();

    let max_rms = rms_values.iter().copied().fold(0.0f64, f64::max);
    if max_rms <= 0.0 {
        return vec![0; num_points];
    }

    rms_values
        .iter()
        .map(|&rms| {
            let scaled = (rms / max_rms * WAVEFORM_MAX as f64).floor();
            (scaled as u32).min(WAVEFORM_MAX)
        })
        .collect()
}

/// RMS (Root Mean Square) を計算
fn calculate_rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_of_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();

    (sum_of_squares / samples.len() as f64).sqrt()
}

/// ファイルをデコードしてダイジェストを計算
///
/// デコードに失敗してもエラーにはせず、再生時間0・波形全0の
/// ダイジェストを返して警告を出す。
pub fn digest_file<P: AsRef<Path>>(path: P, num_points: usize) -> AudioDigest {
    let path = path.as_ref();
    match decode_file(path) {
        Ok(audio) => {
            let digest = compute_digest(&audio, num_points);
            log::debug!(
                "ダイジェスト計算完了: {:?}, {}ms, {}サンプル @ {}Hz ({}ch)",
                path,
                digest.duration_ms,
                audio.samples.len(),
                audio.sample_rate,
                audio.source_channels
            );
            digest
        }
        Err(e) => {
            log::warn!(
                "音声をデコードできません。再生時間0として扱います: {:?}: {:#}",
                path,
                e
            );
            AudioDigest::silent(num_points)
        }
    }
}
