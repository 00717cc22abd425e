use crate::types::DecodedAudio;
use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// 音声ファイルをデコードしてモノラルのサンプル列にする
///
/// 拡張子で形式を判定する。
///
/// - `wav`: hound
/// - `flac`: claxon
/// - それ以外 (mp3 など): symphonia
///
/// 複数チャンネルのファイルはフレーム毎の平均でモノラル化する。
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<DecodedAudio> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "wav" => decode_wav(path),
        "flac" => decode_flac(path),
        _ => decode_with_symphonia(path, &extension),
    }
}

fn decode_wav(path: &Path) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("WAVファイルを開けません: {:?}", path))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("WAVサンプルの読み込みに失敗")?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("WAVサンプルの読み込みに失敗")?,
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
        source_channels: spec.channels,
    })
}

fn decode_flac(path: &Path) -> Result<DecodedAudio> {
    let mut reader = claxon::FlacReader::open(path)
        .map_err(|e| anyhow::anyhow!("FLACリーダーの初期化に失敗: {:?}: {:?}", path, e))?;

    let streaminfo = reader.streaminfo();
    let channels = streaminfo.channels as u16;
    let scale = (1i64 << (streaminfo.bits_per_sample.max(1) - 1)) as f32;
    let total_samples = streaminfo.samples.unwrap_or(0) as usize * channels as usize;

    let mut interleaved = Vec::with_capacity(total_samples);
    for sample in reader.samples() {
        let sample =
            sample.map_err(|e| anyhow::anyhow!("FLACサンプルの読み込みに失敗: {:?}", e))?;
        interleaved.push(sample as f32 / scale);
    }

    // FLACはブロック境界にパディングする可能性がある
    if total_samples > 0 && interleaved.len() > total_samples {
        interleaved.truncate(total_samples);
    }

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: streaminfo.sample_rate,
        source_channels: channels,
    })
}

fn decode_with_symphonia(path: &Path, extension: &str) -> Result<DecodedAudio> {
    let src = File::open(path).with_context(|| format!("音声ファイルを開けません: {:?}", path))?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if !extension.is_empty() {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("音声形式を判別できません: {:?}", path))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .with_context(|| format!("音声トラックがありません: {:?}", path))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("デコーダーの作成に失敗")?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e).context("パケットの読み込みに失敗"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                samples.extend(downmix(sample_buf.samples(), channels));
            }
            // 壊れたフレームは読み飛ばす
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("フレームのデコードに失敗: {:?}: {}", path, e);
            }
            Err(e) => return Err(e).context("音声のデコードに失敗"),
        }
    }

    if sample_rate == 0 {
        anyhow::bail!("サンプリングレートが不明です: {:?}", path);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        source_channels: channels.max(1),
    })
}

/// インターリーブされたサンプルをフレーム毎に平均してモノラル化
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flacenc::bitsink::ByteSink;
    use flacenc::component::BitRepr;
    use flacenc::error::Verify;
    use flacenc::source::MemSource;
    use std::fs;
    use tempfile::TempDir;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn encode_flac(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let samples_i32: Vec<i32> = samples.iter().map(|&s| s as i32).collect();
        let source = MemSource::from_samples(&samples_i32, 1, 16, sample_rate as usize);
        let config = flacenc::config::Encoder::default()
            .into_verified()
            .map_err(|e| format!("{:?}", e))
            .unwrap();
        let flac_stream =
            flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
                .map_err(|e| format!("{:?}", e))
                .unwrap();
        let mut sink = ByteSink::new();
        flac_stream
            .write(&mut sink)
            .map_err(|e| format!("{:?}", e))
            .unwrap();
        sink.into_inner()
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix(&[0.5, -0.5, 1.0, 0.0], 2), vec![0.0, 0.5]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
        // 端数のフレームは捨てる
        assert_eq!(downmix(&[0.5, 0.5, 1.0], 2), vec![0.5]);
    }

    #[test]
    fn test_decode_mono_wav() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_121500000.wav");
        write_wav(&path, 1, 8000, &vec![16384i16; 4000]);

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.source_channels, 1);
        assert_eq!(audio.samples.len(), 4000);
        assert!((audio.samples[0] - 0.5).abs() < 1e-6);
        assert_eq!(audio.duration_ms(), 500);
    }

    #[test]
    fn test_decode_stereo_wav_is_downmixed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stereo.wav");
        let interleaved: Vec<i16> = (0..2000)
            .flat_map(|_| [16384i16, 0i16])
            .collect();
        write_wav(&path, 2, 16000, &interleaved);

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.source_channels, 2);
        assert_eq!(audio.samples.len(), 2000);
        assert!((audio.samples[0] - 0.25).abs() < 1e-6);
        assert_eq!(audio.duration_ms(), 125);
    }

    #[test]
    fn test_decode_flac() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip_118150000.flac");
        let samples: Vec<i16> = (0..16000)
            .map(|i| ((i as f32 * 0.1).sin() * 10000.0) as i16)
            .collect();
        fs::write(&path, encode_flac(&samples, 16000)).unwrap();

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples.len(), 16000);
        assert_eq!(audio.duration_ms(), 1000);
    }

    #[test]
    fn test_symphonia_decodes_and_downmixes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tower_121500000.wav");
        let interleaved: Vec<i16> = (0..4000)
            .flat_map(|_| [16384i16, 0i16])
            .collect();
        write_wav(&path, 2, 8000, &interleaved);

        let audio = decode_with_symphonia(&path, "wav").unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.source_channels, 2);
        assert_eq!(audio.samples.len(), 4000);
        assert!((audio.samples[0] - 0.25).abs() < 1e-6);
        assert!((audio.samples[3999] - 0.25).abs() < 1e-6);
        assert_eq!(audio.duration_ms(), 500);
    }

    #[test]
    fn test_decode_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["broken.wav", "broken.flac"] {
            let path = temp_dir.path().join(name);
            fs::write(&path, b"this is not audio at all").unwrap();
            assert!(decode_file(&path).is_err(), "{} はエラーになるはず", name);
        }
    }

    #[test]
    fn test_decode_missing_file() {
        assert!(decode_file("/nonexistent/clip_1.mp3").is_err());
    }
}
