//! # Audio Decoding
//!
//! Turns an audio file on disk into the 16kHz mono `f32` samples Whisper expects.
//!
//! ## Supported Inputs:
//! - **WAV**: 8/16/24-bit PCM or 32-bit float, any sample rate and channel count
//! - **Raw PCM** (`.pcm`, `.raw`): headerless 16-bit little-endian, 16kHz mono
//!
//! Multi-channel audio is averaged down to mono; other sample rates are
//! linearly resampled.

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

/// Sample rate every Whisper model is trained on.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Decoded, normalized audio ready for feature extraction.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub source_sample_rate: u32,
    pub source_channels: u16,
}

impl DecodedAudio {
    /// Duration of the normalized audio in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / WHISPER_SAMPLE_RATE as f64
    }
}

/// Load `path` and return 16kHz mono samples in `[-1.0, 1.0]`.
pub fn load_audio(path: &Path) -> Result<DecodedAudio> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let decoded = match extension.as_str() {
        "pcm" | "raw" => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading raw PCM from {}", path.display()))?;
            DecodedAudio {
                samples: pcm_s16le_to_f32(&bytes)?,
                source_sample_rate: WHISPER_SAMPLE_RATE,
                source_channels: 1,
            }
        }
        _ => decode_wav(path)?,
    };

    if decoded.samples.is_empty() {
        bail!("{} contains no audio samples", path.display());
    }

    tracing::debug!(
        path = %path.display(),
        source_sample_rate = decoded.source_sample_rate,
        source_channels = decoded.source_channels,
        seconds = decoded.duration_seconds(),
        "Decoded audio"
    );
    Ok(decoded)
}

fn decode_wav(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let (header, data) = wav::read(&mut reader)
        .with_context(|| format!("{} is not a readable WAV file", path.display()))?;

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    };

    let mono = downmix(&interleaved, header.channel_count)?;
    Ok(DecodedAudio {
        samples: resample_linear(&mono, header.sampling_rate, WHISPER_SAMPLE_RATE),
        source_sample_rate: header.sampling_rate,
        source_channels: header.channel_count,
    })
}

/// Convert headerless 16-bit little-endian PCM bytes to normalized samples.
pub fn pcm_s16le_to_f32(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        bail!("PCM data length must be even for 16-bit samples");
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    Ok(samples)
}

/// Average interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: u16) -> Result<Vec<f32>> {
    match channels {
        0 => Err(anyhow!("WAV header declares zero channels")),
        1 => Ok(interleaved.to_vec()),
        n => {
            let n = n as usize;
            Ok(interleaved
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect())
        }
    }
}

/// Linear-interpolation resampler. Good enough for speech recognition input.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = position.floor() as usize;
            let frac = (position - index as f64) as f32;
            let a = samples[index.min(last)];
            let b = samples[(index + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_wav(path: &Path, channels: u16, rate: u32, samples: Vec<i16>) {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, channels, rate, 16);
        let mut file = File::create(path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file).unwrap();
    }

    #[test]
    fn test_pcm_conversion() {
        let bytes = [0x00, 0x00, 0xff, 0x7f, 0x00, 0x80];
        let samples = pcm_s16le_to_f32(&bytes).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 0.99997).abs() < 1e-4);
        assert_eq!(samples[2], -1.0);

        assert!(pcm_s16le_to_f32(&[0x00]).is_err());
    }

    #[test]
    fn test_downmix_averages_frames() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix(&stereo, 2).unwrap(), vec![0.5, 0.5]);
        assert!(downmix(&stereo, 0).is_err());
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<f32> = (0..32_000).map(|i| i as f32).collect();
        let output = resample_linear(&input, 32_000, 16_000);
        assert_eq!(output.len(), 16_000);
        assert_eq!(output[1], 2.0);
    }

    #[test]
    fn test_load_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        // 0.5s of stereo 32kHz audio
        write_wav(&path, 2, 32_000, vec![1000; 32_000]);

        let audio = load_audio(&path).unwrap();
        assert_eq!(audio.source_channels, 2);
        assert_eq!(audio.source_sample_rate, 32_000);
        assert_eq!(audio.samples.len(), 8_000);
        assert!((audio.duration_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_load_raw_pcm_and_reject_empty() {
        let dir = tempfile::tempdir().unwrap();

        let raw = dir.path().join("clip.pcm");
        let mut file = File::create(&raw).unwrap();
        file.write_all(&[0x10, 0x00, 0x20, 0x00]).unwrap();
        assert_eq!(load_audio(&raw).unwrap().samples.len(), 2);

        let empty = dir.path().join("empty.raw");
        File::create(&empty).unwrap();
        assert!(load_audio(&empty).is_err());
    }
}
