//! Audio ingestion: in-memory items, WAV loading and waveform conditioning.
//!
//! Everything here runs before chunking. Items arrive at arbitrary sample
//! rates and channel layouts; the pipeline only ever sees mono f32 at the
//! tokenizer's configured rate.

pub mod resample;

use std::path::Path;

use tracing::debug;

use crate::error::{Result, TokenizerError};

/// One caller-supplied waveform.
///
/// An item's identity is its position in the submitted batch; the pipeline
/// borrows the samples read-only and never mutates them.
#[derive(Debug, Clone)]
pub struct AudioItem {
    /// Mono f32 samples, nominally in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioItem {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Load a WAV file, downmixing to mono.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let (samples, sample_rate) = read_wav_mono_f32(path.as_ref())?;
        Ok(Self::new(samples, sample_rate))
    }

    /// Returns the duration of this item in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    /// Returns true if the item contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Read a WAV file as mono f32 plus its sample rate.
///
/// Integer PCM is divided by `2^(bits - 1)` of the file's own bit depth; multi-channel
/// frames are averaged.
pub fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    if !path.exists() {
        return Err(TokenizerError::Audio(format!(
            "audio file not found: {}",
            path.display()
        )));
    }
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| TokenizerError::Audio(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TokenizerError::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let full_scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            if spec.bits_per_sample <= 16 {
                reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| v as f32 / full_scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| TokenizerError::Audio(e.to_string()))?
            } else {
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / full_scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| TokenizerError::Audio(e.to_string()))?
            }
        }
    };

    debug!(
        path = %path.display(),
        channels,
        sample_rate = spec.sample_rate,
        frames = interleaved.len() / channels,
        "wav loaded"
    );

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Zero-mean / unit-variance normalization of a whole waveform.
pub fn normalize_waveform(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let denom = (var + 1e-7).sqrt();
    for s in samples.iter_mut() {
        *s = ((*s as f64 - mean) / denom) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_waveform_has_zero_mean_unit_variance() {
        let mut samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin() * 0.3 + 0.1).collect();
        normalize_waveform(&mut samples);
        let n = samples.len() as f32;
        let mean = samples.iter().sum::<f32>() / n;
        let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-4, "mean={mean}");
        assert!((var - 1.0).abs() < 1e-3, "var={var}");
    }

    #[test]
    fn constant_waveform_normalizes_to_zero() {
        let mut samples = vec![0.25f32; 64];
        normalize_waveform(&mut samples);
        assert!(samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn missing_wav_is_audio_error() {
        let err = read_wav_mono_f32(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, TokenizerError::Audio(_)));
    }

    #[test]
    fn integer_pcm_scales_by_its_own_bit_depth() {
        for (bits, hi, lo) in [(8u16, 127i32, -128i32), (16, 32_767, -32_768), (24, 8_388_607, -8_388_608)] {
            let path = std::env::temp_dir().join(format!("dtok-pcm{bits}-{}.wav", std::process::id()));
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 8_000,
                bits_per_sample: bits,
                sample_format: hound::SampleFormat::Int,
            };
            {
                let mut writer = hound::WavWriter::create(&path, spec).unwrap();
                match bits {
                    8 => {
                        writer.write_sample(hi as i8).unwrap();
                        writer.write_sample(lo as i8).unwrap();
                    }
                    16 => {
                        writer.write_sample(hi as i16).unwrap();
                        writer.write_sample(lo as i16).unwrap();
                    }
                    _ => {
                        writer.write_sample(hi).unwrap();
                        writer.write_sample(lo).unwrap();
                    }
                }
                writer.finalize().unwrap();
            }
            let (samples, rate) = read_wav_mono_f32(&path).unwrap();
            std::fs::remove_file(&path).ok();

            assert_eq!(rate, 8_000);
            let full_scale = (1_i64 << (bits - 1)) as f32;
            approx::assert_abs_diff_eq!(samples[0], hi as f32 / full_scale, epsilon = 1e-6);
            approx::assert_abs_diff_eq!(samples[1], -1.0, epsilon = 1e-6);
            assert!(samples[0] > 0.99, "{bits}-bit full scale read as {}", samples[0]);
        }
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let path = std::env::temp_dir().join(format!("dtok-stereo-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for _ in 0..10 {
                writer.write_sample(0.5f32).unwrap();
                writer.write_sample(-0.1f32).unwrap();
            }
            writer.finalize().unwrap();
        }
        let item = AudioItem::from_wav(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(item.sample_rate, 8_000);
        assert_eq!(item.samples.len(), 10);
        assert!(item.samples.iter().all(|s| (s - 0.2).abs() < 1e-6));
    }
}
