// Audio ingestion
// Reads WAV files, downmixes to mono, resamples to the canonical project
// rate and fingerprints the sample data

use hound::{SampleFormat, WavReader};
use rubato::{FftFixedInOut, Resampler};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

use crate::config::LabConfig;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV file: {0}")]
    WavRead(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt audio data: {0}")]
    Corrupt(String),

    #[error("Audio is {secs:.1}s long, maximum is {max_secs:.1}s")]
    TooLong { secs: f64, max_secs: f64 },

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable mono audio at the canonical project sample rate
/// Shared read-only by every analysis stage
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Mono samples normalized to f32 in range [-1.0, 1.0]
    samples: Vec<f32>,

    /// Sample rate in Hz
    sample_rate: u32,

    /// SHA256 over the raw sample bytes and rate
    /// Used as the audio identity inside stage fingerprints
    checksum: String,
}

impl AudioBuffer {
    /// Build a buffer directly from samples (synthetic input, stems)
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        let checksum = checksum_samples(&samples, sample_rate);
        AudioBuffer {
            samples,
            sample_rate,
            checksum,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square level of the whole buffer
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }

    /// Slice out the samples between two timestamps, clamped to the buffer
    pub fn slice_secs(&self, start_secs: f64, end_secs: f64) -> &[f32] {
        let start = ((start_secs * self.sample_rate as f64) as usize).min(self.samples.len());
        let end = ((end_secs * self.sample_rate as f64) as usize).min(self.samples.len());
        if start >= end {
            return &[];
        }
        &self.samples[start..end]
    }
}

/// Load and validate an audio file, producing a canonical-rate mono buffer
///
/// All rate conversion happens here so downstream stages can assume one
/// sample rate. Fails with a distinguishable kind for unsupported formats,
/// unreadable files and corrupt data.
pub fn load(path: &Path, config: &LabConfig) -> Result<AudioBuffer, AudioError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if extension != "wav" {
        return Err(AudioError::UnsupportedFormat(format!(
            "extension '{}' (expected wav)",
            extension
        )));
    }

    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_rate == 0 {
        return Err(AudioError::Corrupt("sample rate is zero".to_string()));
    }
    if spec.channels == 0 {
        return Err(AudioError::Corrupt("no channels".to_string()));
    }

    // Read and normalize samples to f32 [-1.0, 1.0]
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 8388608.0)
            .collect(),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 2147483648.0)
            .collect(),
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (format, bits) => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                format, bits
            )));
        }
    };

    if interleaved.is_empty() {
        return Err(AudioError::Corrupt("no sample data".to_string()));
    }

    let mono = downmix_mono(&interleaved, spec.channels);

    let secs = mono.len() as f64 / spec.sample_rate as f64;
    if secs > config.max_duration_secs {
        return Err(AudioError::TooLong {
            secs,
            max_secs: config.max_duration_secs,
        });
    }

    let samples = if spec.sample_rate == config.sample_rate {
        mono
    } else {
        log::info!(
            "Resampling {} frames from {} Hz to {} Hz",
            mono.len(),
            spec.sample_rate,
            config.sample_rate
        );
        resample(&mono, spec.sample_rate, config.sample_rate)?
    };

    Ok(AudioBuffer::from_samples(samples, config.sample_rate))
}

/// Downmix interleaved samples to mono by averaging channels
fn downmix_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let channels = channels as usize;
    let frame_count = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frame_count);

    for frame_idx in 0..frame_count {
        let mut sum = 0.0;
        for ch in 0..channels {
            sum += interleaved[frame_idx * channels + ch];
        }
        mono.push(sum / channels as f32);
    }

    mono
}

/// FFT-based mono resampling between two rates
fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioError::Resample("zero sample rate".to_string()));
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, 1024, 1)
            .map_err(|e| AudioError::Resample(e.to_string()))?;

    let expected_len =
        (input.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let mut output: Vec<f32> = Vec::with_capacity(expected_len);

    let mut pos = 0;
    while pos < input.len() {
        let chunk_size = resampler.input_frames_next();
        let end = (pos + chunk_size).min(input.len());

        // Last chunk is zero-padded up to the resampler's frame requirement
        let mut chunk = vec![0.0f32; chunk_size];
        chunk[..end - pos].copy_from_slice(&input[pos..end]);

        let processed = resampler
            .process(&[chunk], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        output.extend_from_slice(&processed[0]);

        pos += chunk_size;
    }

    output.truncate(expected_len);
    Ok(output)
}

fn checksum_samples(samples: &[f32], sample_rate: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sample_rate.to_le_bytes());
    for sample in samples {
        hasher.update(sample.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
