// Spectral feature extraction
// Spectral-flux onset envelope and peak picking, frequency-band energy
// profiles for drum classification, and pitch-class profiles for chords

use realfft::RealFftPlanner;

use crate::audio::source::AudioBuffer;
use crate::config::FrameConfig;

/// Detected onset
#[derive(Debug, Clone)]
pub struct Onset {
    /// Timestamp in seconds from start of audio
    pub time_secs: f64,

    /// Onset strength [0.0, 1.0]
    pub strength: f32,
}

/// Apply Hann window function to reduce spectral leakage
pub fn apply_hann_window(samples: &mut [f32]) {
    let n = samples.len();
    if n == 0 {
        return;
    }

    for (i, sample) in samples.iter_mut().enumerate() {
        let window_val = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos());
        *sample *= window_val;
    }
}

/// Compute real FFT and return the magnitude spectrum
pub fn compute_fft(samples: &[f32]) -> Vec<f32> {
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(samples.len());

    let mut input = samples.to_vec();
    let mut spectrum = fft.make_output_vec();

    fft.process(&mut input, &mut spectrum).unwrap();

    spectrum.iter().map(|c| c.norm()).collect()
}

/// Onset-strength envelope: per-frame spectral flux
/// Flux = sum of positive differences between consecutive magnitude spectra
pub fn onset_envelope(samples: &[f32], frame: &FrameConfig) -> Vec<f32> {
    let window_size = frame.window_size;
    let hop_size = frame.hop_size;

    if hop_size == 0 || samples.len() < window_size {
        return Vec::new();
    }

    let num_frames = (samples.len() - window_size) / hop_size + 1;
    let mut flux = Vec::with_capacity(num_frames);
    let mut prev_spectrum: Option<Vec<f32>> = None;

    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_size;
        let mut windowed = samples[start..start + window_size].to_vec();
        apply_hann_window(&mut windowed);
        let spectrum = compute_fft(&windowed);

        let frame_flux = if let Some(ref prev) = prev_spectrum {
            let mut sum = 0.0;
            for (curr, prev) in spectrum.iter().zip(prev.iter()) {
                let diff = curr - prev;
                if diff > 0.0 {
                    sum += diff;
                }
            }
            sum
        } else {
            0.0
        };

        flux.push(frame_flux);
        prev_spectrum = Some(spectrum);
    }

    flux
}

/// Pick onset peaks from an envelope using an adaptive threshold
/// Threshold = mean + sensitivity * std; peaks closer than min_gap_secs to
/// the previous accepted onset are suppressed
pub fn pick_onset_peaks(
    envelope: &[f32],
    sample_rate: u32,
    frame: &FrameConfig,
    sensitivity: f32,
    min_gap_secs: f64,
) -> Vec<Onset> {
    if envelope.len() < 3 || frame.hop_size == 0 || sample_rate == 0 {
        return Vec::new();
    }

    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    let variance =
        envelope.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / envelope.len() as f32;
    let std_dev = variance.sqrt();
    let threshold = mean + sensitivity * std_dev;

    let hop_secs = frame.hop_secs(sample_rate);
    let min_gap_frames = (min_gap_secs / hop_secs).round() as usize;

    let mut onsets = Vec::new();
    let mut last_onset_frame: Option<usize> = None;

    for i in 1..envelope.len() - 1 {
        let is_peak = envelope[i] > envelope[i - 1] && envelope[i] > envelope[i + 1];
        let above_threshold = envelope[i] > threshold;
        let gap_ok = match last_onset_frame {
            Some(last) => i - last >= min_gap_frames,
            None => true,
        };

        if is_peak && above_threshold && gap_ok {
            let strength = (envelope[i] - threshold) / (std_dev + 1e-6);
            onsets.push(Onset {
                time_secs: i as f64 * hop_secs,
                strength: strength.clamp(0.0, 1.0),
            });
            last_onset_frame = Some(i);
        }
    }

    onsets
}

/// Detect onsets in a buffer via spectral flux
pub fn detect_onsets(buffer: &AudioBuffer, frame: &FrameConfig, sensitivity: f32) -> Vec<Onset> {
    let envelope = onset_envelope(buffer.samples(), frame);
    pick_onset_peaks(&envelope, buffer.sample_rate(), frame, sensitivity, 0.03)
}

/// Energy ratios across frequency bands
/// Returns one normalized ratio per (low_hz, high_hz) band
pub fn band_energy_ratios(samples: &[f32], sample_rate: u32, bands: &[(f32, f32)]) -> Vec<f32> {
    if samples.is_empty() || sample_rate == 0 {
        return vec![0.0; bands.len()];
    }

    // Cover the whole segment (capped), keeping the length even for the FFT
    let window_size = (samples.len().min(8192) & !1).max(2);
    let mut windowed = vec![0.0; window_size];
    let copy_len = samples.len().min(window_size);
    windowed[..copy_len].copy_from_slice(&samples[..copy_len]);
    apply_hann_window(&mut windowed);

    let spectrum = compute_fft(&windowed);
    let bin_width = sample_rate as f32 / window_size as f32;
    if bin_width <= 0.0 {
        return vec![0.0; bands.len()];
    }

    let mut energies = vec![0.0f32; bands.len()];
    let mut total = 0.0f32;

    for (i, &magnitude) in spectrum.iter().enumerate() {
        let frequency = i as f32 * bin_width;
        let energy = magnitude * magnitude;
        for (band_idx, &(low, high)) in bands.iter().enumerate() {
            if frequency >= low && frequency < high {
                energies[band_idx] += energy;
            }
        }
        total += energy;
    }

    if total > 0.0 {
        for e in energies.iter_mut() {
            *e /= total;
        }
    }

    energies
}

/// Peak absolute amplitude of a segment
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// 12-bin pitch-class energy profile of a sample span
/// Accumulated from STFT magnitudes mapped through the equal temperament
/// frequency-to-pitch relation; normalized to sum to 1 when any energy is
/// present
pub fn pitch_class_profile(samples: &[f32], sample_rate: u32, frame: &FrameConfig) -> [f32; 12] {
    let mut profile = [0.0f32; 12];
    if samples.is_empty() || sample_rate == 0 {
        return profile;
    }

    let window_size = frame.window_size.min(samples.len().next_power_of_two()).max(64);
    let hop_size = frame.hop_size.max(1);
    let bin_width = sample_rate as f32 / window_size as f32;

    let mut pos = 0;
    loop {
        let end = (pos + window_size).min(samples.len());
        if end <= pos {
            break;
        }
        let mut windowed = vec![0.0; window_size];
        windowed[..end - pos].copy_from_slice(&samples[pos..end]);
        apply_hann_window(&mut windowed);
        let spectrum = compute_fft(&windowed);

        // Restrict to a musically useful range (roughly C2..C7)
        for (i, &magnitude) in spectrum.iter().enumerate().skip(1) {
            let frequency = i as f32 * bin_width;
            if !(65.0..=2100.0).contains(&frequency) {
                continue;
            }
            let midi = 69.0 + 12.0 * (frequency / 440.0).log2();
            let pitch_class = (midi.round() as i32).rem_euclid(12) as usize;
            profile[pitch_class] += magnitude * magnitude;
        }

        if end == samples.len() {
            break;
        }
        pos += hop_size;
    }

    let total: f32 = profile.iter().sum();
    if total > 0.0 {
        for p in profile.iter_mut() {
            *p /= total;
        }
    }

    profile
}
