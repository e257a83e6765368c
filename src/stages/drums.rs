// Drum stage
// Spectral-flux onset detection, band-profile hit classification and
// repeating-loop analysis against the beat grid

use crate::audio::features;
use crate::audio::source::AudioBuffer;
use crate::config::{DrumParams, FrameConfig};
use crate::stages::{DrumAnalysis, DrumClass, DrumHit, FailureKind};
use crate::timing::grid::BeatGrid;

/// RMS level below which the input counts as silence
const ENERGY_FLOOR: f32 = 1e-4;

/// Characteristic frequency bands: kick, snare, hi-hat
const DRUM_BANDS: [(f32, f32); 3] = [(20.0, 150.0), (150.0, 800.0), (800.0, 8000.0)];

/// Segment analyzed around each onset, in seconds
const PRE_ONSET_SECS: f64 = 0.05;
const POST_ONSET_SECS: f64 = 0.1;

/// Loop raster resolution per bar
const SLOTS_PER_BAR: usize = 16;

/// Candidate loop lengths in bars
const LOOP_CANDIDATES: [u32; 3] = [1, 2, 4];

/// Detect, classify and pattern-analyze percussive onsets
pub fn run(
    audio: &AudioBuffer,
    grid: Option<&BeatGrid>,
    params: &DrumParams,
    frame: &FrameConfig,
) -> Result<DrumAnalysis, FailureKind> {
    if audio.rms() < ENERGY_FLOOR {
        return Err(FailureKind::InsufficientSignal);
    }

    let onsets = features::detect_onsets(audio, frame, params.onset_sensitivity);

    let hits: Vec<DrumHit> = onsets
        .iter()
        .filter_map(|onset| classify_onset(audio, onset.time_secs, params))
        .collect();

    let (loop_bars, loop_score) = match grid {
        Some(grid) => detect_loop(&hits, grid),
        None => (None, 0.0),
    };

    let complexity = ioi_entropy(&hits);

    log::debug!(
        "drums: {} hits, loop {:?} bars (score {:.2}), complexity {:.2}",
        hits.len(),
        loop_bars,
        loop_score,
        complexity
    );

    Ok(DrumAnalysis {
        hits,
        loop_bars,
        loop_score,
        complexity,
    })
}

/// Classify one onset by its band-energy profile
/// Falls back to Other when no profile clears its threshold
fn classify_onset(audio: &AudioBuffer, time_secs: f64, params: &DrumParams) -> Option<DrumHit> {
    let segment = audio.slice_secs(
        (time_secs - PRE_ONSET_SECS).max(0.0),
        time_secs + POST_ONSET_SECS,
    );
    if segment.is_empty() {
        return None;
    }

    let ratios = features::band_energy_ratios(segment, audio.sample_rate(), &DRUM_BANDS);
    let (kick, snare, hat) = (ratios[0], ratios[1], ratios[2]);

    let (class, confidence) = if kick > params.kick_threshold {
        (DrumClass::Kick, kick)
    } else if snare > params.snare_threshold {
        (DrumClass::Snare, snare)
    } else if hat > params.hat_threshold {
        (DrumClass::HiHat, hat)
    } else {
        (DrumClass::Other, kick.max(snare).max(hat))
    };

    Some(DrumHit {
        onset_secs: time_secs,
        class,
        confidence: confidence.clamp(0.0, 1.0),
        velocity: features::peak_amplitude(segment).clamp(0.0, 1.0),
    })
}

/// Test candidate loop lengths derived from the bar length and score
/// self-similarity between repetitions of a quantized hit raster
///
/// Candidates are tried shortest first; strictly-greater comparison keeps
/// the shortest loop on ties.
fn detect_loop(hits: &[DrumHit], grid: &BeatGrid) -> (Option<u32>, f32) {
    let Some(&start) = grid.beats.first() else {
        return (None, 0.0);
    };
    let bar_secs = grid.bar_secs();
    if bar_secs <= 0.0 || hits.len() < 4 {
        return (None, 0.0);
    }

    let span = match hits.last() {
        Some(last) => last.onset_secs - start,
        None => 0.0,
    };

    let mut best: Option<(u32, f32)> = None;

    for &bars in &LOOP_CANDIDATES {
        let loop_secs = bar_secs * bars as f64;
        let repetitions = (span / loop_secs).floor() as usize;
        if repetitions < 2 {
            continue;
        }

        let slots = SLOTS_PER_BAR * bars as usize;
        let rasters: Vec<Vec<bool>> = (0..repetitions)
            .map(|r| raster(hits, start + r as f64 * loop_secs, loop_secs, slots))
            .collect();

        let mut agreement = 0.0f32;
        for later in &rasters[1..] {
            let matching = rasters[0]
                .iter()
                .zip(later.iter())
                .filter(|(a, b)| a == b)
                .count();
            agreement += matching as f32 / slots as f32;
        }
        let score = agreement / (repetitions - 1) as f32;

        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((bars, score));
        }
    }

    match best {
        Some((bars, score)) => (Some(bars), score),
        None => (None, 0.0),
    }
}

/// Quantize hits inside one loop window onto a boolean slot raster
fn raster(hits: &[DrumHit], window_start: f64, loop_secs: f64, slots: usize) -> Vec<bool> {
    let mut raster = vec![false; slots];
    for hit in hits {
        let offset = hit.onset_secs - window_start;
        if offset < 0.0 || offset >= loop_secs {
            continue;
        }
        let slot = ((offset / loop_secs) * slots as f64) as usize;
        raster[slot.min(slots - 1)] = true;
    }
    raster
}

/// Normalized Shannon entropy of the inter-onset-interval distribution
/// 0 for a single repeated interval, approaching 1 for scattered timing
fn ioi_entropy(hits: &[DrumHit]) -> f32 {
    if hits.len() < 3 {
        return 0.0;
    }

    let intervals: Vec<f64> = hits
        .windows(2)
        .map(|pair| pair[1].onset_secs - pair[0].onset_secs)
        .filter(|&i| i > 0.0)
        .collect();
    if intervals.len() < 2 {
        return 0.0;
    }

    let max_interval = intervals.iter().fold(0.0f64, |acc, &i| acc.max(i));
    let bins = 16usize;
    let mut histogram = vec![0usize; bins];
    for &interval in &intervals {
        let bin = ((interval / max_interval) * (bins - 1) as f64).round() as usize;
        histogram[bin.min(bins - 1)] += 1;
    }

    let total = intervals.len() as f64;
    let mut entropy = 0.0f64;
    for &count in &histogram {
        if count == 0 {
            continue;
        }
        let p = count as f64 / total;
        entropy -= p * p.log2();
    }

    (entropy / (bins as f64).log2()).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone_burst(samples: &mut [f32], start: usize, freq: f32, len: usize, sample_rate: u32) {
        for i in 0..len.min(samples.len().saturating_sub(start)) {
            let envelope = 1.0 - i as f32 / len as f32;
            samples[start + i] +=
                (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * envelope * 0.8;
        }
    }

    /// Kick-like low bursts at the given times
    fn kick_track(times: &[f64], total_secs: f64) -> AudioBuffer {
        let sample_rate = 44100;
        let mut samples = vec![0.0f32; (total_secs * sample_rate as f64) as usize];
        for &t in times {
            tone_burst(&mut samples, (t * sample_rate as f64) as usize, 70.0, 2048, sample_rate);
        }
        AudioBuffer::from_samples(samples, sample_rate)
    }

    fn hit(t: f64, class: DrumClass) -> DrumHit {
        DrumHit {
            onset_secs: t,
            class,
            confidence: 0.9,
            velocity: 0.8,
        }
    }

    fn grid_120bpm(beats: usize) -> BeatGrid {
        BeatGrid {
            bpm: 120.0,
            confidence: 1.0,
            beats: (0..beats).map(|i| i as f64 * 0.5).collect(),
            downbeats: (0..beats).step_by(4).collect(),
            time_signature: None,
            rhythm_regularity: 1.0,
            syncopation: 0.0,
        }
    }

    #[test]
    fn test_silence_is_insufficient_signal() {
        let audio = AudioBuffer::from_samples(vec![0.0; 44100], 44100);
        let result = run(&audio, None, &DrumParams::default(), &FrameConfig::default());
        assert_eq!(result.unwrap_err(), FailureKind::InsufficientSignal);
    }

    #[test]
    fn test_low_bursts_classify_as_kicks() {
        let audio = kick_track(&[0.5, 1.0, 1.5, 2.0], 2.5);
        let analysis = run(&audio, None, &DrumParams::default(), &FrameConfig::default()).unwrap();

        assert!(!analysis.hits.is_empty());
        let kicks = analysis
            .hits
            .iter()
            .filter(|h| h.class == DrumClass::Kick)
            .count();
        assert!(
            kicks * 2 >= analysis.hits.len(),
            "{} kicks of {} hits",
            kicks,
            analysis.hits.len()
        );
    }

    #[test]
    fn test_classify_onset_high_burst_is_hat() {
        let sample_rate = 44100;
        let mut samples = vec![0.0f32; sample_rate as usize];
        tone_burst(&mut samples, 22050, 5000.0, 1024, sample_rate);
        let audio = AudioBuffer::from_samples(samples, sample_rate);

        let hit = classify_onset(&audio, 0.5, &DrumParams::default()).unwrap();
        assert_eq!(hit.class, DrumClass::HiHat);
        assert!(hit.velocity > 0.3);
    }

    #[test]
    fn test_classify_onset_mid_burst_is_snare() {
        let sample_rate = 44100;
        let mut samples = vec![0.0f32; sample_rate as usize];
        tone_burst(&mut samples, 22050, 400.0, 1024, sample_rate);
        let audio = AudioBuffer::from_samples(samples, sample_rate);

        let hit = classify_onset(&audio, 0.5, &DrumParams::default()).unwrap();
        assert_eq!(hit.class, DrumClass::Snare);
    }

    #[test]
    fn test_detect_loop_one_bar_pattern() {
        // Kick on every beat for 8 bars at 120 BPM
        let hits: Vec<DrumHit> = (0..32).map(|i| hit(i as f64 * 0.5, DrumClass::Kick)).collect();
        let grid = grid_120bpm(32);

        let (bars, score) = detect_loop(&hits, &grid);
        assert_eq!(bars, Some(1));
        assert!(score > 0.95, "score {}", score);
    }

    #[test]
    fn test_detect_loop_requires_enough_hits() {
        let hits = vec![hit(0.0, DrumClass::Kick), hit(0.5, DrumClass::Kick)];
        let grid = grid_120bpm(8);
        assert_eq!(detect_loop(&hits, &grid), (None, 0.0));
    }

    #[test]
    fn test_ioi_entropy_regular_vs_scattered() {
        let regular: Vec<DrumHit> =
            (0..16).map(|i| hit(i as f64 * 0.5, DrumClass::Kick)).collect();

        let scattered: Vec<DrumHit> = [0.0, 0.13, 0.55, 0.61, 1.02, 1.7, 1.74, 2.5, 2.53, 3.4]
            .iter()
            .map(|&t| hit(t, DrumClass::Other))
            .collect();

        let regular_entropy = ioi_entropy(&regular);
        let scattered_entropy = ioi_entropy(&scattered);

        assert!(regular_entropy < 0.2, "regular {}", regular_entropy);
        assert!(
            scattered_entropy > regular_entropy,
            "scattered {} vs regular {}",
            scattered_entropy,
            regular_entropy
        );
    }
}
