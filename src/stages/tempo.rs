// Tempo/beat stage
// Global tempo from autocorrelation of the onset-strength envelope, beat
// placement by dynamic-programming tracking, downbeats from accent grouping

use crate::audio::features;
use crate::audio::source::AudioBuffer;
use crate::config::{FrameConfig, TempoParams};
use crate::stages::FailureKind;
use crate::timing::grid::{BeatGrid, TimeSignature};

/// RMS level below which the input counts as silence
const ENERGY_FLOOR: f32 = 1e-4;

/// Envelope peak below which no periodicity estimate is attempted
const ENVELOPE_FLOOR: f32 = 1e-3;

/// Transition cost weight for the beat-tracking DP
const TIGHTNESS: f32 = 4.0;

/// Estimate the beat grid for a buffer
///
/// Near-silent input returns `InsufficientSignal` rather than a
/// low-confidence guess.
pub fn run(
    audio: &AudioBuffer,
    params: &TempoParams,
    frame: &FrameConfig,
) -> Result<BeatGrid, FailureKind> {
    if params.min_bpm <= 0.0 || params.max_bpm <= params.min_bpm {
        return Err(FailureKind::InvalidRequest(format!(
            "bpm bounds {}..{} invalid",
            params.min_bpm, params.max_bpm
        )));
    }

    let envelope = features::onset_envelope(audio.samples(), frame);
    let envelope_peak = envelope.iter().fold(0.0f32, |acc, &v| acc.max(v));

    if audio.rms() < ENERGY_FLOOR || envelope.is_empty() || envelope_peak < ENVELOPE_FLOOR {
        return Err(FailureKind::InsufficientSignal);
    }

    // Work on a normalized envelope so DP weights are scale-free
    let normalized: Vec<f32> = envelope.iter().map(|v| v / envelope_peak).collect();

    let hop_secs = frame.hop_secs(audio.sample_rate());
    let (period_frames, confidence) = estimate_period(&normalized, hop_secs, params);
    let bpm = 60.0 / (period_frames as f64 * hop_secs);

    let beat_frames = track_beats(&normalized, period_frames);
    let beats: Vec<f64> = beat_frames.iter().map(|&i| i as f64 * hop_secs).collect();

    let (downbeats, time_signature) = detect_downbeats(&normalized, &beat_frames);

    let onsets = features::pick_onset_peaks(
        &envelope,
        audio.sample_rate(),
        frame,
        params.onset_sensitivity,
        0.03,
    );
    let rhythm_regularity = rhythm_regularity(&onsets);
    let syncopation = syncopation(&onsets, bpm);

    let grid = BeatGrid {
        bpm: bpm.clamp(params.min_bpm, params.max_bpm),
        confidence,
        beats,
        downbeats,
        time_signature,
        rhythm_regularity,
        syncopation,
    };

    log::debug!(
        "tempo: {:.1} bpm, {} beats, confidence {:.2}",
        grid.bpm,
        grid.beats.len(),
        grid.confidence
    );

    Ok(grid)
}

/// Find the dominant envelope period in frames within the BPM bounds
/// Returns (period_frames, confidence in [0,1])
fn estimate_period(envelope: &[f32], hop_secs: f64, params: &TempoParams) -> (usize, f32) {
    let min_lag = ((60.0 / params.max_bpm) / hop_secs).floor().max(1.0) as usize;
    let max_lag = ((60.0 / params.min_bpm) / hop_secs).ceil() as usize;
    let max_lag = max_lag.min(envelope.len().saturating_sub(1)).max(min_lag + 1);

    let mut best_lag = min_lag;
    let mut best_score = f32::MIN;
    let mut score_sum = 0.0f32;
    let mut score_count = 0usize;

    for lag in min_lag..=max_lag {
        if lag >= envelope.len() {
            break;
        }
        let pairs = envelope.len() - lag;

        let mut acc = 0.0f32;
        for i in 0..pairs {
            acc += envelope[i] * envelope[i + lag];
        }
        let correlation = acc / pairs as f32;

        // Log-normal prior centered near 120 BPM keeps octave-ambiguous
        // correlations from flipping to half/double tempo
        let bpm = 60.0 / (lag as f64 * hop_secs);
        let deviation = (bpm / 120.0).log2();
        let prior = (-0.5 * (deviation * deviation) as f32).exp();
        let score = correlation * prior;

        score_sum += score;
        score_count += 1;

        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    let mean = if score_count > 0 {
        score_sum / score_count as f32
    } else {
        0.0
    };
    let confidence = if best_score > 0.0 {
        ((best_score - mean) / best_score).clamp(0.0, 1.0)
    } else {
        0.0
    };

    (best_lag, confidence)
}

/// Dynamic-programming beat tracking
///
/// Maximizes accumulated onset strength at beat positions subject to a
/// quadratic penalty on deviation from the estimated period, then
/// backtracks from the best-scoring end frame.
fn track_beats(envelope: &[f32], period: usize) -> Vec<usize> {
    let n = envelope.len();
    if n == 0 || period == 0 {
        return Vec::new();
    }

    let mut score = envelope.to_vec();
    let mut backlink: Vec<Option<usize>> = vec![None; n];

    let window_lo = (period as f32 * 0.5).round() as usize;
    let window_hi = period * 2;

    for i in 0..n {
        let j_min = i.saturating_sub(window_hi);
        let j_max = i.saturating_sub(window_lo.max(1));

        let mut best: Option<(usize, f32)> = None;
        for j in j_min..=j_max {
            if j >= i {
                break;
            }
            let gap = (i - j) as f32;
            let deviation = (gap - period as f32) / period as f32;
            let candidate = score[j] - TIGHTNESS * deviation * deviation;
            if best.map(|(_, s)| candidate > s).unwrap_or(true) {
                best = Some((j, candidate));
            }
        }

        if let Some((j, s)) = best {
            if s > 0.0 {
                score[i] += s;
                backlink[i] = Some(j);
            }
        }
    }

    // Backtrack from the strongest frame in the final period
    let tail_start = n.saturating_sub(period);
    let mut cursor = (tail_start..n)
        .max_by(|&a, &b| score[a].partial_cmp(&score[b]).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(n - 1);

    let mut frames = vec![cursor];
    while let Some(prev) = backlink[cursor] {
        frames.push(prev);
        cursor = prev;
    }
    frames.reverse();
    frames
}

/// Group beats into bars by accent strength
///
/// Candidate meters are scored by the mean envelope strength at candidate
/// downbeats for every phase offset. 4/4 candidates are evaluated first
/// and strictly-greater comparison keeps the earliest winner, so ties
/// resolve to 4/4 and the smallest phase.
fn detect_downbeats(
    envelope: &[f32],
    beat_frames: &[usize],
) -> (Vec<usize>, Option<TimeSignature>) {
    if beat_frames.len() < 8 {
        return (Vec::new(), None);
    }

    let accents: Vec<f32> = beat_frames
        .iter()
        .map(|&f| envelope.get(f).copied().unwrap_or(0.0))
        .collect();

    let mut candidates: Vec<(u32, usize, f32)> = Vec::new();
    for meter in [4u32, 3u32] {
        for phase in 0..meter as usize {
            let strengths: Vec<f32> = accents
                .iter()
                .skip(phase)
                .step_by(meter as usize)
                .copied()
                .collect();
            if strengths.is_empty() {
                continue;
            }
            let mean = strengths.iter().sum::<f32>() / strengths.len() as f32;
            candidates.push((meter, phase, mean));
        }
    }

    // Strictly-greater selection keeps the earliest candidate on ties, so
    // ambiguity resolves to 4/4 and the smallest phase
    let mut best: Option<(u32, usize, f32)> = None;
    for &(meter, phase, mean) in &candidates {
        if best.map(|(_, _, m)| mean > m).unwrap_or(true) {
            best = Some((meter, phase, mean));
        }
    }

    let Some((meter, phase, best_mean)) = best else {
        return (Vec::new(), None);
    };

    let runner_up = candidates
        .iter()
        .filter(|&&(m, p, _)| (m, p) != (meter, phase))
        .map(|&(_, _, mean)| mean)
        .fold(0.0f32, f32::max);

    let downbeats: Vec<usize> = (phase..beat_frames.len()).step_by(meter as usize).collect();
    let confidence = if best_mean > 0.0 {
        ((best_mean - runner_up) / best_mean).clamp(0.0, 1.0)
    } else {
        0.0
    };

    (
        downbeats,
        Some(TimeSignature {
            numerator: meter,
            denominator: 4,
            confidence,
        }),
    )
}

/// Regularity of inter-onset spacing [0,1]; 1 means perfectly even
fn rhythm_regularity(onsets: &[features::Onset]) -> f32 {
    if onsets.len() < 3 {
        return 0.0;
    }

    let intervals: Vec<f64> = onsets
        .windows(2)
        .map(|pair| pair[1].time_secs - pair[0].time_secs)
        .collect();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let variance = intervals
        .iter()
        .map(|i| (i - mean) * (i - mean))
        .sum::<f64>()
        / intervals.len() as f64;

    (1.0 / (1.0 + variance.sqrt())) as f32
}

/// Fraction of onsets landing in the off-beat half of the beat cycle
fn syncopation(onsets: &[features::Onset], bpm: f64) -> f32 {
    if onsets.len() < 2 || bpm <= 0.0 {
        return 0.0;
    }

    let beat_secs = 60.0 / bpm;
    let off_beat = onsets
        .iter()
        .filter(|o| {
            let position = (o.time_secs % beat_secs) / beat_secs;
            (0.25..0.75).contains(&position)
        })
        .count();

    off_beat as f32 / onsets.len() as f32
}
