// Chord stage
// Beat-aligned pitch-class profiles matched against major/minor chord
// templates, with flicker smoothing and whole-buffer key estimation

use crate::audio::features;
use crate::audio::source::AudioBuffer;
use crate::config::{ChordParams, FrameConfig};
use crate::stages::{
    ChordAnalysis, ChordEvent, ChordQuality, FailureKind, KeyEstimate, KeyMode, PitchClass,
};
use crate::timing::grid::BeatGrid;

/// Krumhansl-style key profiles, indexed from the tonic
const MAJOR_KEY_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_KEY_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowLabel {
    root: PitchClass,
    quality: ChordQuality,
    confidence: f32,
}

/// Estimate the chord progression and key of a buffer
pub fn run(
    audio: &AudioBuffer,
    grid: &BeatGrid,
    params: &ChordParams,
    frame: &FrameConfig,
) -> Result<ChordAnalysis, FailureKind> {
    if params.window_beats == 0 {
        return Err(FailureKind::InvalidRequest(
            "window_beats must be at least 1".to_string(),
        ));
    }

    let spans = window_spans(grid, audio.duration_secs(), params.window_beats);

    let labels: Vec<Option<WindowLabel>> = spans
        .iter()
        .map(|&(start, end)| {
            let profile = features::pitch_class_profile(
                audio.slice_secs(start, end),
                audio.sample_rate(),
                frame,
            );
            match_chord(&profile).and_then(|(label, correlation)| {
                if correlation >= params.confidence_threshold {
                    Some(label)
                } else {
                    None
                }
            })
        })
        .collect();

    let smoothed = smooth_labels(&labels, params.smoothing_windows);
    let chords = collect_events(&smoothed, &spans);

    let whole_profile =
        features::pitch_class_profile(audio.samples(), audio.sample_rate(), frame);
    let key = estimate_key(&whole_profile);

    log::debug!(
        "chords: {} events over {} windows, key {}{}",
        chords.len(),
        spans.len(),
        key.tonic.name(),
        match key.mode {
            KeyMode::Major => " major",
            KeyMode::Minor => " minor",
        }
    );

    Ok(ChordAnalysis { chords, key })
}

/// Beat-aligned window spans; the last window extends to the end of audio
fn window_spans(grid: &BeatGrid, duration_secs: f64, window_beats: u32) -> Vec<(f64, f64)> {
    let step = window_beats as usize;
    if grid.beats.len() < 2 {
        if duration_secs > 0.0 {
            return vec![(0.0, duration_secs)];
        }
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut i = 0;
    while i < grid.beats.len() {
        let start = grid.beats[i];
        let end = grid
            .beats
            .get(i + step)
            .copied()
            .unwrap_or_else(|| duration_secs.max(start));
        if end > start {
            spans.push((start, end));
        }
        i += step;
    }
    spans
}

/// Match a pitch-class profile against the 24 chord templates
///
/// Roots are tried C..B with major before minor; strictly-greater
/// comparison keeps the earliest winner, so exact ties resolve to the
/// lowest root and major quality. Returns the winning label and its raw
/// correlation; the label's confidence is the margin over the runner-up.
fn match_chord(profile: &[f32; 12]) -> Option<(WindowLabel, f32)> {
    let total: f32 = profile.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let mut best: Option<(PitchClass, ChordQuality, f32)> = None;
    let mut second = f32::MIN;

    for root in 0..12u8 {
        for quality in [ChordQuality::Major, ChordQuality::Minor] {
            let template = chord_template(root, quality);
            let correlation = cosine_similarity(profile, &template);

            match best {
                Some((_, _, best_corr)) if correlation > best_corr => {
                    second = best_corr;
                    best = Some((PitchClass(root), quality, correlation));
                }
                Some((_, _, best_corr)) => {
                    if correlation > second && correlation <= best_corr {
                        second = correlation;
                    }
                }
                None => best = Some((PitchClass(root), quality, correlation)),
            }
        }
    }

    let (root, quality, correlation) = best?;
    let margin = if second == f32::MIN || correlation <= 0.0 {
        0.0
    } else {
        ((correlation - second) / correlation).clamp(0.0, 1.0)
    };

    Some((
        WindowLabel {
            root,
            quality,
            confidence: margin,
        },
        correlation,
    ))
}

/// Binary triad template for a root and quality
fn chord_template(root: u8, quality: ChordQuality) -> [f32; 12] {
    let intervals: [u8; 3] = match quality {
        ChordQuality::Major => [0, 4, 7],
        ChordQuality::Minor => [0, 3, 7],
    };
    let mut template = [0.0f32; 12];
    for interval in intervals {
        template[((root + interval) % 12) as usize] = 1.0;
    }
    template
}

fn cosine_similarity(a: &[f32; 12], b: &[f32; 12]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Minimum-duration merge: runs shorter than `min_run` take the label of
/// the preceding run (the following run at the start), which collapses
/// single-window flicker into the surrounding chord
fn smooth_labels(labels: &[Option<WindowLabel>], min_run: usize) -> Vec<Option<WindowLabel>> {
    if labels.is_empty() || min_run <= 1 {
        return labels.to_vec();
    }

    let same = |a: &Option<WindowLabel>, b: &Option<WindowLabel>| match (a, b) {
        (Some(x), Some(y)) => x.root == y.root && x.quality == y.quality,
        (None, None) => true,
        _ => false,
    };

    // Run-length encode
    let mut runs: Vec<(Option<WindowLabel>, usize)> = Vec::new();
    for label in labels {
        match runs.last_mut() {
            Some((value, count)) if same(value, label) => *count += 1,
            _ => runs.push((*label, 1)),
        }
    }

    // Relabel short runs from their neighbors
    let mut relabeled: Vec<(Option<WindowLabel>, usize)> = Vec::with_capacity(runs.len());
    for (idx, (value, count)) in runs.iter().enumerate() {
        let value = if *count < min_run && runs.len() > 1 {
            if idx > 0 {
                relabeled[idx - 1].0
            } else {
                runs[idx + 1].0
            }
        } else {
            *value
        };
        relabeled.push((value, *count));
    }

    // Expand back to per-window labels
    let mut smoothed = Vec::with_capacity(labels.len());
    for (value, count) in relabeled {
        for _ in 0..count {
            smoothed.push(value);
        }
    }
    smoothed
}

/// Collapse consecutive identical labels into chord events
/// Gaps (None windows) separate events and are left uncovered
fn collect_events(labels: &[Option<WindowLabel>], spans: &[(f64, f64)]) -> Vec<ChordEvent> {
    let mut events: Vec<ChordEvent> = Vec::new();

    for (i, label) in labels.iter().enumerate() {
        let Some(label) = label else {
            continue;
        };
        let (start, end) = spans[i];

        match events.last_mut() {
            Some(event)
                if event.root == label.root
                    && event.quality == label.quality
                    && (event.end_secs - start).abs() < 1e-9 =>
            {
                event.end_secs = end;
                event.confidence = event.confidence.max(label.confidence);
            }
            _ => events.push(ChordEvent {
                start_secs: start,
                end_secs: end,
                root: label.root,
                quality: label.quality,
                confidence: label.confidence,
            }),
        }
    }

    events
}

/// Whole-buffer key estimation against rotated major/minor profiles
fn estimate_key(profile: &[f32; 12]) -> KeyEstimate {
    let mut best: Option<(PitchClass, KeyMode, f32)> = None;
    let mut second = f32::MIN;

    for tonic in 0..12u8 {
        for (mode, base) in [
            (KeyMode::Major, &MAJOR_KEY_PROFILE),
            (KeyMode::Minor, &MINOR_KEY_PROFILE),
        ] {
            let mut rotated = [0.0f32; 12];
            for (i, slot) in rotated.iter_mut().enumerate() {
                *slot = base[(i + 12 - tonic as usize) % 12];
            }
            let correlation = pearson(profile, &rotated);

            match best {
                Some((_, _, best_corr)) if correlation > best_corr => {
                    second = best_corr;
                    best = Some((PitchClass(tonic), mode, correlation));
                }
                Some((_, _, best_corr)) => {
                    if correlation > second && correlation <= best_corr {
                        second = correlation;
                    }
                }
                None => best = Some((PitchClass(tonic), mode, correlation)),
            }
        }
    }

    match best {
        Some((tonic, mode, correlation)) => {
            let confidence = if second == f32::MIN || correlation.abs() <= 1e-6 {
                0.0
            } else {
                ((correlation - second) / correlation.abs()).clamp(0.0, 1.0)
            };
            KeyEstimate {
                tonic,
                mode,
                confidence,
            }
        }
        None => KeyEstimate {
            tonic: PitchClass(0),
            mode: KeyMode::Major,
            confidence: 0.0,
        },
    }
}

fn pearson(a: &[f32; 12], b: &[f32; 12]) -> f32 {
    let mean_a: f32 = a.iter().sum::<f32>() / 12.0;
    let mean_b: f32 = b.iter().sum::<f32>() / 12.0;

    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for i in 0..12 {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(root: u8, quality: ChordQuality) -> Option<WindowLabel> {
        Some(WindowLabel {
            root: PitchClass(root),
            quality,
            confidence: 0.5,
        })
    }

    fn triad_profile(root: u8, quality: ChordQuality) -> [f32; 12] {
        chord_template(root, quality)
    }

    #[test]
    fn test_match_chord_c_major() {
        let (matched, correlation) = match_chord(&triad_profile(0, ChordQuality::Major)).unwrap();
        assert_eq!(matched.root, PitchClass(0));
        assert_eq!(matched.quality, ChordQuality::Major);
        assert!(correlation > 0.99);
    }

    #[test]
    fn test_match_chord_a_minor() {
        let (matched, _) = match_chord(&triad_profile(9, ChordQuality::Minor)).unwrap();
        assert_eq!(matched.root, PitchClass(9));
        assert_eq!(matched.quality, ChordQuality::Minor);
    }

    #[test]
    fn test_match_chord_empty_profile_is_gap() {
        assert!(match_chord(&[0.0; 12]).is_none());
    }

    #[test]
    fn test_tie_breaks_to_lowest_root_major() {
        // A uniform profile correlates equally with every template
        let uniform = [1.0f32; 12];
        let (matched, _) = match_chord(&uniform).unwrap();
        assert_eq!(matched.root, PitchClass(0));
        assert_eq!(matched.quality, ChordQuality::Major);
    }

    #[test]
    fn test_smoothing_collapses_single_window_flicker() {
        // C C Am C C with a minimum run of 2 collapses to one C chord
        let labels = vec![
            label(0, ChordQuality::Major),
            label(0, ChordQuality::Major),
            label(9, ChordQuality::Minor),
            label(0, ChordQuality::Major),
            label(0, ChordQuality::Major),
        ];
        let spans: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, i as f64 + 1.0)).collect();

        let smoothed = smooth_labels(&labels, 2);
        let events = collect_events(&smoothed, &spans);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].root, PitchClass(0));
        assert_eq!(events[0].quality, ChordQuality::Major);
        assert!((events[0].start_secs - 0.0).abs() < 1e-9);
        assert!((events[0].end_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_keeps_long_runs() {
        let labels = vec![
            label(0, ChordQuality::Major),
            label(0, ChordQuality::Major),
            label(9, ChordQuality::Minor),
            label(9, ChordQuality::Minor),
        ];
        let spans: Vec<(f64, f64)> = (0..4).map(|i| (i as f64, i as f64 + 1.0)).collect();

        let events = collect_events(&smooth_labels(&labels, 2), &spans);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].symbol(), "C");
        assert_eq!(events[1].symbol(), "Am");
    }

    #[test]
    fn test_gaps_are_preserved() {
        let labels = vec![
            label(0, ChordQuality::Major),
            label(0, ChordQuality::Major),
            None,
            None,
            label(7, ChordQuality::Major),
            label(7, ChordQuality::Major),
        ];
        let spans: Vec<(f64, f64)> = (0..6).map(|i| (i as f64, i as f64 + 1.0)).collect();

        let events = collect_events(&smooth_labels(&labels, 2), &spans);
        assert_eq!(events.len(), 2);
        // The gap between the two chords stays uncovered
        assert!((events[0].end_secs - 2.0).abs() < 1e-9);
        assert!((events[1].start_secs - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_key_from_major_profile() {
        // The C major Krumhansl profile itself must come back as C major
        let key = estimate_key(&MAJOR_KEY_PROFILE);
        assert_eq!(key.tonic, PitchClass(0));
        assert_eq!(key.mode, KeyMode::Major);
        assert!(key.confidence > 0.0);
    }

    #[test]
    fn test_estimate_key_rotated_profile() {
        // Rotate the major profile up to G (pitch class 7)
        let mut rotated = [0.0f32; 12];
        for (i, slot) in rotated.iter_mut().enumerate() {
            *slot = MAJOR_KEY_PROFILE[(i + 12 - 7) % 12];
        }
        let key = estimate_key(&rotated);
        assert_eq!(key.tonic, PitchClass(7));
        assert_eq!(key.mode, KeyMode::Major);
    }

    #[test]
    fn test_window_spans_group_beats() {
        let grid = BeatGrid {
            bpm: 120.0,
            confidence: 1.0,
            beats: vec![0.0, 0.5, 1.0, 1.5],
            downbeats: Vec::new(),
            time_signature: None,
            rhythm_regularity: 1.0,
            syncopation: 0.0,
        };

        let spans = window_spans(&grid, 2.0, 1);
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0], (0.0, 0.5));
        // Final window runs to the end of audio
        assert_eq!(spans[3], (1.5, 2.0));

        let bar_spans = window_spans(&grid, 2.0, 4);
        assert_eq!(bar_spans.len(), 1);
        assert_eq!(bar_spans[0], (0.0, 2.0));
    }
}
