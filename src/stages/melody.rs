// Melody stage
// Frames the signal through the external pitch estimator, segments
// confident frames into notes and optionally quantizes onsets to the grid

use std::sync::Arc;

use crate::audio::source::AudioBuffer;
use crate::config::{FrameConfig, MelodyParams};
use crate::stages::{FailureKind, NoteEvent, PitchEstimator};
use crate::timing::grid::BeatGrid;

/// Default MIDI velocity scaled by note confidence
const VELOCITY_SCALE: f32 = 64.0;

/// Frames merge into one note while their pitch stays within this many
/// semitones of the running mean
const SEMITONE_MERGE_THRESHOLD: f64 = 1.0;

struct ConfidentFrame {
    index: usize,
    frequency: f32,
    midi: f64,
    confidence: f32,
}

/// Extract a monophonic note sequence
///
/// Quantization mutates onsets only, never pitch or duration, and is
/// recorded on each note.
pub fn run(
    audio: &AudioBuffer,
    grid: Option<&BeatGrid>,
    params: &MelodyParams,
    frame: &FrameConfig,
    estimator: Option<&Arc<dyn PitchEstimator>>,
) -> Result<Vec<NoteEvent>, FailureKind> {
    let Some(estimator) = estimator else {
        return Err(FailureKind::ExternalDependencyUnavailable {
            name: "pitch estimator".to_string(),
        });
    };
    if !estimator.is_available() {
        return Err(FailureKind::ExternalDependencyUnavailable {
            name: estimator.name().to_string(),
        });
    }

    if params.quantize && grid.is_none() {
        return Err(FailureKind::InvalidRequest(
            "quantize requested without a beat grid".to_string(),
        ));
    }

    let samples = audio.samples();
    let window_size = frame.window_size;
    let hop_size = frame.hop_size;
    if hop_size == 0 || samples.len() < window_size {
        return Ok(Vec::new());
    }

    let hop_secs = frame.hop_secs(audio.sample_rate());
    let num_frames = (samples.len() - window_size) / hop_size + 1;

    // Collect frames that clear the confidence threshold
    let mut confident = Vec::new();
    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_size;
        let estimate = estimator.estimate(&samples[start..start + window_size], audio.sample_rate());

        if estimate.confidence < params.confidence_threshold || estimate.frequency <= 0.0 {
            continue;
        }

        let midi = 69.0 + 12.0 * (estimate.frequency as f64 / 440.0).log2();
        if !(0.0..=127.0).contains(&midi) {
            continue;
        }

        confident.push(ConfidentFrame {
            index: frame_idx,
            frequency: estimate.frequency,
            midi,
            confidence: estimate.confidence,
        });
    }

    let mut notes = segment_notes(&confident, hop_secs, params);

    if let (true, Some(grid)) = (params.quantize, grid) {
        for note in notes.iter_mut() {
            if let Some(snapped) = grid.nearest_division(note.onset_secs, params.subdivision) {
                note.onset_secs = snapped;
                note.quantized = true;
            }
        }
        notes.sort_by(|a, b| {
            a.onset_secs
                .partial_cmp(&b.onset_secs)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    log::debug!("melody: {} notes from {} confident frames", notes.len(), confident.len());

    Ok(notes)
}

/// Merge temporally adjacent frames of near-identical pitch into notes
///
/// A note whose confident span is shorter than one analysis frame, or that
/// falls outside the configured duration bounds, is discarded.
fn segment_notes(
    frames: &[ConfidentFrame],
    hop_secs: f64,
    params: &MelodyParams,
) -> Vec<NoteEvent> {
    let mut notes = Vec::new();
    if frames.is_empty() {
        return notes;
    }

    let mut run_start = 0;
    for i in 1..=frames.len() {
        let continues = i < frames.len() && {
            let prev = &frames[i - 1];
            let curr = &frames[i];
            let run_mean = mean_midi(&frames[run_start..i]);
            curr.index == prev.index + 1
                && (curr.midi - run_mean).abs() < SEMITONE_MERGE_THRESHOLD
        };

        if continues {
            continue;
        }

        let run = &frames[run_start..i];
        if let Some(note) = finish_note(run, hop_secs, params) {
            notes.push(note);
        }
        run_start = i;
    }

    notes
}

fn mean_midi(run: &[ConfidentFrame]) -> f64 {
    run.iter().map(|f| f.midi).sum::<f64>() / run.len() as f64
}

fn finish_note(run: &[ConfidentFrame], hop_secs: f64, params: &MelodyParams) -> Option<NoteEvent> {
    // A single frame has no span
    if run.len() < 2 {
        return None;
    }

    let duration_secs = run.len() as f64 * hop_secs;
    if duration_secs < params.min_note_secs || duration_secs > params.max_note_secs {
        return None;
    }

    let midi = mean_midi(run).round();
    if !(0.0..=127.0).contains(&midi) {
        return None;
    }

    let frequency = run.iter().map(|f| f.frequency).sum::<f32>() / run.len() as f32;
    let confidence = run.iter().map(|f| f.confidence).sum::<f32>() / run.len() as f32;

    Some(NoteEvent {
        onset_secs: run[0].index as f64 * hop_secs,
        duration_secs,
        midi: midi as u8,
        frequency,
        confidence,
        velocity: (VELOCITY_SCALE * confidence).round().clamp(1.0, 127.0) as u8,
        quantized: false,
    })
}
