// Pattern generation
// Maps analysis results onto style-templated live-coding pattern text
// Deterministic: identical state and style always yield identical output

use thiserror::Error;

use crate::pattern::style::Style;
use crate::project::state::ProjectState;
use crate::stages::{
    ChordAnalysis, DrumAnalysis, DrumClass, NoteEvent, StageKind, StageOutput,
};
use crate::timing::grid::BeatGrid;

#[derive(Debug, Error, PartialEq)]
pub enum PatternError {
    #[error("unknown style key '{0}'")]
    UnknownStyle(String),

    #[error("pattern generation requires the '{0}' stage")]
    MissingAnalysis(StageKind),
}

/// Raster slots per beat in generated drum lanes
const SLOTS_PER_BEAT: usize = 2;

/// Maximum notes carried into the melody lane
const MELODY_NOTE_LIMIT: usize = 8;

/// Maximum chords carried into the chord lane
const CHORD_LIMIT: usize = 4;

/// Generate pattern text for a project snapshot
///
/// Requires a completed tempo stage; drum, melody and chord lanes are
/// emitted when their stages have succeeded with data, and the drum lane
/// falls back to the style template otherwise. An unknown style key is an
/// error, never a silent fallback.
pub fn generate(state: &ProjectState, style_key: &str) -> Result<String, PatternError> {
    let style = Style::from_key(style_key)
        .ok_or_else(|| PatternError::UnknownStyle(style_key.to_string()))?;

    let Some(StageOutput::Tempo(grid)) = state.result(StageKind::Tempo).output() else {
        return Err(PatternError::MissingAnalysis(StageKind::Tempo));
    };

    let drums = match state.result(StageKind::Drums).output() {
        Some(StageOutput::Drums(analysis)) => Some(analysis),
        _ => None,
    };
    let notes = match state.result(StageKind::Melody).output() {
        Some(StageOutput::Melody(notes)) => Some(notes.as_slice()),
        _ => None,
    };
    let chords = match state.result(StageKind::Chords).output() {
        Some(StageOutput::Chords(analysis)) => Some(analysis),
        _ => None,
    };

    let rules = style.rules();
    let mut out = String::new();

    out.push_str(&format!(
        "// {} pattern generated from '{}'\n// Tempo: {:.1} BPM\nsetcpm ({:.0})\n",
        style.key(),
        state.name,
        grid.bpm,
        grid.bpm * 4.0
    ));

    // Drum lanes
    let [kick, snare, hat] = match drums {
        Some(analysis) if !analysis.hits.is_empty() => drum_lanes(analysis, grid),
        _ => rules.fallback_drums.map(str::to_string),
    };
    out.push_str(&format!(
        "\nd1 $ stack [\n  \"{}\",\n  \"{}\",\n  \"{}\"\n]\n",
        kick, snare, hat
    ));

    let mut lanes = vec!["d1".to_string()];

    if let Some(notes) = notes {
        if !notes.is_empty() {
            out.push_str(&format!(
                "\nd2 $ n \"{}\" # s \"{}\"\n",
                melody_lane(notes),
                rules.melody_voice
            ));
            lanes.push("d2".to_string());
        }
    }

    if let Some(analysis) = chords {
        if !analysis.chords.is_empty() {
            out.push_str(&format!(
                "\nd3 $ chord \"{}\" # s \"{}\"\n",
                chord_lane(analysis),
                rules.chord_voice
            ));
            lanes.push("d3".to_string());
        }
    }

    out.push_str("\nhush\n");
    for lane in lanes {
        out.push_str(&lane);
        out.push('\n');
    }

    Ok(out)
}

/// Suggest a style for a project from its beat grid
pub fn suggest_style(state: &ProjectState) -> Option<Style> {
    match state.result(StageKind::Tempo).output() {
        Some(StageOutput::Tempo(grid)) => Some(Style::suggest(grid.bpm)),
        _ => None,
    }
}

/// Rasterize classified hits into per-class mini-notation lanes
///
/// Hits are wrapped onto the loop hypothesis (one bar when none was
/// found), so the lane shows the repeating pattern rather than the first
/// bar verbatim.
fn drum_lanes(analysis: &DrumAnalysis, grid: &BeatGrid) -> [String; 3] {
    let bars = analysis.loop_bars.unwrap_or(1) as usize;
    let start = grid.beats.first().copied().unwrap_or(0.0);
    let loop_secs = grid.bar_secs() * bars as f64;
    let slots = SLOTS_PER_BEAT * grid.beats_per_bar() as usize * bars;

    let lane = |class: DrumClass, symbol: &str| -> String {
        let mut raster = vec![false; slots];
        for hit in analysis.hits.iter().filter(|h| h.class == class) {
            let offset = (hit.onset_secs - start).rem_euclid(loop_secs.max(1e-9));
            let slot = ((offset / loop_secs) * slots as f64) as usize;
            raster[slot.min(slots - 1)] = true;
        }
        raster
            .iter()
            .map(|&on| if on { symbol } else { "~" })
            .collect::<Vec<_>>()
            .join(" ")
    };

    [
        lane(DrumClass::Kick, "bd"),
        lane(DrumClass::Snare, "sn"),
        lane(DrumClass::HiHat, "hh"),
    ]
}

/// First notes of the melody as pattern note names
fn melody_lane(notes: &[NoteEvent]) -> String {
    notes
        .iter()
        .take(MELODY_NOTE_LIMIT)
        .map(|note| midi_note_name(note.midi))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Leading chord symbols of the progression
fn chord_lane(analysis: &ChordAnalysis) -> String {
    analysis
        .chords
        .iter()
        .take(CHORD_LIMIT)
        .map(|chord| chord.symbol())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase pattern note name, e.g. 69 -> "a4"
fn midi_note_name(midi: u8) -> String {
    const NAMES: [&str; 12] = [
        "c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b",
    ];
    let octave = (midi / 12) as i32 - 1;
    format!("{}{}", NAMES[(midi % 12) as usize], octave)
}
