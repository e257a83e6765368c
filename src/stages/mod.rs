// Analysis stage contract
// Closed set of stages with typed outputs, a serializable failure taxonomy,
// external collaborator traits and the static dependency table

pub mod chords;
pub mod drums;
pub mod melody;
pub mod separation;
pub mod tempo;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::audio::source::AudioBuffer;
use crate::config::{AnalysisSource, ParameterSet, SeparationMethod};
use crate::project::fingerprint::Fingerprint;
use crate::timing::grid::BeatGrid;

/// The closed set of analysis stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Tempo,
    Separation,
    Melody,
    Drums,
    Chords,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Tempo,
        StageKind::Separation,
        StageKind::Melody,
        StageKind::Drums,
        StageKind::Chords,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Tempo => "tempo",
            StageKind::Separation => "separation",
            StageKind::Melody => "melody",
            StageKind::Drums => "drums",
            StageKind::Chords => "chords",
        }
    }

    pub fn from_name(name: &str) -> Option<StageKind> {
        match name {
            "tempo" => Some(StageKind::Tempo),
            "separation" => Some(StageKind::Separation),
            "melody" => Some(StageKind::Melody),
            "drums" => Some(StageKind::Drums),
            "chords" => Some(StageKind::Chords),
            _ => None,
        }
    }

    /// Declared upstream dependencies for this stage
    ///
    /// The table is fixed: tempo and separation are roots; melody, drums
    /// and chords require the beat grid; melody and drums additionally
    /// require separation when configured to analyze a stem.
    pub fn dependencies(&self, params: &ParameterSet) -> &'static [StageKind] {
        match self {
            StageKind::Tempo | StageKind::Separation => &[],
            StageKind::Chords => &[StageKind::Tempo],
            StageKind::Melody => match params.melody.source {
                AnalysisSource::Mix => &[StageKind::Tempo],
                AnalysisSource::Stem => &[StageKind::Tempo, StageKind::Separation],
            },
            StageKind::Drums => match params.drums.source {
                AnalysisSource::Mix => &[StageKind::Tempo],
                AnalysisSource::Stem => &[StageKind::Tempo, StageKind::Separation],
            },
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a stage run failed
/// Every recorded failure carries a distinguishable kind; nothing is
/// silently downgraded to a default value
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("signal below the analysis energy floor")]
    InsufficientSignal,

    #[error("upstream stage '{0}' failed")]
    UpstreamFailed(StageKind),

    #[error("external dependency '{name}' unavailable")]
    ExternalDependencyUnavailable { name: String },

    #[error("collaborator output mismatch: {0}")]
    OutputMismatch(String),

    #[error("stage timed out after {secs:.1}s")]
    Timeout { secs: f64 },

    #[error("stage request was cancelled")]
    Cancelled,
}

/// Names of separated stems
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StemName {
    Vocals,
    Drums,
    Bass,
    Piano,
    Other,
}

impl StemName {
    pub fn name(&self) -> &'static str {
        match self {
            StemName::Vocals => "vocals",
            StemName::Drums => "drums",
            StemName::Bass => "bass",
            StemName::Piano => "piano",
            StemName::Other => "other",
        }
    }
}

/// Quality tag attached to each separated stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTag {
    Standard,
    High,
}

/// One separated stem: an audio reference plus provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemEntry {
    /// File reference once the export layer has written the stem
    pub path: Option<PathBuf>,

    /// In-memory audio; not persisted, absent after project reload
    #[serde(skip)]
    pub buffer: Option<Arc<AudioBuffer>>,

    pub method: SeparationMethod,
    pub quality: QualityTag,
}

/// Result of the separation stage
/// Invariant: `stems.len()` equals the requested stem count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemSet {
    pub stem_count: u8,
    pub stems: BTreeMap<StemName, StemEntry>,
}

impl StemSet {
    pub fn get(&self, name: StemName) -> Option<&StemEntry> {
        self.stems.get(&name)
    }
}

/// A transcribed monophonic note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Onset in seconds; snapped to the grid when `quantized` is set
    pub onset_secs: f64,

    /// Duration in seconds; never changed by quantization
    pub duration_secs: f64,

    /// MIDI note number
    pub midi: u8,

    /// Mean source frequency in Hz
    pub frequency: f32,

    /// Mean frame confidence [0.0, 1.0]
    pub confidence: f32,

    /// Velocity estimate scaled from confidence
    pub velocity: u8,

    /// Whether the onset was quantized; never applied silently
    pub quantized: bool,
}

/// Classified drum hit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumClass {
    Kick,
    Snare,
    HiHat,
    Other,
}

impl DrumClass {
    pub fn name(&self) -> &'static str {
        match self {
            DrumClass::Kick => "kick",
            DrumClass::Snare => "snare",
            DrumClass::HiHat => "hi-hat",
            DrumClass::Other => "other",
        }
    }
}

/// A classified percussive onset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrumHit {
    pub onset_secs: f64,
    pub class: DrumClass,

    /// Winning profile ratio [0.0, 1.0]
    pub confidence: f32,

    /// Peak amplitude around the onset [0.0, 1.0]
    pub velocity: f32,
}

/// Drum transcription plus loop/complexity analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrumAnalysis {
    pub hits: Vec<DrumHit>,

    /// Best-scoring repeating loop length in bars, when one was found
    pub loop_bars: Option<u32>,

    /// Self-similarity score of the winning loop hypothesis [0.0, 1.0]
    pub loop_score: f32,

    /// Entropy of the inter-onset-interval distribution [0.0, 1.0]
    pub complexity: f32,
}

/// Pitch class 0..=11, C = 0
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PitchClass(pub u8);

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

impl PitchClass {
    pub fn name(&self) -> &'static str {
        NOTE_NAMES[(self.0 % 12) as usize]
    }
}

impl std::fmt::Display for PitchClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
}

impl ChordQuality {
    /// Chord symbol suffix ("" for major, "m" for minor)
    pub fn suffix(&self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
        }
    }
}

/// A detected chord span
/// Events are ordered and non-overlapping; gaps are allowed where no
/// confident chord was found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub start_secs: f64,
    pub end_secs: f64,
    pub root: PitchClass,
    pub quality: ChordQuality,
    pub confidence: f32,
}

impl ChordEvent {
    /// Chord symbol, e.g. "Am"
    pub fn symbol(&self) -> String {
        format!("{}{}", self.root.name(), self.quality.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Major,
    Minor,
}

/// Whole-buffer key estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEstimate {
    pub tonic: PitchClass,
    pub mode: KeyMode,
    pub confidence: f32,
}

/// Chord progression plus key estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordAnalysis {
    pub chords: Vec<ChordEvent>,
    pub key: KeyEstimate,
}

/// Typed output of a successful stage run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    Tempo(BeatGrid),
    Separation(StemSet),
    Melody(Vec<NoteEvent>),
    Drums(DrumAnalysis),
    Chords(ChordAnalysis),
}

impl StageOutput {
    pub fn kind(&self) -> StageKind {
        match self {
            StageOutput::Tempo(_) => StageKind::Tempo,
            StageOutput::Separation(_) => StageKind::Separation,
            StageOutput::Melody(_) => StageKind::Melody,
            StageOutput::Drums(_) => StageKind::Drums,
            StageOutput::Chords(_) => StageKind::Chords,
        }
    }

    pub fn beat_grid(&self) -> Option<&BeatGrid> {
        match self {
            StageOutput::Tempo(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn stem_set(&self) -> Option<&StemSet> {
        match self {
            StageOutput::Separation(stems) => Some(stems),
            _ => None,
        }
    }
}

/// Recorded outcome of a stage, tagged with the fingerprint it was
/// computed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    NotRun,
    Success {
        output: StageOutput,
        fingerprint: Fingerprint,
    },
    Failed {
        failure: FailureKind,
        fingerprint: Fingerprint,
    },
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageResult::Failed { .. })
    }

    pub fn output(&self) -> Option<&StageOutput> {
        match self {
            StageResult::Success { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureKind> {
        match self {
            StageResult::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            StageResult::Success { fingerprint, .. }
            | StageResult::Failed { fingerprint, .. } => Some(fingerprint),
            StageResult::NotRun => None,
        }
    }
}

/// Errors surfaced by an external separator backend
#[derive(Debug, Error)]
pub enum SeparatorError {
    #[error("separator backend unavailable")]
    Unavailable,

    #[error("separator backend failed: {0}")]
    Backend(String),
}

/// External source-separation model
/// Invoked once per full buffer; chunking is the backend's concern
pub trait Separator: Send + Sync {
    fn separate(
        &self,
        audio: &AudioBuffer,
        method: SeparationMethod,
        stem_count: u8,
    ) -> Result<Vec<(StemName, AudioBuffer)>, SeparatorError>;

    /// Whether the backend can be invoked (model present, runtime ready)
    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Per-frame pitch estimate from the external pitch model
#[derive(Debug, Clone, Copy)]
pub struct PitchFrame {
    pub frequency: f32,
    pub confidence: f32,
}

/// External monophonic pitch estimation model, invoked per analysis frame
pub trait PitchEstimator: Send + Sync {
    fn estimate(&self, frame: &[f32], sample_rate: u32) -> PitchFrame;

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// External collaborators handed to the orchestrator at construction
/// A missing collaborator surfaces as ExternalDependencyUnavailable when
/// the stage needing it runs
#[derive(Clone, Default)]
pub struct Collaborators {
    pub separator: Option<Arc<dyn Separator>>,
    pub pitch: Option<Arc<dyn PitchEstimator>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_round_trip() {
        for stage in StageKind::ALL {
            assert_eq!(StageKind::from_name(stage.name()), Some(stage));
        }
        assert_eq!(StageKind::from_name("viz"), None);
    }

    #[test]
    fn test_dependency_table() {
        let params = ParameterSet::default();
        assert!(StageKind::Tempo.dependencies(&params).is_empty());
        assert!(StageKind::Separation.dependencies(&params).is_empty());
        assert_eq!(StageKind::Melody.dependencies(&params), &[StageKind::Tempo]);
        assert_eq!(StageKind::Chords.dependencies(&params), &[StageKind::Tempo]);
    }

    #[test]
    fn test_stem_source_adds_separation_dependency() {
        let mut params = ParameterSet::default();
        params.drums.source = AnalysisSource::Stem;
        assert_eq!(
            StageKind::Drums.dependencies(&params),
            &[StageKind::Tempo, StageKind::Separation]
        );
    }

    #[test]
    fn test_chord_symbol() {
        let event = ChordEvent {
            start_secs: 0.0,
            end_secs: 1.0,
            root: PitchClass(9),
            quality: ChordQuality::Minor,
            confidence: 0.8,
        };
        assert_eq!(event.symbol(), "Am");
    }

    #[test]
    fn test_stage_result_accessors() {
        assert!(!StageResult::NotRun.is_success());
        assert!(StageResult::NotRun.fingerprint().is_none());
    }

    #[test]
    fn test_failure_kind_serialization_round_trip() {
        let failure = FailureKind::UpstreamFailed(StageKind::Tempo);
        let json = serde_json::to_string(&failure).unwrap();
        let parsed: FailureKind = serde_json::from_str(&json).unwrap();
        assert_eq!(failure, parsed);
    }
}
