// Analysis configuration
// Explicit, per-stage parameter values passed into the orchestrator at
// construction; no process-wide mutable defaults

use serde::{Deserialize, Serialize};

use crate::stages::StageKind;
use crate::timing::grid::Subdivision;

/// Crate-wide audio processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    /// Canonical project sample rate in Hz
    /// All loaded audio is resampled to this rate before analysis
    pub sample_rate: u32,

    /// Maximum accepted audio length in seconds
    pub max_duration_secs: f64,

    /// STFT framing shared by all spectral analysis
    pub frame: FrameConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            sample_rate: 44100,
            max_duration_secs: 600.0,
            frame: FrameConfig::default(),
        }
    }
}

/// STFT framing parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameConfig {
    /// FFT window size in samples (power of 2)
    pub window_size: usize,

    /// Hop size in samples (advance between frames)
    pub hop_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            window_size: 2048,
            hop_size: 512,
        }
    }
}

impl FrameConfig {
    /// Duration of one hop in seconds
    pub fn hop_secs(&self, sample_rate: u32) -> f64 {
        self.hop_size as f64 / sample_rate as f64
    }
}

/// Complete per-stage parameter mapping
/// A stage's fingerprint covers only its own entry plus its upstream results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub tempo: TempoParams,
    pub separation: SeparationParams,
    pub melody: MelodyParams,
    pub drums: DrumParams,
    pub chords: ChordParams,
}

/// Tempo/beat tracking options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoParams {
    /// Minimum BPM to consider
    pub min_bpm: f64,

    /// Maximum BPM to consider
    pub max_bpm: f64,

    /// Threshold multiplier for onset peak picking
    /// Threshold = mean(flux) + sensitivity * std(flux)
    pub onset_sensitivity: f32,
}

impl Default for TempoParams {
    fn default() -> Self {
        TempoParams {
            min_bpm: 60.0,
            max_bpm: 180.0,
            onset_sensitivity: 1.5,
        }
    }
}

/// Stem separation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparationMethod {
    /// Fast separation, standard quality (2/4/5 stems)
    Fast,

    /// Slow separation, high quality (4/5 stems only)
    HighQuality,
}

/// Stem separation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationParams {
    pub method: SeparationMethod,

    /// Requested stem count: 2, 4 or 5
    pub stem_count: u8,
}

impl Default for SeparationParams {
    fn default() -> Self {
        SeparationParams {
            method: SeparationMethod::Fast,
            stem_count: 2,
        }
    }
}

/// Which signal a stage analyzes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// The full mix as loaded
    Mix,

    /// The relevant separated stem; adds Separation as a declared dependency
    Stem,
}

/// Melody extraction options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelodyParams {
    /// Minimum per-frame pitch confidence to keep
    pub confidence_threshold: f32,

    /// Snap note onsets to the beat grid
    /// Never applied silently; quantized notes carry a flag
    pub quantize: bool,

    /// Grid subdivision used when quantizing
    pub subdivision: Subdivision,

    pub source: AnalysisSource,

    /// Minimum note duration in seconds; shorter segments are dropped
    pub min_note_secs: f64,

    /// Maximum note duration in seconds; longer segments are dropped
    pub max_note_secs: f64,
}

impl Default for MelodyParams {
    fn default() -> Self {
        MelodyParams {
            confidence_threshold: 0.5,
            quantize: false,
            subdivision: Subdivision::Sixteenth,
            source: AnalysisSource::Mix,
            min_note_secs: 0.1,
            max_note_secs: 2.0,
        }
    }
}

/// Drum onset detection and classification options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrumParams {
    /// Threshold multiplier for onset peak picking
    pub onset_sensitivity: f32,

    /// Minimum low-band energy ratio for a kick classification
    pub kick_threshold: f32,

    /// Minimum mid-band energy ratio for a snare classification
    pub snare_threshold: f32,

    /// Minimum high-band energy ratio for a hi-hat classification
    pub hat_threshold: f32,

    pub source: AnalysisSource,
}

impl Default for DrumParams {
    fn default() -> Self {
        DrumParams {
            onset_sensitivity: 1.5,
            kick_threshold: 0.65,
            snare_threshold: 0.6,
            hat_threshold: 0.6,
            source: AnalysisSource::Mix,
        }
    }
}

/// Chord and key estimation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordParams {
    /// Analysis window span in beats
    pub window_beats: u32,

    /// Minimum run length, in windows, that survives smoothing
    pub smoothing_windows: usize,

    /// Minimum template correlation for a window to report a chord at all
    /// Windows below this leave a gap
    pub confidence_threshold: f32,
}

impl Default for ChordParams {
    fn default() -> Self {
        ChordParams {
            window_beats: 1,
            smoothing_windows: 2,
            confidence_threshold: 0.3,
        }
    }
}

/// Per-stage execution timeouts in seconds
/// A stage exceeding its timeout is recorded as Failed(Timeout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub tempo: Option<f64>,
    pub separation: Option<f64>,
    pub melody: Option<f64>,
    pub drums: Option<f64>,
    pub chords: Option<f64>,
}

impl StageTimeouts {
    /// Look up the configured timeout for a stage
    pub fn for_stage(&self, stage: StageKind) -> Option<f64> {
        match stage {
            StageKind::Tempo => self.tempo,
            StageKind::Separation => self.separation,
            StageKind::Melody => self.melody,
            StageKind::Drums => self.drums,
            StageKind::Chords => self.chords,
        }
    }
}
