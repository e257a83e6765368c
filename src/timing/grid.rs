// Beat grid - canonical time-to-beat mapping
// Produced by the tempo stage, consumed by every beat-relative stage

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Musical time signature guess
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Beats per bar
    pub numerator: u32,

    /// Beat unit (4 = quarter note)
    pub denominator: u32,

    /// Confidence of the guess [0.0, 1.0]
    pub confidence: f32,
}

/// Grid subdivision - resolution used for quantization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subdivision {
    /// Quarter notes (1 per beat)
    Quarter,

    /// Eighth notes (2 per beat)
    Eighth,

    /// Sixteenth notes (4 per beat)
    Sixteenth,

    /// Triplet feel (3 per beat)
    Triplet,
}

impl Subdivision {
    /// Number of subdivisions per beat
    pub fn per_beat(&self) -> u32 {
        match self {
            Subdivision::Quarter => 1,
            Subdivision::Eighth => 2,
            Subdivision::Sixteenth => 4,
            Subdivision::Triplet => 3,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidBeatGrid {
    #[error("beat timestamps not strictly increasing at index {index}")]
    BeatsNotIncreasing { index: usize },

    #[error("downbeat index {index} out of range ({beats} beats)")]
    DownbeatOutOfRange { index: usize, beats: usize },

    #[error("downbeat indices not strictly increasing at position {position}")]
    DownbeatsNotIncreasing { position: usize },

    #[error("bpm must be positive, got {bpm}")]
    NonPositiveBpm { bpm: f64 },
}

/// Canonical mapping from time to musical beat position
///
/// Invariants (checked by `validate`): beat timestamps strictly increasing;
/// downbeat indices are a strictly increasing subsequence of beat indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatGrid {
    /// Estimated beats per minute
    pub bpm: f64,

    /// Agreement strength of the estimate [0.0, 1.0]
    pub confidence: f32,

    /// Beat timestamps in seconds, strictly increasing
    pub beats: Vec<f64>,

    /// Indices into `beats` marking bar starts
    pub downbeats: Vec<usize>,

    /// Time signature guess, when the accent pattern supports one
    pub time_signature: Option<TimeSignature>,

    /// Regularity of inter-onset spacing [0.0, 1.0]
    pub rhythm_regularity: f32,

    /// Fraction of onsets landing off the beat [0.0, 1.0]
    pub syncopation: f32,
}

impl BeatGrid {
    /// Check the structural invariants
    pub fn validate(&self) -> Result<(), InvalidBeatGrid> {
        if self.bpm <= 0.0 {
            return Err(InvalidBeatGrid::NonPositiveBpm { bpm: self.bpm });
        }

        for i in 1..self.beats.len() {
            if self.beats[i] <= self.beats[i - 1] {
                return Err(InvalidBeatGrid::BeatsNotIncreasing { index: i });
            }
        }

        for (position, &index) in self.downbeats.iter().enumerate() {
            if index >= self.beats.len() {
                return Err(InvalidBeatGrid::DownbeatOutOfRange {
                    index,
                    beats: self.beats.len(),
                });
            }
            if position > 0 && index <= self.downbeats[position - 1] {
                return Err(InvalidBeatGrid::DownbeatsNotIncreasing { position });
            }
        }

        Ok(())
    }

    /// Duration of one beat in seconds
    pub fn beat_secs(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Beats per bar, from the time signature guess (4 when absent)
    pub fn beats_per_bar(&self) -> u32 {
        self.time_signature.map(|ts| ts.numerator).unwrap_or(4)
    }

    /// Duration of one bar in seconds
    pub fn bar_secs(&self) -> f64 {
        self.beat_secs() * self.beats_per_bar() as f64
    }

    /// Downbeat timestamps in seconds
    pub fn downbeat_times(&self) -> Vec<f64> {
        self.downbeats.iter().map(|&i| self.beats[i]).collect()
    }

    /// Index and timestamp of the beat nearest to a timestamp
    pub fn nearest_beat(&self, time_secs: f64) -> Option<(usize, f64)> {
        let mut nearest: Option<(usize, f64)> = None;
        let mut nearest_distance = f64::MAX;

        for (i, &beat) in self.beats.iter().enumerate() {
            let distance = (beat - time_secs).abs();
            if distance < nearest_distance {
                nearest_distance = distance;
                nearest = Some((i, beat));
            }
        }

        nearest
    }

    /// All grid division timestamps at the given subdivision
    ///
    /// Between consecutive beats the interval is split evenly; the final
    /// beat closes the list. Uses actual beat spacing, not the nominal
    /// tempo period, so irregular grids subdivide correctly.
    pub fn division_times(&self, subdivision: Subdivision) -> Vec<f64> {
        let per_beat = subdivision.per_beat() as usize;
        if self.beats.is_empty() {
            return Vec::new();
        }

        let mut times = Vec::with_capacity(self.beats.len() * per_beat);
        for pair in self.beats.windows(2) {
            let step = (pair[1] - pair[0]) / per_beat as f64;
            for k in 0..per_beat {
                times.push(pair[0] + k as f64 * step);
            }
        }
        times.push(self.beats[self.beats.len() - 1]);
        times
    }

    /// Timestamp of the grid division nearest to a timestamp
    pub fn nearest_division(&self, time_secs: f64, subdivision: Subdivision) -> Option<f64> {
        let divisions = self.division_times(subdivision);
        divisions
            .into_iter()
            .min_by(|a, b| {
                (a - time_secs)
                    .abs()
                    .partial_cmp(&(b - time_secs).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Bar number containing a timestamp (0-indexed, by downbeats when
    /// available, nominal bar length otherwise)
    pub fn bar_at(&self, time_secs: f64) -> u32 {
        let downbeat_times = self.downbeat_times();
        if !downbeat_times.is_empty() {
            let mut bar = 0;
            for (i, &t) in downbeat_times.iter().enumerate() {
                if time_secs >= t {
                    bar = i as u32;
                }
            }
            return bar;
        }

        let bar_secs = self.bar_secs();
        if bar_secs > 0.0 {
            (time_secs / bar_secs).floor().max(0.0) as u32
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regular_grid(bpm: f64, beats: usize) -> BeatGrid {
        let beat_secs = 60.0 / bpm;
        BeatGrid {
            bpm,
            confidence: 0.9,
            beats: (0..beats).map(|i| i as f64 * beat_secs).collect(),
            downbeats: (0..beats).step_by(4).collect(),
            time_signature: Some(TimeSignature {
                numerator: 4,
                denominator: 4,
                confidence: 0.8,
            }),
            rhythm_regularity: 1.0,
            syncopation: 0.0,
        }
    }

    #[test]
    fn test_valid_grid_passes() {
        assert_eq!(regular_grid(120.0, 16).validate(), Ok(()));
    }

    #[test]
    fn test_non_increasing_beats_rejected() {
        let mut grid = regular_grid(120.0, 8);
        grid.beats[3] = grid.beats[2];
        assert!(matches!(
            grid.validate(),
            Err(InvalidBeatGrid::BeatsNotIncreasing { index: 3 })
        ));
    }

    #[test]
    fn test_downbeat_out_of_range_rejected() {
        let mut grid = regular_grid(120.0, 8);
        grid.downbeats.push(99);
        assert!(matches!(
            grid.validate(),
            Err(InvalidBeatGrid::DownbeatOutOfRange { index: 99, .. })
        ));
    }

    #[test]
    fn test_non_increasing_downbeats_rejected() {
        let mut grid = regular_grid(120.0, 8);
        grid.downbeats = vec![0, 4, 4];
        assert!(matches!(
            grid.validate(),
            Err(InvalidBeatGrid::DownbeatsNotIncreasing { position: 2 })
        ));
    }

    #[test]
    fn test_removing_downbeats_preserves_beats() {
        let grid = regular_grid(120.0, 16);
        let mut stripped = grid.clone();
        stripped.downbeats.clear();

        assert_eq!(stripped.validate(), Ok(()));
        assert_eq!(grid.beats, stripped.beats);
    }

    #[test]
    fn test_nearest_beat() {
        let grid = regular_grid(120.0, 4);
        let (idx, time) = grid.nearest_beat(0.52).unwrap();
        assert_eq!(idx, 1);
        assert!((time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_division_times_quarter() {
        let grid = regular_grid(120.0, 4);
        let divisions = grid.division_times(Subdivision::Quarter);
        assert_eq!(divisions, grid.beats);
    }

    #[test]
    fn test_division_times_eighth() {
        let grid = regular_grid(120.0, 3);
        let divisions = grid.division_times(Subdivision::Eighth);
        // 2 beats split in half plus the final beat
        assert_eq!(divisions.len(), 5);
        assert!((divisions[1] - 0.25).abs() < 1e-9);
        assert!((divisions[3] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_division() {
        let grid = regular_grid(120.0, 4);
        let snapped = grid.nearest_division(0.46, Subdivision::Quarter).unwrap();
        assert!((snapped - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bar_at_uses_downbeats() {
        let grid = regular_grid(120.0, 16);
        // Bars start every 2 seconds at 120 BPM 4/4
        assert_eq!(grid.bar_at(0.1), 0);
        assert_eq!(grid.bar_at(2.1), 1);
        assert_eq!(grid.bar_at(6.5), 3);
    }
}
