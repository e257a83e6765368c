// Pattern styles
// Closed set of genre templates with per-style lane rules

use serde::{Deserialize, Serialize};

/// Supported pattern styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    HipHop,
    Electronic,
    Rock,
    Jazz,
    Ambient,
    Reggae,
    Funk,
    Minimal,
}

impl Style {
    pub const ALL: [Style; 8] = [
        Style::HipHop,
        Style::Electronic,
        Style::Rock,
        Style::Jazz,
        Style::Ambient,
        Style::Reggae,
        Style::Funk,
        Style::Minimal,
    ];

    /// Parse a style key; unknown keys are the caller's error, never a
    /// silent fallback
    pub fn from_key(key: &str) -> Option<Style> {
        match key {
            "hip_hop" => Some(Style::HipHop),
            "electronic" => Some(Style::Electronic),
            "rock" => Some(Style::Rock),
            "jazz" => Some(Style::Jazz),
            "ambient" => Some(Style::Ambient),
            "reggae" => Some(Style::Reggae),
            "funk" => Some(Style::Funk),
            "minimal" => Some(Style::Minimal),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Style::HipHop => "hip_hop",
            Style::Electronic => "electronic",
            Style::Rock => "rock",
            Style::Jazz => "jazz",
            Style::Ambient => "ambient",
            Style::Reggae => "reggae",
            Style::Funk => "funk",
            Style::Minimal => "minimal",
        }
    }

    /// Lane rules for this style
    pub fn rules(&self) -> StyleRules {
        match self {
            Style::HipHop => StyleRules {
                melody_voice: "piano",
                chord_voice: "pad",
                fallback_drums: ["bd ~ bd ~", "~ sn ~ sn", "hh*8"],
            },
            Style::Electronic => StyleRules {
                melody_voice: "sawtooth",
                chord_voice: "pad",
                fallback_drums: ["bd ~ bd ~", "~ ~ sn ~", "hh*16"],
            },
            Style::Rock => StyleRules {
                melody_voice: "square",
                chord_voice: "pad",
                fallback_drums: ["bd ~ bd ~", "~ sn ~ sn", "hh*8"],
            },
            Style::Jazz => StyleRules {
                melody_voice: "epiano",
                chord_voice: "epiano",
                fallback_drums: ["bd ~ ~ bd", "~ sn ~ sn", "hh*4"],
            },
            Style::Ambient => StyleRules {
                melody_voice: "sine",
                chord_voice: "pad",
                fallback_drums: ["bd ~ ~ ~", "~ ~ sn ~", "hh*2"],
            },
            Style::Reggae => StyleRules {
                melody_voice: "piano",
                chord_voice: "organ",
                fallback_drums: ["bd ~ ~ ~", "~ sn ~ sn", "hh*8"],
            },
            Style::Funk => StyleRules {
                melody_voice: "clavinet",
                chord_voice: "organ",
                fallback_drums: ["bd ~ bd ~", "~ sn ~ sn", "hh*16"],
            },
            Style::Minimal => StyleRules {
                melody_voice: "sine",
                chord_voice: "pad",
                fallback_drums: ["bd ~ ~ ~", "~ sn ~ ~", "hh*4"],
            },
        }
    }

    /// Deterministic style suggestion from tempo
    /// Generation itself never falls back to a suggestion
    pub fn suggest(bpm: f64) -> Style {
        if bpm < 80.0 {
            Style::Ambient
        } else if bpm < 100.0 {
            Style::Jazz
        } else if bpm < 120.0 {
            Style::HipHop
        } else if bpm < 140.0 {
            Style::Rock
        } else {
            Style::Electronic
        }
    }
}

/// Per-style lane configuration
#[derive(Debug, Clone)]
pub struct StyleRules {
    /// Instrument for the melody lane
    pub melody_voice: &'static str,

    /// Instrument for the chord lane
    pub chord_voice: &'static str,

    /// Kick, snare and hat lines used when no drum analysis is available
    pub fallback_drums: [&'static str; 3],
}
