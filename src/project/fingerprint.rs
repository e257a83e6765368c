// Stage fingerprints
// Deterministic identity over a stage's parameters, the audio content and
// all declared upstream results; decides cache validity

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ParameterSet;
use crate::stages::StageKind;

/// Derived identity of one stage computation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical JSON of the one parameter struct a stage's fingerprint covers
/// Struct field order is fixed, so the encoding is stable
pub fn stage_params_json(stage: StageKind, params: &ParameterSet) -> String {
    let encoded = match stage {
        StageKind::Tempo => serde_json::to_string(&params.tempo),
        StageKind::Separation => serde_json::to_string(&params.separation),
        StageKind::Melody => serde_json::to_string(&params.melody),
        StageKind::Drums => serde_json::to_string(&params.drums),
        StageKind::Chords => serde_json::to_string(&params.chords),
    };
    // Serializing plain parameter structs cannot fail
    encoded.unwrap_or_default()
}

/// Compute the fingerprint of (stage, own params, audio identity,
/// upstream result identities)
pub fn compute(
    stage: StageKind,
    params: &ParameterSet,
    audio_checksum: &str,
    upstreams: &[(StageKind, Fingerprint)],
) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(stage.name().as_bytes());
    hasher.update([0u8]);
    hasher.update(stage_params_json(stage, params).as_bytes());
    hasher.update([0u8]);
    hasher.update(audio_checksum.as_bytes());

    for (upstream, fingerprint) in upstreams {
        hasher.update([0u8]);
        hasher.update(upstream.name().as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_str().as_bytes());
    }

    Fingerprint(hex::encode(hasher.finalize()))
}
