// Separation stage
// Validates the request, invokes the external separator once per buffer
// and verifies the returned stems against the requested mode

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audio::source::AudioBuffer;
use crate::config::{SeparationMethod, SeparationParams};
use crate::stages::{
    FailureKind, QualityTag, Separator, SeparatorError, StemEntry, StemName, StemSet,
};

/// Stem layout for each supported mode
pub fn expected_stems(stem_count: u8) -> Option<&'static [StemName]> {
    match stem_count {
        2 => Some(&[StemName::Vocals, StemName::Other]),
        4 => Some(&[
            StemName::Vocals,
            StemName::Drums,
            StemName::Bass,
            StemName::Other,
        ]),
        5 => Some(&[
            StemName::Vocals,
            StemName::Drums,
            StemName::Bass,
            StemName::Piano,
            StemName::Other,
        ]),
        _ => None,
    }
}

/// Run source separation through the external backend
pub fn run(
    audio: &AudioBuffer,
    params: &SeparationParams,
    separator: Option<&Arc<dyn Separator>>,
) -> Result<StemSet, FailureKind> {
    let Some(expected) = expected_stems(params.stem_count) else {
        return Err(FailureKind::InvalidRequest(format!(
            "unsupported stem count {} (expected 2, 4 or 5)",
            params.stem_count
        )));
    };

    // The high-quality backend has no 2-stem model
    if params.method == SeparationMethod::HighQuality && params.stem_count == 2 {
        return Err(FailureKind::InvalidRequest(
            "high_quality separation supports 4 or 5 stems only".to_string(),
        ));
    }

    let Some(separator) = separator else {
        return Err(FailureKind::ExternalDependencyUnavailable {
            name: "separator".to_string(),
        });
    };
    if !separator.is_available() {
        return Err(FailureKind::ExternalDependencyUnavailable {
            name: separator.name().to_string(),
        });
    }

    log::info!(
        "separating {} stems via {} ({:?})",
        params.stem_count,
        separator.name(),
        params.method
    );

    let produced = separator
        .separate(audio, params.method, params.stem_count)
        .map_err(|e| match e {
            SeparatorError::Unavailable => FailureKind::ExternalDependencyUnavailable {
                name: separator.name().to_string(),
            },
            SeparatorError::Backend(message) => {
                FailureKind::OutputMismatch(format!("separator failed: {}", message))
            }
        })?;

    if produced.len() != expected.len() {
        return Err(FailureKind::OutputMismatch(format!(
            "requested {} stems, backend returned {}",
            expected.len(),
            produced.len()
        )));
    }

    let quality = match params.method {
        SeparationMethod::Fast => QualityTag::Standard,
        SeparationMethod::HighQuality => QualityTag::High,
    };

    let mut stems = BTreeMap::new();
    for (name, buffer) in produced {
        if !expected.contains(&name) {
            return Err(FailureKind::OutputMismatch(format!(
                "backend returned unexpected stem '{}'",
                name.name()
            )));
        }
        stems.insert(
            name,
            StemEntry {
                path: None,
                buffer: Some(Arc::new(buffer)),
                method: params.method,
                quality,
            },
        );
    }

    // Duplicate names collapse in the map and show up here
    if stems.len() != expected.len() {
        return Err(FailureKind::OutputMismatch(
            "backend returned duplicate stem names".to_string(),
        ));
    }

    Ok(StemSet {
        stem_count: params.stem_count,
        stems,
    })
}
