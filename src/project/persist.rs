// Project persistence
// Versioned JSON document holding the audio reference and all stage
// results; audio is re-loaded from the referenced path, never embedded

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::audio;
use crate::audio::source::AudioError;
use crate::config::LabConfig;
use crate::project::state::ProjectState;
use crate::stages::{StageKind, StageResult};

/// Current project document schema version
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown project schema version {found} (expected {expected})")]
    SchemaVersionMismatch { found: u32, expected: u32 },

    #[error("failed to reload project audio: {0}")]
    Audio(#[from] AudioError),
}

/// On-disk shape of a project
/// Stage entries are keyed by stage name; missing entries load as NotRun
#[derive(Debug, Serialize, Deserialize)]
struct ProjectDocument {
    schema_version: u32,
    project_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    audio_path: PathBuf,
    sample_rate: u32,
    revision: u64,
    stages: BTreeMap<String, StageResult>,
}

/// Write a project document to disk
pub fn save(state: &ProjectState, path: &Path) -> Result<(), PersistError> {
    let mut stages = BTreeMap::new();
    for (stage, result) in state.results() {
        if matches!(result, StageResult::NotRun) {
            continue;
        }
        stages.insert(stage.name().to_string(), result.clone());
    }

    let document = ProjectDocument {
        schema_version: SCHEMA_VERSION,
        project_id: state.project_id,
        name: state.name.clone(),
        created_at: state.created_at,
        audio_path: state.audio_path.clone(),
        sample_rate: state.audio().sample_rate(),
        revision: state.revision(),
        stages,
    };

    let json = serde_json::to_string_pretty(&document)?;
    std::fs::write(path, json)?;

    log::info!("saved project '{}' (revision {})", state.name, state.revision());
    Ok(())
}

/// Load a project document and reassemble the state
///
/// The schema version is checked before anything else is interpreted; a
/// mismatch is fatal for this load only. Audio is re-loaded from the
/// referenced path at the configured project rate.
pub fn load(path: &Path, config: &LabConfig) -> Result<ProjectState, PersistError> {
    let contents = std::fs::read_to_string(path)?;

    let value: serde_json::Value = serde_json::from_str(&contents)?;
    let found = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    if found != SCHEMA_VERSION {
        return Err(PersistError::SchemaVersionMismatch {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    let document: ProjectDocument = serde_json::from_value(value)?;

    let mut results: HashMap<StageKind, StageResult> = HashMap::new();
    for (name, result) in document.stages {
        match StageKind::from_name(&name) {
            Some(stage) => {
                results.insert(stage, result);
            }
            None => {
                log::warn!("ignoring unknown stage entry '{}' in project document", name);
            }
        }
    }

    let audio = audio::source::load(&document.audio_path, config)?;
    if document.sample_rate != audio.sample_rate() {
        log::warn!(
            "project was saved at {} Hz, reloaded at {} Hz",
            document.sample_rate,
            audio.sample_rate()
        );
    }

    Ok(ProjectState::from_parts(
        document.project_id,
        document.name,
        document.audio_path,
        document.created_at,
        audio,
        document.revision,
        results,
    ))
}
