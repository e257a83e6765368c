// Project state
// The mutable aggregate of one analyzed track: audio reference, per-stage
// results and a monotonically increasing revision counter

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::audio::source::AudioBuffer;
use crate::stages::{StageKind, StageResult};

const NOT_RUN: StageResult = StageResult::NotRun;

/// Aggregate state of one project
///
/// Each stage execution mutates exactly its own result entry and bumps the
/// revision. The audio buffer is owned exclusively and shared read-only
/// with stages through the `Arc`.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub project_id: Uuid,
    pub name: String,
    pub audio_path: PathBuf,
    pub created_at: DateTime<Utc>,
    audio: Arc<AudioBuffer>,
    revision: u64,
    results: HashMap<StageKind, StageResult>,
}

impl ProjectState {
    /// Create a fresh project around a loaded buffer
    pub fn new(name: impl Into<String>, audio_path: &Path, audio: AudioBuffer) -> Self {
        ProjectState {
            project_id: Uuid::new_v4(),
            name: name.into(),
            audio_path: audio_path.to_path_buf(),
            created_at: Utc::now(),
            audio: Arc::new(audio),
            revision: 0,
            results: HashMap::new(),
        }
    }

    /// Reassemble a project from persisted parts
    pub fn from_parts(
        project_id: Uuid,
        name: String,
        audio_path: PathBuf,
        created_at: DateTime<Utc>,
        audio: AudioBuffer,
        revision: u64,
        results: HashMap<StageKind, StageResult>,
    ) -> Self {
        ProjectState {
            project_id,
            name,
            audio_path,
            created_at,
            audio: Arc::new(audio),
            revision,
            results,
        }
    }

    pub fn audio(&self) -> &Arc<AudioBuffer> {
        &self.audio
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Stored result for a stage; stages never executed read as NotRun
    pub fn result(&self, stage: StageKind) -> &StageResult {
        self.results.get(&stage).unwrap_or(&NOT_RUN)
    }

    pub fn results(&self) -> &HashMap<StageKind, StageResult> {
        &self.results
    }

    /// Record a stage outcome and bump the revision
    pub fn record(&mut self, stage: StageKind, result: StageResult) {
        self.results.insert(stage, result);
        self.revision += 1;
    }
}
