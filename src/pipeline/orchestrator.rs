// Pipeline orchestrator
// Sequences stage execution over the static dependency table, decides
// re-run vs cache-hit by fingerprint and aggregates partial failures

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::audio::source::AudioBuffer;
use crate::config::{AnalysisSource, FrameConfig, LabConfig, ParameterSet, StageTimeouts};
use crate::pipeline::trace::{TraceEntry, TracePhase, TraceWriter};
use crate::project::fingerprint::{self, Fingerprint};
use crate::project::state::ProjectState;
use crate::stages::{
    chords, drums, melody, separation, tempo, Collaborators, FailureKind, StageKind,
    StageOutput, StageResult, StemName, StemSet,
};
use crate::timing::grid::BeatGrid;

/// Upstream outputs handed to a stage run
#[derive(Default, Clone)]
struct StageInputs {
    beat_grid: Option<BeatGrid>,
    stems: Option<StemSet>,
}

/// Slot observed by concurrent requests for the same (stage, fingerprint)
struct InflightSlot {
    result: Mutex<Option<StageResult>>,
    ready: Condvar,
}

enum Claim {
    /// This request runs the computation
    Owner(Arc<InflightSlot>),

    /// Another request is already computing; await its result
    Waiter(Arc<InflightSlot>),
}

/// Drives stage execution against one project
///
/// `ensure` is safe to call from multiple threads; mutually non-dependent
/// stages run concurrently, and at most one computation per
/// (stage, fingerprint) is ever in flight.
pub struct Orchestrator {
    config: LabConfig,
    timeouts: StageTimeouts,
    collaborators: Collaborators,
    state: Mutex<ProjectState>,
    inflight: Mutex<HashMap<Fingerprint, Arc<InflightSlot>>>,
    cancel_flags: Mutex<HashMap<StageKind, Arc<AtomicBool>>>,
    trace: Option<TraceWriter>,
}

impl Orchestrator {
    pub fn new(state: ProjectState, config: LabConfig, collaborators: Collaborators) -> Self {
        Orchestrator {
            config,
            timeouts: StageTimeouts::default(),
            collaborators,
            state: Mutex::new(state),
            inflight: Mutex::new(HashMap::new()),
            cancel_flags: Mutex::new(HashMap::new()),
            trace: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Ensure a stage result is available for the given parameters
    ///
    /// A stored Success whose fingerprint matches is returned unchanged
    /// with no re-computation. A stored Failed with a matching fingerprint
    /// is retried from scratch on this explicit request. Declared upstream
    /// dependencies are ensured first; a failed upstream short-circuits
    /// this stage with UpstreamFailed rather than being retried.
    pub fn ensure(&self, stage: StageKind, params: &ParameterSet) -> StageResult {
        self.ensure_inner(stage, params, true)
    }

    /// Ensure several stages, running mutually non-dependent ones on
    /// worker threads
    pub fn ensure_all(&self, stages: &[StageKind], params: &ParameterSet) -> Vec<StageResult> {
        thread::scope(|scope| {
            let handles: Vec<_> = stages
                .iter()
                .map(|&stage| scope.spawn(move || self.ensure(stage, params)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(StageResult::NotRun))
                .collect()
        })
    }

    /// Cooperatively cancel the in-flight request for a stage
    /// A computation finishing after cancellation has its result discarded
    pub fn cancel(&self, stage: StageKind) {
        if let Some(flag) = self.cancel_flags.lock().unwrap().get(&stage) {
            flag.store(true, Ordering::SeqCst);
            log::info!("cancellation requested for stage '{}'", stage);
        }
    }

    /// Clone of the current project state
    pub fn snapshot(&self) -> ProjectState {
        self.state.lock().unwrap().clone()
    }

    /// Current stored result for a stage
    pub fn result(&self, stage: StageKind) -> StageResult {
        self.state.lock().unwrap().result(stage).clone()
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().unwrap().revision()
    }

    fn ensure_inner(&self, stage: StageKind, params: &ParameterSet, explicit: bool) -> StageResult {
        // Resolve declared upstreams first; failed upstreams are not
        // retried here, they short-circuit below
        let mut upstream_fingerprints = Vec::new();
        let mut inputs = StageInputs::default();
        let mut failed_upstream = None;

        for &dep in stage.dependencies(params) {
            let dep_result = self.ensure_inner(dep, params, false);
            match &dep_result {
                StageResult::Success {
                    output,
                    fingerprint,
                } => {
                    upstream_fingerprints.push((dep, fingerprint.clone()));
                    match output {
                        StageOutput::Tempo(grid) => inputs.beat_grid = Some(grid.clone()),
                        StageOutput::Separation(stems) => inputs.stems = Some(stems.clone()),
                        _ => {}
                    }
                }
                StageResult::Failed { fingerprint, .. } => {
                    upstream_fingerprints.push((dep, fingerprint.clone()));
                    failed_upstream.get_or_insert(dep);
                }
                StageResult::NotRun => {
                    failed_upstream.get_or_insert(dep);
                }
            }
        }

        let audio_checksum = {
            let state = self.state.lock().unwrap();
            state.audio().checksum().to_string()
        };
        let fingerprint =
            fingerprint::compute(stage, params, &audio_checksum, &upstream_fingerprints);

        // Cache check: matching Success always hits; matching Failed only
        // survives for recursive dependency resolution
        let stored = {
            let state = self.state.lock().unwrap();
            state.result(stage).clone()
        };
        match &stored {
            StageResult::Success {
                fingerprint: stored_fp,
                ..
            } if *stored_fp == fingerprint => {
                self.trace(stage, TracePhase::CacheHit, "fingerprint match", Some(&fingerprint));
                return stored;
            }
            StageResult::Failed {
                fingerprint: stored_fp,
                ..
            } if *stored_fp == fingerprint && !explicit => {
                return stored;
            }
            _ => {}
        }

        if let Some(dep) = failed_upstream {
            let result = StageResult::Failed {
                failure: FailureKind::UpstreamFailed(dep),
                fingerprint,
            };
            self.record(stage, result.clone());
            return result;
        }

        // At-most-one in-flight computation per (stage, fingerprint)
        let claim = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&fingerprint) {
                Some(slot) => Claim::Waiter(slot.clone()),
                None => {
                    let slot = Arc::new(InflightSlot {
                        result: Mutex::new(None),
                        ready: Condvar::new(),
                    });
                    inflight.insert(fingerprint.clone(), slot.clone());
                    Claim::Owner(slot)
                }
            }
        };

        let slot = match claim {
            Claim::Waiter(slot) => {
                log::debug!("awaiting in-flight computation of '{}'", stage);
                return self.await_slot(&slot);
            }
            Claim::Owner(slot) => slot,
        };

        // Fresh cancellation flag for this run
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .unwrap()
            .insert(stage, cancel.clone());

        self.trace(stage, TracePhase::Started, "running", Some(&fingerprint));

        let outcome = self.execute(stage, params, inputs, cancel);

        let result = match outcome {
            Ok(output) => StageResult::Success {
                output,
                fingerprint: fingerprint.clone(),
            },
            Err(failure) => StageResult::Failed {
                failure,
                fingerprint: fingerprint.clone(),
            },
        };

        self.record(stage, result.clone());

        // Publish to waiters and release the slot
        {
            let mut slot_result = slot.result.lock().unwrap();
            *slot_result = Some(result.clone());
            slot.ready.notify_all();
        }
        self.inflight.lock().unwrap().remove(&fingerprint);

        result
    }

    /// Block until the owning request publishes its result
    fn await_slot(&self, slot: &InflightSlot) -> StageResult {
        let mut guard = slot.result.lock().unwrap();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = slot.ready.wait(guard).unwrap();
        }
    }

    /// Run one stage on a worker thread, enforcing the configured timeout
    /// and the cooperative cancellation contract
    fn execute(
        &self,
        stage: StageKind,
        params: &ParameterSet,
        inputs: StageInputs,
        cancel: Arc<AtomicBool>,
    ) -> Result<StageOutput, FailureKind> {
        let audio = self.state.lock().unwrap().audio().clone();
        let params = params.clone();
        let frame = self.config.frame;
        let collaborators = self.collaborators.clone();
        let timeout = self.timeouts.for_stage(stage);

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let outcome = run_stage(stage, &audio, &inputs, &params, frame, &collaborators);
            // The receiver may be gone after a timeout
            let _ = sender.send(outcome);
        });

        let outcome = match timeout {
            Some(secs) => match receiver.recv_timeout(Duration::from_secs_f64(secs)) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("stage '{}' timed out after {:.1}s", stage, secs);
                    return Err(FailureKind::Timeout { secs });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(FailureKind::OutputMismatch(
                        "stage worker terminated unexpectedly".to_string(),
                    ))
                }
            },
            None => receiver.recv().unwrap_or(Err(FailureKind::OutputMismatch(
                "stage worker terminated unexpectedly".to_string(),
            ))),
        };

        // A result arriving after cancellation is discarded
        if cancel.load(Ordering::SeqCst) {
            return Err(FailureKind::Cancelled);
        }

        outcome
    }

    /// Store a result under the short exclusive-write critical section
    /// Identical results are not re-recorded, so repeated short-circuits
    /// leave the revision untouched
    fn record(&self, stage: StageKind, result: StageResult) {
        let phase = match &result {
            StageResult::Success { .. } => TracePhase::Completed,
            StageResult::Failed {
                failure: FailureKind::Cancelled,
                ..
            } => TracePhase::Cancelled,
            _ => TracePhase::Failed,
        };
        let message = match &result {
            StageResult::Success { .. } => "ok".to_string(),
            StageResult::Failed { failure, .. } => failure.to_string(),
            StageResult::NotRun => "not run".to_string(),
        };
        let fingerprint = result.fingerprint().cloned();

        {
            let mut state = self.state.lock().unwrap();
            if state.result(stage) == &result {
                return;
            }
            state.record(stage, result);
        }

        self.trace(stage, phase, message, fingerprint.as_ref());
    }

    fn trace(
        &self,
        stage: StageKind,
        phase: TracePhase,
        message: impl Into<String>,
        fingerprint: Option<&Fingerprint>,
    ) {
        if let Some(writer) = &self.trace {
            let entry = TraceEntry::new(stage, phase, message, fingerprint);
            if let Err(error) = writer.write(&entry) {
                log::warn!("trace write failed: {}", error);
            }
        }
    }
}

/// Fixed dispatch over the closed stage set
fn run_stage(
    stage: StageKind,
    audio: &Arc<AudioBuffer>,
    inputs: &StageInputs,
    params: &ParameterSet,
    frame: FrameConfig,
    collaborators: &Collaborators,
) -> Result<StageOutput, FailureKind> {
    match stage {
        StageKind::Tempo => {
            tempo::run(audio, &params.tempo, &frame).map(StageOutput::Tempo)
        }
        StageKind::Separation => {
            separation::run(audio, &params.separation, collaborators.separator.as_ref())
                .map(StageOutput::Separation)
        }
        StageKind::Melody => {
            let buffer = select_source(audio, inputs, params.melody.source, StemName::Vocals)?;
            melody::run(
                &buffer,
                inputs.beat_grid.as_ref(),
                &params.melody,
                &frame,
                collaborators.pitch.as_ref(),
            )
            .map(StageOutput::Melody)
        }
        StageKind::Drums => {
            let buffer = select_source(audio, inputs, params.drums.source, StemName::Drums)?;
            drums::run(&buffer, inputs.beat_grid.as_ref(), &params.drums, &frame)
                .map(StageOutput::Drums)
        }
        StageKind::Chords => {
            let Some(grid) = inputs.beat_grid.as_ref() else {
                return Err(FailureKind::InvalidRequest(
                    "chord analysis requires a beat grid".to_string(),
                ));
            };
            chords::run(audio, grid, &params.chords, &frame).map(StageOutput::Chords)
        }
    }
}

/// Pick the buffer a stage analyzes: the mix, or a separated stem
fn select_source(
    audio: &Arc<AudioBuffer>,
    inputs: &StageInputs,
    source: AnalysisSource,
    stem: StemName,
) -> Result<Arc<AudioBuffer>, FailureKind> {
    match source {
        AnalysisSource::Mix => Ok(audio.clone()),
        AnalysisSource::Stem => {
            let Some(stems) = inputs.stems.as_ref() else {
                return Err(FailureKind::InvalidRequest(
                    "stem source requested without a separation result".to_string(),
                ));
            };
            let Some(entry) = stems.get(stem) else {
                return Err(FailureKind::InvalidRequest(format!(
                    "separation mode has no '{}' stem",
                    stem.name()
                )));
            };
            match entry.buffer.as_ref() {
                Some(buffer) => Ok(buffer.clone()),
                None => Err(FailureKind::InvalidRequest(format!(
                    "'{}' stem audio is not resident; re-run separation",
                    stem.name()
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeparationMethod;
    use crate::stages::{PitchEstimator, PitchFrame, Separator, SeparatorError};
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    /// Counts invocations; optionally sleeps to simulate model inference
    struct CountingSeparator {
        calls: AtomicUsize,
        sleep_ms: u64,
        sleep_first_call_only: bool,
    }

    impl CountingSeparator {
        fn new() -> Self {
            CountingSeparator {
                calls: AtomicUsize::new(0),
                sleep_ms: 0,
                sleep_first_call_only: false,
            }
        }

        fn slow(sleep_ms: u64, first_only: bool) -> Self {
            CountingSeparator {
                calls: AtomicUsize::new(0),
                sleep_ms,
                sleep_first_call_only: first_only,
            }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Separator for CountingSeparator {
        fn separate(
            &self,
            audio: &AudioBuffer,
            _method: SeparationMethod,
            stem_count: u8,
        ) -> Result<Vec<(StemName, AudioBuffer)>, SeparatorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.sleep_ms > 0 && (!self.sleep_first_call_only || call == 0) {
                thread::sleep(Duration::from_millis(self.sleep_ms));
            }

            let names: &[StemName] = match stem_count {
                2 => &[StemName::Vocals, StemName::Other],
                4 => &[StemName::Vocals, StemName::Drums, StemName::Bass, StemName::Other],
                _ => &[
                    StemName::Vocals,
                    StemName::Drums,
                    StemName::Bass,
                    StemName::Piano,
                    StemName::Other,
                ],
            };
            Ok(names
                .iter()
                .map(|&name| {
                    (
                        name,
                        AudioBuffer::from_samples(
                            audio.samples().to_vec(),
                            audio.sample_rate(),
                        ),
                    )
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "counting-separator"
        }
    }

    /// Constant pitch, counting every frame invocation
    struct CountingEstimator {
        calls: AtomicUsize,
    }

    impl CountingEstimator {
        fn new() -> Self {
            CountingEstimator {
                calls: AtomicUsize::new(0),
            }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PitchEstimator for CountingEstimator {
        fn estimate(&self, _frame: &[f32], _sample_rate: u32) -> PitchFrame {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PitchFrame {
                frequency: 440.0,
                confidence: 0.9,
            }
        }

        fn name(&self) -> &'static str {
            "counting-estimator"
        }
    }

    /// Silence with short wideband bursts every half second (120 BPM)
    fn click_audio(secs: f64) -> AudioBuffer {
        let sample_rate = 44100u32;
        let mut samples = vec![0.0f32; (secs * sample_rate as f64) as usize];
        let mut t = 0.0;
        while t < secs {
            let start = (t * sample_rate as f64) as usize;
            for i in 0..512.min(samples.len().saturating_sub(start)) {
                let phase = i as f32;
                samples[start + i] = (phase * 0.71).sin() * (1.0 - phase / 512.0) * 0.9;
            }
            t += 0.5;
        }
        AudioBuffer::from_samples(samples, sample_rate)
    }

    fn silent_audio(secs: f64) -> AudioBuffer {
        AudioBuffer::from_samples(vec![0.0; (secs * 44100.0) as usize], 44100)
    }

    fn orchestrator_with(
        audio: AudioBuffer,
        separator: Option<Arc<dyn Separator>>,
        pitch: Option<Arc<dyn PitchEstimator>>,
    ) -> Orchestrator {
        let state = ProjectState::new("test", Path::new("/tmp/test.wav"), audio);
        Orchestrator::new(
            state,
            LabConfig::default(),
            Collaborators { separator, pitch },
        )
    }

    #[test]
    fn test_ensure_tempo_success() {
        let orch = orchestrator_with(click_audio(6.0), None, None);
        let result = orch.ensure(StageKind::Tempo, &ParameterSet::default());

        assert!(result.is_success());
        let grid = result.output().and_then(StageOutput::beat_grid).unwrap();
        assert!(grid.validate().is_ok());
        assert_eq!(orch.revision(), 1);
    }

    #[test]
    fn test_second_ensure_is_cache_hit() {
        let separator: Arc<dyn Separator> = Arc::new(CountingSeparator::new());
        let orch = orchestrator_with(click_audio(3.0), Some(separator), None);
        let params = ParameterSet::default();

        let first = orch.ensure(StageKind::Separation, &params);
        let second = orch.ensure(StageKind::Separation, &params);

        assert!(first.is_success());
        assert_eq!(first, second);
        assert_eq!(orch.revision(), 1);
        assert_eq!(orch.result(StageKind::Separation), first);
    }

    #[test]
    fn test_idempotence_counts_one_computation() {
        let separator = Arc::new(CountingSeparator::new());
        let handle: Arc<dyn Separator> = separator.clone();
        let orch = orchestrator_with(click_audio(3.0), Some(handle), None);
        let params = ParameterSet::default();

        orch.ensure(StageKind::Separation, &params);
        orch.ensure(StageKind::Separation, &params);

        assert_eq!(separator.count(), 1);
    }

    #[test]
    fn test_parameter_change_forces_recompute() {
        let separator = Arc::new(CountingSeparator::new());
        let handle: Arc<dyn Separator> = separator.clone();
        let orch = orchestrator_with(click_audio(3.0), Some(handle), None);

        let params = ParameterSet::default();
        let first = orch.ensure(StageKind::Separation, &params);

        let mut changed = params.clone();
        changed.separation.stem_count = 4;
        let second = orch.ensure(StageKind::Separation, &changed);

        assert_eq!(separator.count(), 2);
        assert_ne!(first.fingerprint(), second.fingerprint());
        assert_eq!(orch.revision(), 2);
    }

    #[test]
    fn test_identical_fingerprints_across_project_instances() {
        let params = ParameterSet::default();

        let orch_a = orchestrator_with(click_audio(3.0), None, None);
        let orch_b = orchestrator_with(click_audio(3.0), None, None);

        let a = orch_a.ensure(StageKind::Tempo, &params);
        let b = orch_b.ensure(StageKind::Tempo, &params);

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_melody_runs_through_dependency_chain() {
        let pitch = Arc::new(CountingEstimator::new());
        let handle: Arc<dyn PitchEstimator> = pitch.clone();
        let orch = orchestrator_with(click_audio(4.0), None, Some(handle));

        let result = orch.ensure(StageKind::Melody, &ParameterSet::default());

        assert!(result.is_success());
        assert!(pitch.count() > 0);
        // Tempo ran as a dependency
        assert!(orch.result(StageKind::Tempo).is_success());
    }

    #[test]
    fn test_upstream_failure_short_circuits_without_collaborator_calls() {
        let pitch = Arc::new(CountingEstimator::new());
        let handle: Arc<dyn PitchEstimator> = pitch.clone();
        let orch = orchestrator_with(silent_audio(3.0), None, Some(handle));

        let mut params = ParameterSet::default();
        params.melody.quantize = true;

        let result = orch.ensure(StageKind::Melody, &params);

        assert_eq!(
            result.failure(),
            Some(&FailureKind::UpstreamFailed(StageKind::Tempo))
        );
        assert_eq!(
            orch.result(StageKind::Tempo).failure(),
            Some(&FailureKind::InsufficientSignal)
        );
        // The pitch estimator was never invoked
        assert_eq!(pitch.count(), 0);
    }

    #[test]
    fn test_failed_dependency_is_not_retried_automatically() {
        let orch = orchestrator_with(silent_audio(3.0), None, None);
        let params = ParameterSet::default();

        orch.ensure(StageKind::Chords, &params);
        let revision_after_first = orch.revision();
        orch.ensure(StageKind::Chords, &params);

        // Tempo stays failed and nothing new was recorded: the repeated
        // short-circuit is identical to the stored result
        assert_eq!(orch.revision(), revision_after_first);
    }

    #[test]
    fn test_independent_stage_unaffected_by_sibling_failure() {
        let separator: Arc<dyn Separator> = Arc::new(CountingSeparator::new());
        let orch = orchestrator_with(silent_audio(3.0), Some(separator), None);
        let params = ParameterSet::default();

        let chords = orch.ensure(StageKind::Chords, &params);
        let separation = orch.ensure(StageKind::Separation, &params);

        assert!(chords.is_failed());
        assert!(separation.is_success());
    }

    #[test]
    fn test_missing_separator_surfaces_unavailable() {
        let orch = orchestrator_with(click_audio(3.0), None, None);
        let result = orch.ensure(StageKind::Separation, &ParameterSet::default());

        assert!(matches!(
            result.failure(),
            Some(FailureKind::ExternalDependencyUnavailable { .. })
        ));
    }

    #[test]
    fn test_timeout_then_retry_from_scratch() {
        let separator = Arc::new(CountingSeparator::slow(300, true));
        let handle: Arc<dyn Separator> = separator.clone();
        let orch = orchestrator_with(click_audio(3.0), Some(handle), None).with_timeouts(
            StageTimeouts {
                separation: Some(0.05),
                ..StageTimeouts::default()
            },
        );
        let params = ParameterSet::default();

        let first = orch.ensure(StageKind::Separation, &params);
        assert!(matches!(first.failure(), Some(FailureKind::Timeout { .. })));

        // Explicit re-ensure with the same fingerprint retries; the second
        // call is fast and succeeds
        let second = orch.ensure(StageKind::Separation, &params);
        assert!(second.is_success());
        assert_eq!(separator.count(), 2);
    }

    #[test]
    fn test_cancellation_discards_late_result() {
        let separator: Arc<dyn Separator> = Arc::new(CountingSeparator::slow(300, false));
        let orch = orchestrator_with(click_audio(3.0), Some(separator), None);
        let params = ParameterSet::default();

        let result = thread::scope(|scope| {
            let handle = scope.spawn(|| orch.ensure(StageKind::Separation, &params));
            thread::sleep(Duration::from_millis(50));
            orch.cancel(StageKind::Separation);
            handle.join().unwrap()
        });

        assert_eq!(result.failure(), Some(&FailureKind::Cancelled));
    }

    #[test]
    fn test_concurrent_requests_share_one_computation() {
        let separator = Arc::new(CountingSeparator::slow(150, false));
        let handle: Arc<dyn Separator> = separator.clone();
        let orch = orchestrator_with(click_audio(3.0), Some(handle), None);
        let params = ParameterSet::default();

        let (a, b) = thread::scope(|scope| {
            let first = scope.spawn(|| orch.ensure(StageKind::Separation, &params));
            let second = scope.spawn(|| orch.ensure(StageKind::Separation, &params));
            (first.join().unwrap(), second.join().unwrap())
        });

        assert!(a.is_success());
        assert_eq!(a, b);
        assert_eq!(separator.count(), 1, "computation ran more than once");
    }

    #[test]
    fn test_ensure_all_runs_independent_stages() {
        let separator: Arc<dyn Separator> = Arc::new(CountingSeparator::new());
        let orch = orchestrator_with(click_audio(4.0), Some(separator), None);
        let params = ParameterSet::default();

        let results = orch.ensure_all(&[StageKind::Tempo, StageKind::Separation], &params);

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(StageResult::is_success));
    }

    #[test]
    fn test_stem_source_requires_separation() {
        let separator: Arc<dyn Separator> = Arc::new(CountingSeparator::new());
        let orch = orchestrator_with(click_audio(4.0), Some(separator), None);

        let mut params = ParameterSet::default();
        params.drums.source = AnalysisSource::Stem;
        params.separation.stem_count = 4;

        let result = orch.ensure(StageKind::Drums, &params);

        assert!(result.is_success());
        // Separation ran as a declared dependency
        assert!(orch.result(StageKind::Separation).is_success());
    }

    #[test]
    fn test_stem_source_missing_stem_rejected() {
        let separator: Arc<dyn Separator> = Arc::new(CountingSeparator::new());
        let orch = orchestrator_with(click_audio(4.0), Some(separator), None);

        // 2-stem mode has no drums stem
        let mut params = ParameterSet::default();
        params.drums.source = AnalysisSource::Stem;
        params.separation.stem_count = 2;

        let result = orch.ensure(StageKind::Drums, &params);
        assert!(matches!(
            result.failure(),
            Some(FailureKind::InvalidRequest(_))
        ));
    }
}
