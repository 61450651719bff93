//! Job orchestrator: the submission boundary and lifecycle owner.
//!
//! Every job attempt runs on its own named runner thread. The runner drives
//! the job's scheduling policy and records the terminal state; the
//! orchestrator only keeps the cancel flag and join handle while it runs.

use crate::admission::AdmissionController;
use crate::audio::AudioExtractor;
use crate::config::Config;
use crate::error::{DiaristError, Result};
use crate::export::{self, ExportFormat};
use crate::job::{ChunkWindow, Job, JobFilter, JobId, JobSnapshot, JobStatus, SchedulingMode, SessionId};
use crate::planner::{ChunkPlanner, verify_coverage};
use crate::processor::{ChunkProcessor, ProcessorSettings};
use crate::scheduler::{self, BackgroundPolicy, JobRun, ParallelPolicy, ParallelSlot, SchedulingPolicy};
use crate::speaker::SpeakerClassifier;
use crate::store::{self, ResultStore};
use crate::stt::Transcriber;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often `wait_for_terminal` re-reads the store.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// How often a parallel job waiting for the slot re-checks its cancel flag.
const SLOT_POLL: Duration = Duration::from_millis(50);

struct ActiveRun {
    attempt: u32,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

type RunRegistry = Arc<Mutex<HashMap<JobId, ActiveRun>>>;

/// Operational snapshot for health endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub transcription_ready: bool,
    pub transcription_model: String,
    pub active_runs: usize,
    pub parallel_slot_busy: bool,
    /// Windowed CPU idle fraction, once the admission controller has sampled.
    pub cpu_idle: Option<f32>,
    pub version: String,
}

/// Accepts diarization jobs and drives them to a terminal state.
pub struct JobOrchestrator {
    config: Config,
    store: Arc<dyn ResultStore>,
    extractor: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn Transcriber>,
    processor: Arc<ChunkProcessor>,
    admission: Arc<AdmissionController>,
    slot: Arc<ParallelSlot>,
    parallel: Arc<ParallelPolicy>,
    background: Arc<BackgroundPolicy>,
    runs: RunRegistry,
}

impl JobOrchestrator {
    /// Build an orchestrator from explicit collaborators.
    ///
    /// `classifier` may be `None`; chunks are then labelled UNKNOWN, as when
    /// classification is disabled in config.
    pub fn new(
        config: Config,
        store: Arc<dyn ResultStore>,
        extractor: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn Transcriber>,
        classifier: Option<Arc<dyn SpeakerClassifier>>,
        admission: Arc<AdmissionController>,
    ) -> Result<Self> {
        config.validate()?;

        let processor = Arc::new(ChunkProcessor::new(
            Arc::clone(&extractor),
            Arc::clone(&transcriber),
            classifier,
            ProcessorSettings::from_config(&config),
        ));
        let slot = Arc::new(ParallelSlot::new());
        let parallel = Arc::new(ParallelPolicy::new(
            Arc::clone(&slot),
            config.scheduling.worker_pool_size,
            SLOT_POLL,
        ));
        let background = Arc::new(BackgroundPolicy::new(
            Arc::clone(&admission),
            config.scheduling.idle_poll(),
        ));

        Ok(Self {
            config,
            store,
            extractor,
            transcriber,
            processor,
            admission,
            slot,
            parallel,
            background,
            runs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Build the configured store and a `sysinfo`-backed admission controller.
    pub fn from_config(
        config: Config,
        extractor: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn Transcriber>,
        classifier: Option<Arc<dyn SpeakerClassifier>>,
    ) -> Result<Self> {
        let store = store::open_store(&config.store)?;
        let admission = Arc::new(AdmissionController::system(&config.admission));
        Self::new(config, store, extractor, transcriber, classifier, admission)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Validate, plan and start a new job. Returns once the job is PENDING.
    pub fn submit(
        &self,
        session_id: SessionId,
        audio_ref: impl Into<PathBuf>,
        mode: SchedulingMode,
    ) -> Result<JobId> {
        let audio_ref = audio_ref.into();

        if session_id.as_str().trim().is_empty() {
            return Err(DiaristError::validation("session id is empty"));
        }
        self.ensure_transcriber_ready()?;

        let duration = self.extractor.probe_duration(&audio_ref).map_err(|e| {
            DiaristError::validation(format!("audio {} is unreadable: {e}", audio_ref.display()))
        })?;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(DiaristError::validation(format!(
                "audio {} has no duration",
                audio_ref.display()
            )));
        }

        let windows = self.plan(mode, duration)?;
        let job = self.store.create_job(Job::new(
            session_id,
            audio_ref,
            mode,
            duration,
            windows.len(),
        ))?;

        tracing::info!(
            job_id = %job.id,
            session_id = %job.session_id,
            mode = %mode,
            duration_secs = duration,
            chunks = windows.len(),
            "Job submitted"
        );

        self.spawn_run(&job, windows)?;
        Ok(job.id)
    }

    /// Latest persisted view of the job. Never blocks on processing.
    pub fn get_status(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.store.get_job(job_id)
    }

    /// Ask a running job to stop. The job becomes CANCELLED once its policy
    /// loop notices, at the latest after the chunk in flight.
    pub fn cancel(&self, job_id: JobId) -> Result<()> {
        let job = self.store.get_job(job_id)?.job;
        if job.is_terminal() {
            return Err(DiaristError::invalid_state(
                "cancel",
                format!("job {} is already {}", job_id, job.status),
            ));
        }

        let signalled = {
            let runs = lock_runs(&self.runs);
            match runs.get(&job_id) {
                Some(run) if run.attempt == job.attempt => {
                    run.cancel.store(true, Ordering::SeqCst);
                    true
                }
                _ => false,
            }
        };

        if signalled {
            tracing::info!(job_id = %job_id, attempt = job.attempt, "Cancellation requested");
        } else {
            // No runner (e.g. replayed from disk after a restart of the host).
            self.store
                .transition(job_id, job.attempt, JobStatus::Cancelled, None)?;
            tracing::info!(job_id = %job_id, attempt = job.attempt, "Orphaned job cancelled");
        }
        Ok(())
    }

    /// Start a fresh attempt of a COMPLETED, FAILED or CANCELLED job.
    pub fn restart(&self, job_id: JobId) -> Result<Job> {
        self.ensure_transcriber_ready()?;
        let job = self.store.reset_attempt(job_id)?;
        let windows = self.plan(job.mode, job.audio_duration)?;
        tracing::info!(job_id = %job_id, attempt = job.attempt, "Job restarted");
        self.spawn_run(&job, windows)?;
        Ok(job)
    }

    /// Render a COMPLETED job.
    pub fn export(&self, job_id: JobId, format: ExportFormat) -> Result<Vec<u8>> {
        let snapshot = self.store.get_job(job_id)?;
        export::export(&snapshot, format)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.store.list_jobs(filter)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            transcription_ready: self.transcriber.is_ready(),
            transcription_model: self.transcriber.model_name().to_string(),
            active_runs: lock_runs(&self.runs).len(),
            parallel_slot_busy: self.slot.is_busy(),
            cpu_idle: self.admission.windowed_idle(),
            version: crate::version_string(),
        }
    }

    /// Poll until the job is terminal or `timeout` passes, then return the
    /// latest snapshot either way.
    pub fn wait_for_terminal(&self, job_id: JobId, timeout: Duration) -> Result<JobSnapshot> {
        // Too far out to represent means no deadline.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let snapshot = self.store.get_job(job_id)?;
            let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
            if snapshot.job.is_terminal() || expired {
                return Ok(snapshot);
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Cancel every running job and wait for the runner threads to exit.
    pub fn shutdown(&self) {
        let handles: Vec<(JobId, JoinHandle<()>)> = {
            let mut runs = lock_runs(&self.runs);
            runs.iter_mut()
                .filter_map(|(job_id, run)| {
                    run.cancel.store(true, Ordering::SeqCst);
                    run.handle.take().map(|handle| (*job_id, handle))
                })
                .collect()
        };

        tracing::info!(runs = handles.len(), "Shutting down");
        for (job_id, handle) in handles {
            if handle.join().is_err() {
                tracing::error!(job_id = %job_id, "Runner thread panicked");
            }
        }
    }

    fn ensure_transcriber_ready(&self) -> Result<()> {
        if self.transcriber.is_ready() {
            return Ok(());
        }
        Err(DiaristError::TranscriptionUnavailable {
            message: format!("{} is not ready", self.transcriber.model_name()),
        })
    }

    fn plan(&self, mode: SchedulingMode, duration: f64) -> Result<Vec<ChunkWindow>> {
        let planner = ChunkPlanner::for_mode(&self.config.chunking, mode);
        let windows = planner.plan(duration)?;
        verify_coverage(
            &windows,
            duration,
            self.config.chunking.coverage_epsilon_secs,
            planner.overlap_secs(),
        )
        .map_err(|violation| DiaristError::Other(format!("chunk plan is invalid: {violation}")))?;
        Ok(windows)
    }

    fn policy_for(&self, mode: SchedulingMode) -> Arc<dyn SchedulingPolicy> {
        match mode {
            SchedulingMode::Parallel => Arc::clone(&self.parallel) as Arc<dyn SchedulingPolicy>,
            SchedulingMode::Background => Arc::clone(&self.background) as Arc<dyn SchedulingPolicy>,
        }
    }

    fn spawn_run(&self, job: &Job, windows: Vec<ChunkWindow>) -> Result<()> {
        let cancel = Arc::new(AtomicBool::new(false));
        let run = JobRun::new(
            job,
            windows,
            Arc::clone(&cancel),
            Arc::clone(&self.store),
            Arc::clone(&self.processor),
        );
        let policy = self.policy_for(job.mode);
        let runs = Arc::clone(&self.runs);
        let (job_id, attempt) = (job.id, job.attempt);

        // Held until the entry is inserted, so the runner cannot deregister first.
        let mut registry = lock_runs(&self.runs);

        let spawned = thread::Builder::new()
            .name(format!("diarist-job-{}", &job_id.to_string()[..8]))
            .spawn(move || {
                let span = tracing::info_span!(
                    "diarization_job",
                    job_id = %job_id,
                    attempt,
                    mode = policy.name()
                );
                let _entered = span.enter();

                if let Err(e) = scheduler::execute(policy.as_ref(), &run) {
                    tracing::error!(error = %e, "Failed to record job outcome");
                }

                let mut runs = lock_runs(&runs);
                if runs.get(&job_id).is_some_and(|active| active.attempt == attempt) {
                    runs.remove(&job_id);
                }
            });

        match spawned {
            Ok(handle) => {
                registry.insert(
                    job_id,
                    ActiveRun {
                        attempt,
                        cancel,
                        handle: Some(handle),
                    },
                );
                Ok(())
            }
            Err(e) => {
                drop(registry);
                let message = format!("failed to start runner thread: {e}");
                self.store
                    .transition(job_id, attempt, JobStatus::Failed, Some(message.clone()))?;
                Err(DiaristError::Other(message))
            }
        }
    }
}

fn lock_runs(runs: &RunRegistry) -> std::sync::MutexGuard<'_, HashMap<JobId, ActiveRun>> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::MockCpuSampler;
    use crate::audio::MockExtractor;
    use crate::speaker::MockClassifier;
    use crate::store::MemoryStore;
    use crate::stt::MockTranscriber;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.scheduling.idle_poll_ms = 5;
        config.retry.backoff_ms = 1;
        config
    }

    fn orchestrator(duration: f64, transcriber: MockTranscriber) -> JobOrchestrator {
        let config = fast_config();
        let admission = AdmissionController::new(&config.admission, Box::new(MockCpuSampler::new(1.0)))
            .with_min_sample_interval(Duration::ZERO);
        JobOrchestrator::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MockExtractor::new(duration)),
            Arc::new(transcriber),
            Some(Arc::new(MockClassifier::alternating())),
            Arc::new(admission),
        )
        .unwrap()
    }

    #[test]
    fn test_submit_runs_to_completion() {
        let orch = orchestrator(95.0, MockTranscriber::new("m"));
        let job_id = orch
            .submit(SessionId::new("s-1"), "a.wav", SchedulingMode::Parallel)
            .unwrap();

        let snap = orch.wait_for_terminal(job_id, Duration::from_secs(5)).unwrap();
        assert_eq!(snap.job.status, JobStatus::Completed);
        assert_eq!(snap.job.total_chunks, 4);
        assert_eq!(snap.job.processed_chunks, 4);
        assert_eq!(snap.chunks.last().unwrap().end_time, 95.0);
    }

    #[test]
    fn test_submit_validation() {
        let orch = orchestrator(0.0, MockTranscriber::new("m"));
        assert!(matches!(
            orch.submit(SessionId::new(" "), "a.wav", SchedulingMode::Parallel),
            Err(DiaristError::Validation { .. })
        ));
        assert!(matches!(
            orch.submit(SessionId::new("s"), "a.wav", SchedulingMode::Parallel),
            Err(DiaristError::Validation { .. })
        ));
        assert!(orch.list_jobs(&JobFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_submit_refused_when_transcriber_unavailable() {
        let transcriber = MockTranscriber::new("m");
        transcriber.set_ready(false);
        let orch = orchestrator(60.0, transcriber);
        assert!(matches!(
            orch.submit(SessionId::new("s"), "a.wav", SchedulingMode::Background),
            Err(DiaristError::TranscriptionUnavailable { .. })
        ));
    }

    #[test]
    fn test_restart_refused_when_transcriber_unavailable() {
        let transcriber = MockTranscriber::new("m");
        let orch = orchestrator(60.0, transcriber.clone());
        let job_id = orch
            .submit(SessionId::new("s"), "a.wav", SchedulingMode::Parallel)
            .unwrap();
        let before = orch.wait_for_terminal(job_id, Duration::from_secs(5)).unwrap();
        assert_eq!(before.job.status, JobStatus::Completed);

        transcriber.set_ready(false);
        assert!(matches!(
            orch.restart(job_id),
            Err(DiaristError::TranscriptionUnavailable { .. })
        ));

        // The finished attempt is left untouched.
        let after = orch.get_status(job_id).unwrap();
        assert_eq!(after.job.status, JobStatus::Completed);
        assert_eq!(after.job.attempt, before.job.attempt);
        assert_eq!(after.chunks, before.chunks);

        transcriber.set_ready(true);
        let restarted = orch.restart(job_id).unwrap();
        assert_eq!(restarted.attempt, before.job.attempt + 1);
    }

    #[test]
    fn test_wait_without_representable_deadline() {
        let orch = orchestrator(30.0, MockTranscriber::new("m"));
        let job_id = orch
            .submit(SessionId::new("s"), "a.wav", SchedulingMode::Parallel)
            .unwrap();

        let snap = orch.wait_for_terminal(job_id, Duration::MAX).unwrap();
        assert_eq!(snap.job.status, JobStatus::Completed);
        assert!(matches!(
            orch.wait_for_terminal(JobId::new(), Duration::MAX),
            Err(DiaristError::JobNotFound { .. })
        ));
    }

    #[test]
    fn test_cancel_terminal_job_rejected() {
        let orch = orchestrator(30.0, MockTranscriber::new("m"));
        let job_id = orch
            .submit(SessionId::new("s"), "a.wav", SchedulingMode::Background)
            .unwrap();
        orch.wait_for_terminal(job_id, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            orch.cancel(job_id),
            Err(DiaristError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_cancel_orphaned_job() {
        let orch = orchestrator(30.0, MockTranscriber::new("m"));
        let job = orch
            .store()
            .create_job(Job::new(
                SessionId::new("s"),
                PathBuf::from("a.wav"),
                SchedulingMode::Background,
                30.0,
                1,
            ))
            .unwrap();

        orch.cancel(job.id).unwrap();
        assert_eq!(
            orch.get_status(job.id).unwrap().job.status,
            JobStatus::Cancelled
        );
    }

    #[test]
    fn test_unknown_job() {
        let orch = orchestrator(30.0, MockTranscriber::new("m"));
        assert!(matches!(
            orch.get_status(JobId::new()),
            Err(DiaristError::JobNotFound { .. })
        ));
        assert!(matches!(
            orch.cancel(JobId::new()),
            Err(DiaristError::JobNotFound { .. })
        ));
    }

    #[test]
    fn test_health_report() {
        let orch = orchestrator(30.0, MockTranscriber::new("whisper-mock"));
        let health = orch.health();
        assert!(health.transcription_ready);
        assert_eq!(health.transcription_model, "whisper-mock");
        assert_eq!(health.active_runs, 0);
        assert!(!health.parallel_slot_busy);
        assert!(health.version.starts_with(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_shutdown_cancels_running_jobs() {
        let orch = orchestrator(
            3000.0,
            MockTranscriber::new("m").with_delay(Duration::from_millis(10)),
        );
        let job_id = orch
            .submit(SessionId::new("s"), "a.wav", SchedulingMode::Background)
            .unwrap();
        thread::sleep(Duration::from_millis(30));

        orch.shutdown();

        let snap = orch.get_status(job_id).unwrap();
        assert_eq!(snap.job.status, JobStatus::Cancelled);
        assert_eq!(orch.health().active_runs, 0);
    }
}
