//! Scheduling policies: how a job's chunks are driven through the processor.
//!
//! Both policies share [`JobRun`] for cancellation, the first-chunk status
//! change and appends, and both end through [`execute`], so they terminate
//! the same way.

pub mod background;
pub mod parallel;
pub mod slot;

pub use background::BackgroundPolicy;
pub use parallel::ParallelPolicy;
pub use slot::{ParallelSlot, SlotGuard};

use crate::error::{DiaristError, Result};
use crate::job::{ChunkResult, ChunkWindow, Job, JobId, JobStatus};
use crate::processor::ChunkProcessor;
use crate::store::ResultStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How a policy loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every window was processed and appended.
    Completed,
    /// The cancel flag was observed before all windows were appended.
    Cancelled,
    /// A fatal error; the message goes to `Job::last_error`.
    Failed(String),
}

impl RunOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            RunOutcome::Completed => JobStatus::Completed,
            RunOutcome::Cancelled => JobStatus::Cancelled,
            RunOutcome::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Everything one attempt of one job needs while it runs.
pub struct JobRun {
    pub job_id: JobId,
    pub attempt: u32,
    pub audio_ref: PathBuf,
    pub windows: Vec<ChunkWindow>,
    cancel: Arc<AtomicBool>,
    started: AtomicBool,
    store: Arc<dyn ResultStore>,
    processor: Arc<ChunkProcessor>,
}

impl JobRun {
    pub fn new(
        job: &Job,
        windows: Vec<ChunkWindow>,
        cancel: Arc<AtomicBool>,
        store: Arc<dyn ResultStore>,
        processor: Arc<ChunkProcessor>,
    ) -> Self {
        Self {
            job_id: job.id,
            attempt: job.attempt,
            audio_ref: job.audio_ref.clone(),
            windows,
            cancel,
            started: AtomicBool::new(false),
            store,
            processor,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    /// Move PENDING → PROCESSING when the first chunk is admitted.
    pub fn begin(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.store
            .transition(self.job_id, self.attempt, JobStatus::Processing, None)?;
        tracing::info!(job_id = %self.job_id, attempt = self.attempt, "Processing started");
        Ok(())
    }

    pub fn process(&self, window: &ChunkWindow, previous: Option<&ChunkResult>) -> Result<ChunkResult> {
        self.processor.process(&self.audio_ref, window, previous)
    }

    /// Append a finished chunk and report progress.
    pub fn record(&self, chunk: ChunkResult) -> Result<Job> {
        let index = chunk.chunk_index;
        let rtf = chunk.real_time_factor;
        let job = self.store.append_chunk(self.job_id, self.attempt, chunk)?;
        tracing::info!(
            job_id = %self.job_id,
            chunk_index = index,
            processed = job.processed_chunks,
            total = job.total_chunks,
            rtf,
            "Chunk appended"
        );
        Ok(job)
    }
}

/// Strategy for driving a job's windows through the processor.
pub trait SchedulingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process `run.windows` until done, cancelled or failed. Must not block
    /// past cancellation for longer than one chunk (plus any idle poll).
    fn run(&self, run: &JobRun) -> RunOutcome;
}

impl<T: SchedulingPolicy> SchedulingPolicy for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn run(&self, run: &JobRun) -> RunOutcome {
        (**self).run(run)
    }
}

/// Run `policy` to the end and record the terminal status.
///
/// A store rejection here means the attempt went stale (restarted) while it
/// was running; the newer attempt owns the job, so that is not an error.
pub fn execute(policy: &dyn SchedulingPolicy, run: &JobRun) -> Result<JobStatus> {
    let outcome = policy.run(run);
    let status = outcome.status();
    let error = match outcome {
        RunOutcome::Failed(message) => {
            tracing::error!(job_id = %run.job_id, attempt = run.attempt, error = %message, "Job failed");
            Some(message)
        }
        RunOutcome::Cancelled => {
            tracing::info!(job_id = %run.job_id, attempt = run.attempt, "Job cancelled");
            None
        }
        RunOutcome::Completed => {
            tracing::info!(job_id = %run.job_id, attempt = run.attempt, "Job completed");
            None
        }
    };

    match run.store.transition(run.job_id, run.attempt, status, error) {
        Ok(_) => Ok(status),
        Err(DiaristError::InvalidState { message, .. }) => {
            tracing::warn!(
                job_id = %run.job_id,
                attempt = run.attempt,
                reason = %message,
                "Terminal status not recorded"
            );
            Ok(status)
        }
        Err(e) => Err(e),
    }
}
