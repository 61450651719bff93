//! Per-job ledger: the single place job state is mutated.
//!
//! Every mutation is split in two. `prepare_*` validates against the current
//! state and yields a [`LedgerEvent`]; `apply` performs it and cannot fail.
//! Durable stores persist the event between the two steps, and replay is
//! just `apply` over the log.

use crate::error::{DiaristError, Result};
use crate::job::{ChunkResult, Job, JobResult, JobSnapshot, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One recorded change to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Created {
        job: Job,
    },
    Chunk {
        attempt: u32,
        chunk: ChunkResult,
    },
    Transition {
        attempt: u32,
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },
    Restarted {
        attempt: u32,
        at: DateTime<Utc>,
    },
}

/// A job and the chunks of its current attempt.
#[derive(Debug, Clone)]
pub struct JobLedger {
    job: Job,
    chunks: BTreeMap<usize, ChunkResult>,
}

impl JobLedger {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            chunks: BTreeMap::new(),
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Consistent read: the job plus its chunks in index order.
    ///
    /// Completed jobs are served from the cached result.
    pub fn snapshot(&self) -> JobSnapshot {
        let chunks = match (&self.job.status, &self.job.cached_result) {
            (JobStatus::Completed, Some(cached)) => cached.chunks.clone(),
            _ => self.chunks.values().cloned().collect(),
        };
        JobSnapshot {
            job: self.job.clone(),
            chunks,
        }
    }

    fn check_attempt(&self, operation: &str, attempt: u32) -> Result<()> {
        if attempt != self.job.attempt {
            return Err(DiaristError::invalid_state(
                operation,
                format!(
                    "attempt {} is stale for job {} (current attempt {})",
                    attempt, self.job.id, self.job.attempt
                ),
            ));
        }
        Ok(())
    }

    /// Validate an append. `None` means an identical chunk is already stored.
    pub fn prepare_append(&self, attempt: u32, chunk: ChunkResult) -> Result<Option<LedgerEvent>> {
        self.check_attempt("append_chunk", attempt)?;

        if self.job.status != JobStatus::Processing {
            return Err(DiaristError::invalid_state(
                "append_chunk",
                format!("job {} is {}, not PROCESSING", self.job.id, self.job.status),
            ));
        }
        if chunk.chunk_index >= self.job.total_chunks {
            return Err(DiaristError::invalid_state(
                "append_chunk",
                format!(
                    "chunk index {} out of range for {} chunks",
                    chunk.chunk_index, self.job.total_chunks
                ),
            ));
        }
        if let Some(existing) = self.chunks.get(&chunk.chunk_index) {
            if existing.same_content(&chunk) {
                return Ok(None);
            }
            return Err(DiaristError::invalid_state(
                "append_chunk",
                format!(
                    "chunk {} already stored with different content",
                    chunk.chunk_index
                ),
            ));
        }

        Ok(Some(LedgerEvent::Chunk { attempt, chunk }))
    }

    /// Validate a status change. `None` means there is nothing to record.
    pub fn prepare_transition(
        &self,
        attempt: u32,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Option<LedgerEvent>> {
        self.check_attempt("transition", attempt)?;

        let current = self.job.status;
        if !current.can_transition_to(status) {
            return Err(DiaristError::invalid_state(
                "transition",
                format!("job {} cannot move from {} to {}", self.job.id, current, status),
            ));
        }
        if current == status && error.is_none() {
            return Ok(None);
        }
        if status == JobStatus::Completed && self.chunks.len() != self.job.total_chunks {
            return Err(DiaristError::invalid_state(
                "transition",
                format!(
                    "job {} has {} of {} chunks",
                    self.job.id,
                    self.chunks.len(),
                    self.job.total_chunks
                ),
            ));
        }

        Ok(Some(LedgerEvent::Transition {
            attempt,
            status,
            error,
            at: Utc::now(),
        }))
    }

    /// Validate a restart: only terminal jobs may start a new attempt.
    pub fn prepare_restart(&self) -> Result<LedgerEvent> {
        if !self.job.is_terminal() {
            return Err(DiaristError::invalid_state(
                "restart",
                format!(
                    "job {} is {}; only completed, failed or cancelled jobs can be restarted",
                    self.job.id, self.job.status
                ),
            ));
        }
        Ok(LedgerEvent::Restarted {
            attempt: self.job.attempt + 1,
            at: Utc::now(),
        })
    }

    /// Apply an event that was validated (or read back from a log).
    pub fn apply(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Created { job } => {
                self.job = job.clone();
                self.chunks.clear();
            }
            LedgerEvent::Chunk { attempt, chunk } => {
                if *attempt != self.job.attempt {
                    return;
                }
                self.chunks.insert(chunk.chunk_index, chunk.clone());
                self.job.processed_chunks = self.chunks.len().min(self.job.total_chunks);
                self.job.updated_at = chunk.completed_at;
            }
            LedgerEvent::Transition {
                attempt,
                status,
                error,
                at,
            } => {
                if *attempt != self.job.attempt {
                    return;
                }
                self.job.status = *status;
                if error.is_some() {
                    self.job.last_error = error.clone();
                }
                self.job.updated_at = *at;
                if *status == JobStatus::Completed {
                    let chunks = self.chunks.values().cloned().collect();
                    self.job.cached_result = Some(Arc::new(JobResult::assemble(&self.job, chunks, *at)));
                }
            }
            LedgerEvent::Restarted { attempt, at } => {
                self.job.attempt = *attempt;
                self.job.status = JobStatus::Pending;
                self.job.processed_chunks = 0;
                self.job.last_error = None;
                self.job.cached_result = None;
                self.job.updated_at = *at;
                self.chunks.clear();
            }
        }
    }
}
