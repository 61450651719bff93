//! In-process result store.

use super::{ResultStore, not_found};
use crate::error::{DiaristError, Result};
use crate::job::{ChunkResult, Job, JobFilter, JobId, JobSnapshot, JobStatus};
use crate::store::ledger::JobLedger;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Jobs held in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<JobLedger>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self, job_id: JobId) -> Result<Arc<Mutex<JobLedger>>> {
        let jobs = self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.get(&job_id).cloned().ok_or_else(|| not_found(job_id))
    }

    /// Run `f` with the job's ledger locked.
    fn with_ledger<T>(&self, job_id: JobId, f: impl FnOnce(&mut JobLedger) -> Result<T>) -> Result<T> {
        let ledger = self.ledger(job_id)?;
        let mut guard = ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl ResultStore for MemoryStore {
    fn create_job(&self, job: Job) -> Result<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if jobs.contains_key(&job.id) {
            return Err(DiaristError::invalid_state(
                "create_job",
                format!("job {} already exists", job.id),
            ));
        }
        jobs.insert(job.id, Arc::new(Mutex::new(JobLedger::new(job.clone()))));
        Ok(job)
    }

    fn append_chunk(&self, job_id: JobId, attempt: u32, chunk: ChunkResult) -> Result<Job> {
        self.with_ledger(job_id, |ledger| {
            if let Some(event) = ledger.prepare_append(attempt, chunk)? {
                ledger.apply(&event);
            }
            Ok(ledger.job().clone())
        })
    }

    fn transition(
        &self,
        job_id: JobId,
        attempt: u32,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job> {
        self.with_ledger(job_id, |ledger| {
            if let Some(event) = ledger.prepare_transition(attempt, status, error)? {
                ledger.apply(&event);
            }
            Ok(ledger.job().clone())
        })
    }

    fn reset_attempt(&self, job_id: JobId) -> Result<Job> {
        self.with_ledger(job_id, |ledger| {
            let event = ledger.prepare_restart()?;
            ledger.apply(&event);
            Ok(ledger.job().clone())
        })
    }

    fn get_job(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.with_ledger(job_id, |ledger| Ok(ledger.snapshot()))
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let ledgers: Vec<_> = {
            let jobs = self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.values().cloned().collect()
        };
        let jobs = ledgers.iter().map(|ledger| {
            ledger
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .job()
                .clone()
        });
        Ok(filter.apply(jobs))
    }
}
