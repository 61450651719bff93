//! Result store: append-only chunk persistence and job state.
//!
//! All mutations of one job are serialized through that job's ledger lock,
//! so readers always see a consistent job/chunk pair.

pub mod jsonl;
pub mod ledger;
pub mod memory;

pub use jsonl::JsonlStore;
pub use ledger::{JobLedger, LedgerEvent};
pub use memory::MemoryStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{DiaristError, Result};
use crate::job::{ChunkResult, Job, JobFilter, JobId, JobSnapshot, JobStatus};
use std::sync::Arc;

/// Persistence boundary for jobs and their chunk results.
pub trait ResultStore: Send + Sync {
    /// Persist a new PENDING job.
    fn create_job(&self, job: Job) -> Result<Job>;

    /// Append one chunk of `attempt`. Rejected for stale attempts, jobs not
    /// PROCESSING, or a conflicting chunk at the same index. An identical
    /// re-append is a no-op.
    fn append_chunk(&self, job_id: JobId, attempt: u32, chunk: ChunkResult) -> Result<Job>;

    /// Move the job to `status`. COMPLETED requires every chunk.
    fn transition(
        &self,
        job_id: JobId,
        attempt: u32,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job>;

    /// Start a new attempt of a terminal job, discarding its chunks.
    fn reset_attempt(&self, job_id: JobId) -> Result<Job>;

    fn get_job(&self, job_id: JobId) -> Result<JobSnapshot>;

    /// Matching jobs, newest first.
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;
}

impl<T: ResultStore> ResultStore for Arc<T> {
    fn create_job(&self, job: Job) -> Result<Job> {
        (**self).create_job(job)
    }

    fn append_chunk(&self, job_id: JobId, attempt: u32, chunk: ChunkResult) -> Result<Job> {
        (**self).append_chunk(job_id, attempt, chunk)
    }

    fn transition(
        &self,
        job_id: JobId,
        attempt: u32,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job> {
        (**self).transition(job_id, attempt, status, error)
    }

    fn reset_attempt(&self, job_id: JobId) -> Result<Job> {
        (**self).reset_attempt(job_id)
    }

    fn get_job(&self, job_id: JobId) -> Result<JobSnapshot> {
        (**self).get_job(job_id)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        (**self).list_jobs(filter)
    }
}

/// Build the store selected by configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ResultStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Jsonl => {
            let dir = config.dir.as_ref().ok_or_else(|| DiaristError::ConfigInvalidValue {
                key: "store.dir".to_string(),
                message: "required for the jsonl backend".to_string(),
            })?;
            Ok(Arc::new(JsonlStore::open(dir)?))
        }
    }
}

fn not_found(job_id: JobId) -> DiaristError {
    DiaristError::JobNotFound {
        job_id: job_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_memory_store() {
        let store = open_store(&StoreConfig::default()).unwrap();
        assert!(store.list_jobs(&JobFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_open_jsonl_store_requires_dir() {
        let config = StoreConfig {
            backend: StoreBackend::Jsonl,
            dir: None,
            integrity_hashes: false,
        };
        assert!(matches!(
            open_store(&config),
            Err(DiaristError::ConfigInvalidValue { .. })
        ));

        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            dir: Some(dir.path().to_path_buf()),
            ..config
        };
        assert!(open_store(&config).is_ok());
    }
}
