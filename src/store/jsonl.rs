//! Durable result store: one append-only JSON-lines ledger per job.
//!
//! Each line of `<dir>/<job_id>.jsonl` is a [`LedgerEvent`]. An event is
//! written and synced before it is applied in memory, so a reader never sees
//! state that would be lost on a crash. Opening the store replays every log;
//! a log that cannot be replayed is renamed to `<job_id>.jsonl.corrupt` and
//! skipped so the remaining jobs stay reachable.

use super::{ResultStore, not_found};
use crate::error::{DiaristError, Result};
use crate::job::{ChunkResult, Job, JobFilter, JobId, JobSnapshot, JobStatus};
use crate::store::ledger::{JobLedger, LedgerEvent};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

const LEDGER_EXTENSION: &str = "jsonl";
const QUARANTINE_SUFFIX: &str = "corrupt";

struct Entry {
    ledger: JobLedger,
    log: File,
    /// Bytes of the log holding complete, applied events.
    committed: u64,
    /// Set when a failed write could not be rolled back.
    poisoned: bool,
}

impl Entry {
    fn new(ledger: JobLedger, log: File, committed: u64) -> Self {
        Self {
            ledger,
            log,
            committed,
            poisoned: false,
        }
    }

    /// Persist then apply. A failed write is truncated away so the log
    /// never holds a partial line followed by a good one.
    fn record(&mut self, event: &LedgerEvent) -> Result<()> {
        let job_id = self.ledger.job().id;
        if self.poisoned {
            return Err(storage(format!(
                "ledger for job {job_id} is read-only after an unrecoverable write failure"
            )));
        }

        let on_disk = self.log.metadata()?.len();
        if on_disk != self.committed {
            tracing::warn!(
                job_id = %job_id,
                on_disk,
                committed = self.committed,
                "Ledger length drifted, rolling back to last committed event"
            );
            self.rollback()?;
        }

        match append_event(&mut self.log, event) {
            Ok(written) => {
                self.committed += written;
                self.ledger.apply(event);
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!(job_id = %job_id, error = %rollback, "Ledger rollback failed");
                }
                Err(e)
            }
        }
    }

    fn rollback(&mut self) -> Result<()> {
        let on_disk = match self.log.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.poisoned = true;
                return Err(e.into());
            }
        };
        if on_disk == self.committed {
            return Ok(());
        }
        let restored = on_disk > self.committed
            && self
                .log
                .set_len(self.committed)
                .and_then(|()| self.log.sync_data())
                .is_ok();
        if !restored {
            self.poisoned = true;
            return Err(storage(format!(
                "cannot restore ledger for job {} to {} bytes",
                self.ledger.job().id,
                self.committed
            )));
        }
        Ok(())
    }
}

/// File-backed store for single-writer deployments.
pub struct JsonlStore {
    dir: PathBuf,
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Entry>>>>,
}

impl JsonlStore {
    /// Open (creating if needed) the store directory and replay its ledgers.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| storage(format!("cannot create {}: {e}", dir.display())))?;

        let mut jobs = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LEDGER_EXTENSION) {
                continue;
            }
            let (ledger, committed) = match replay(&path) {
                Ok(Some(replayed)) => replayed,
                Ok(None) => {
                    tracing::warn!(path = %path.display(), "Skipping ledger with no created event");
                    continue;
                }
                Err(e) => {
                    quarantine(&path, &e);
                    continue;
                }
            };
            let log = OpenOptions::new().append(true).open(&path)?;
            let job_id = ledger.job().id;
            jobs.insert(job_id, Arc::new(Mutex::new(Entry::new(ledger, log, committed))));
        }

        tracing::info!(dir = %dir.display(), jobs = jobs.len(), "Result store opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            jobs: RwLock::new(jobs),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ledger_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.{LEDGER_EXTENSION}"))
    }

    fn with_entry<T>(&self, job_id: JobId, f: impl FnOnce(&mut Entry) -> Result<T>) -> Result<T> {
        let entry = {
            let jobs = self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.get(&job_id).cloned().ok_or_else(|| not_found(job_id))?
        };
        let mut guard = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl ResultStore for JsonlStore {
    fn create_job(&self, job: Job) -> Result<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if jobs.contains_key(&job.id) {
            return Err(DiaristError::invalid_state(
                "create_job",
                format!("job {} already exists", job.id),
            ));
        }

        let path = self.ledger_path(job.id);
        let mut log = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| storage(format!("cannot create {}: {e}", path.display())))?;
        let committed = match append_event(&mut log, &LedgerEvent::Created { job: job.clone() }) {
            Ok(written) => written,
            Err(e) => {
                drop(log);
                if let Err(remove) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %remove, "Failed to remove unwritten ledger");
                }
                return Err(e);
            }
        };

        jobs.insert(
            job.id,
            Arc::new(Mutex::new(Entry::new(JobLedger::new(job.clone()), log, committed))),
        );
        Ok(job)
    }

    fn append_chunk(&self, job_id: JobId, attempt: u32, chunk: ChunkResult) -> Result<Job> {
        self.with_entry(job_id, |entry| {
            if let Some(event) = entry.ledger.prepare_append(attempt, chunk)? {
                entry.record(&event)?;
            }
            Ok(entry.ledger.job().clone())
        })
    }

    fn transition(
        &self,
        job_id: JobId,
        attempt: u32,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job> {
        self.with_entry(job_id, |entry| {
            if let Some(event) = entry.ledger.prepare_transition(attempt, status, error)? {
                entry.record(&event)?;
            }
            Ok(entry.ledger.job().clone())
        })
    }

    fn reset_attempt(&self, job_id: JobId) -> Result<Job> {
        self.with_entry(job_id, |entry| {
            let event = entry.ledger.prepare_restart()?;
            entry.record(&event)?;
            Ok(entry.ledger.job().clone())
        })
    }

    fn get_job(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.with_entry(job_id, |entry| Ok(entry.ledger.snapshot()))
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let entries: Vec<_> = {
            let jobs = self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.values().cloned().collect()
        };
        let jobs = entries.iter().map(|entry| {
            entry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .ledger
                .job()
                .clone()
        });
        Ok(filter.apply(jobs))
    }
}

fn storage(message: String) -> DiaristError {
    DiaristError::Storage { message }
}

/// Write one event line and sync it. Returns the bytes written.
fn append_event(log: &mut File, event: &LedgerEvent) -> Result<u64> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    log.write_all(line.as_bytes())
        .and_then(|()| log.sync_data())
        .map_err(|e| storage(format!("failed to write ledger event: {e}")))?;
    Ok(line.len() as u64)
}

/// Move an unreadable ledger out of the way so it is not replayed again.
fn quarantine(path: &Path, error: &DiaristError) {
    let mut target = path.as_os_str().to_owned();
    target.push(".");
    target.push(QUARANTINE_SUFFIX);
    let target = PathBuf::from(target);

    match fs::rename(path, &target) {
        Ok(()) => tracing::error!(
            path = %path.display(),
            moved_to = %target.display(),
            error = %error,
            "Quarantined unreadable ledger"
        ),
        Err(rename) => tracing::error!(
            path = %path.display(),
            error = %error,
            rename_error = %rename,
            "Skipping unreadable ledger"
        ),
    }
}

/// Rebuild a ledger from its log.
///
/// A torn final line (crash mid-write) is dropped and truncated away. Any
/// other unreadable line, a missing `created` header, or a chunk whose
/// integrity hash does not match is an error. `None` means the job never
/// got past creation. On success also returns the length of the good prefix.
fn replay(path: &Path) -> Result<Option<(JobLedger, u64)>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut ledger: Option<JobLedger> = None;
    let mut good_len: u64 = 0;
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let complete = line.ends_with('\n');
        let event = match serde_json::from_str::<LedgerEvent>(line.trim_end()) {
            Ok(event) if complete => event,
            Err(e) if complete => {
                return Err(storage(format!(
                    "{}:{line_no}: unreadable ledger event: {e}",
                    path.display()
                )));
            }
            _ => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_no,
                    "Dropping torn ledger tail"
                );
                break;
            }
        };

        if let LedgerEvent::Chunk { chunk, .. } = &event
            && !chunk.verify_hash()
        {
            return Err(storage(format!(
                "{}:{line_no}: chunk {} fails its integrity hash",
                path.display(),
                chunk.chunk_index
            )));
        }

        match ledger.as_mut() {
            Some(existing) => existing.apply(&event),
            None => match event {
                LedgerEvent::Created { job } => ledger = Some(JobLedger::new(job)),
                _ => {
                    return Err(storage(format!(
                        "{}: ledger does not start with a created event",
                        path.display()
                    )));
                }
            },
        }
        good_len += read as u64;
    }

    let file_len = fs::metadata(path)?.len();
    if good_len < file_len {
        OpenOptions::new().write(true).open(path)?.set_len(good_len)?;
    }

    Ok(ledger.map(|ledger| (ledger, good_len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{SchedulingMode, SessionId, SpeakerLabel};
    use chrono::Utc;
    use tempfile::TempDir;

    fn new_job(total: usize) -> Job {
        Job::new(
            SessionId::new("consult-7"),
            PathBuf::from("/audio/consult-7.wav"),
            SchedulingMode::Background,
            total as f64 * 30.0,
            total,
        )
    }

    fn chunk(index: usize) -> ChunkResult {
        ChunkResult {
            chunk_index: index,
            start_time: index as f64 * 30.0,
            end_time: (index + 1) as f64 * 30.0,
            text: format!("chunk {index}"),
            speaker: SpeakerLabel::PartyA,
            confidence: 0.85,
            language: Some("en".to_string()),
            real_time_factor: 0.4,
            completed_at: Utc::now(),
            content_hash: None,
        }
        .with_hash()
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let job_id = {
            let store = JsonlStore::open(dir.path()).unwrap();
            let job = store.create_job(new_job(2)).unwrap();
            store.transition(job.id, 1, JobStatus::Processing, None).unwrap();
            store.append_chunk(job.id, 1, chunk(0)).unwrap();
            store.append_chunk(job.id, 1, chunk(1)).unwrap();
            store.transition(job.id, 1, JobStatus::Completed, None).unwrap();
            job.id
        };

        let reopened = JsonlStore::open(dir.path()).unwrap();
        let snap = reopened.get_job(job_id).unwrap();
        assert_eq!(snap.job.status, JobStatus::Completed);
        assert_eq!(snap.job.processed_chunks, 2);
        assert!(snap.job.cached_result.is_some());
        assert_eq!(snap.chunks.len(), 2);
        assert_eq!(snap.chunks[1].text, "chunk 1");
    }

    #[test]
    fn test_restart_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let job_id = {
            let store = JsonlStore::open(dir.path()).unwrap();
            let job = store.create_job(new_job(2)).unwrap();
            store.transition(job.id, 1, JobStatus::Processing, None).unwrap();
            store.append_chunk(job.id, 1, chunk(0)).unwrap();
            store
                .transition(job.id, 1, JobStatus::Failed, Some("boom".to_string()))
                .unwrap();
            store.reset_attempt(job.id).unwrap();
            job.id
        };

        let reopened = JsonlStore::open(dir.path()).unwrap();
        let snap = reopened.get_job(job_id).unwrap();
        assert_eq!(snap.job.attempt, 2);
        assert_eq!(snap.job.status, JobStatus::Pending);
        assert!(snap.job.last_error.is_none());
        assert!(snap.chunks.is_empty());
    }

    #[test]
    fn test_torn_tail_is_dropped_and_truncated() {
        let dir = TempDir::new().unwrap();
        let job_id = {
            let store = JsonlStore::open(dir.path()).unwrap();
            let job = store.create_job(new_job(3)).unwrap();
            store.transition(job.id, 1, JobStatus::Processing, None).unwrap();
            store.append_chunk(job.id, 1, chunk(0)).unwrap();
            job.id
        };

        let path = dir.path().join(format!("{job_id}.jsonl"));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"event\":\"chunk\",\"attempt\":1,\"chu").unwrap();
        drop(file);

        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.get_job(job_id).unwrap().chunks.len(), 1);

        // The log is clean again, so new events land on their own line.
        store.append_chunk(job_id, 1, chunk(1)).unwrap();
        drop(store);
        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.get_job(job_id).unwrap().job.processed_chunks, 2);
    }

    #[test]
    fn test_corrupt_ledger_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let (healthy, broken) = {
            let store = JsonlStore::open(dir.path()).unwrap();
            let healthy = store.create_job(new_job(1)).unwrap().id;
            let broken = store.create_job(new_job(1)).unwrap().id;
            (healthy, broken)
        };
        let path = dir.path().join(format!("{broken}.jsonl"));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);

        let store = JsonlStore::open(dir.path()).unwrap();
        assert!(store.get_job(healthy).is_ok());
        assert!(matches!(
            store.get_job(broken),
            Err(DiaristError::JobNotFound { .. })
        ));
        assert!(!path.exists());
        assert!(dir.path().join(format!("{broken}.jsonl.corrupt")).exists());

        // Quarantined files are not replayed again.
        drop(store);
        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.list_jobs(&JobFilter::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_tampered_chunk_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let job_id = {
            let store = JsonlStore::open(dir.path()).unwrap();
            let job = store.create_job(new_job(1)).unwrap();
            store.transition(job.id, 1, JobStatus::Processing, None).unwrap();
            store.append_chunk(job.id, 1, chunk(0)).unwrap();
            job.id
        };

        let path = dir.path().join(format!("{job_id}.jsonl"));
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.replace("chunk 0", "chunk zero")).unwrap();

        let store = JsonlStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get_job(job_id),
            Err(DiaristError::JobNotFound { .. })
        ));
        assert!(dir.path().join(format!("{job_id}.jsonl.corrupt")).exists());
    }

    #[test]
    fn test_partial_write_rolled_back_before_next_event() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        let healthy = store.create_job(new_job(1)).unwrap().id;
        let job = store.create_job(new_job(2)).unwrap();
        let path = dir.path().join(format!("{}.jsonl", job.id));
        let clean_len = fs::metadata(&path).unwrap().len();

        // What an interrupted write leaves behind.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"event\":\"transition\",\"att").unwrap();
        drop(file);

        store.transition(job.id, 1, JobStatus::Processing, None).unwrap();
        store.append_chunk(job.id, 1, chunk(0)).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("\"att{"));
        assert!(fs::metadata(&path).unwrap().len() > clean_len);
        drop(store);

        let reopened = JsonlStore::open(dir.path()).unwrap();
        assert!(reopened.get_job(healthy).is_ok());
        let snap = reopened.get_job(job.id).unwrap();
        assert_eq!(snap.job.status, JobStatus::Processing);
        assert_eq!(snap.chunks.len(), 1);
    }

    #[test]
    fn test_empty_ledger_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(format!("{}.jsonl", JobId::new())), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = JsonlStore::open(dir.path()).unwrap();
        assert!(store.list_jobs(&JobFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_rejected_append_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        let job = store.create_job(new_job(1)).unwrap();
        let path = dir.path().join(format!("{}.jsonl", job.id));
        let before = fs::metadata(&path).unwrap().len();

        assert!(store.append_chunk(job.id, 1, chunk(0)).is_err());
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
    }
}
