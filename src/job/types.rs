//! Core data model: jobs, chunk windows, chunk results and assembled results.

use crate::error::{DiaristError, Result};
use crate::job::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque, unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = DiaristError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DiaristError::validation(format!("invalid job id '{s}': {e}")))
    }
}

/// Reference to the external consultation a job belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheduling policy chosen per job at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// Bounded worker pool behind a single system-wide slot.
    Parallel,
    /// Sequential, gated on CPU idleness before every chunk.
    Background,
}

impl SchedulingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingMode::Parallel => "parallel",
            SchedulingMode::Background => "background",
        }
    }
}

impl FromStr for SchedulingMode {
    type Err = DiaristError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parallel" => Ok(SchedulingMode::Parallel),
            "background" => Ok(SchedulingMode::Background),
            other => Err(DiaristError::validation(format!(
                "unknown scheduling mode '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker attribution for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpeakerLabel {
    PartyA,
    PartyB,
    #[default]
    Unknown,
}

impl SpeakerLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerLabel::PartyA => "PARTY_A",
            SpeakerLabel::PartyB => "PARTY_B",
            SpeakerLabel::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SpeakerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned time window of source audio, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkWindow {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
}

impl ChunkWindow {
    pub fn new(index: usize, start_time: f64, end_time: f64) -> Self {
        Self {
            index,
            start_time,
            end_time,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

/// One processed window of audio. Immutable once appended to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub speaker: SpeakerLabel,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Processing time divided by audio duration.
    pub real_time_factor: f64,
    pub completed_at: DateTime<Utc>,
    /// SHA-256 over the chunk's canonical fields, when integrity hashes are on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl ChunkResult {
    pub fn window(&self) -> ChunkWindow {
        ChunkWindow::new(self.chunk_index, self.start_time, self.end_time)
    }

    /// Hex SHA-256 over index, window, text, speaker and confidence.
    pub fn compute_hash(&self) -> String {
        let canonical = format!(
            "{}|{:.3}|{:.3}|{}|{}|{:.4}",
            self.chunk_index,
            self.start_time,
            self.end_time,
            self.speaker,
            self.text,
            self.confidence
        );
        Sha256::digest(canonical.as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn with_hash(mut self) -> Self {
        self.content_hash = Some(self.compute_hash());
        self
    }

    /// False only when a hash is present and does not match the content.
    pub fn verify_hash(&self) -> bool {
        self.content_hash
            .as_ref()
            .is_none_or(|hash| *hash == self.compute_hash())
    }

    /// Same chunk content, ignoring completion time and observability fields.
    pub fn same_content(&self, other: &ChunkResult) -> bool {
        self.chunk_index == other.chunk_index
            && self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.text == other.text
            && self.speaker == other.speaker
            && self.confidence == other.confidence
    }
}

/// Consecutive same-speaker chunks merged into one span of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub speaker: SpeakerLabel,
    pub text: String,
    pub chunk_indices: Vec<usize>,
}

/// Final result of a completed attempt, cached on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub session_id: SessionId,
    pub attempt: u32,
    pub audio_duration: f64,
    pub completed_at: DateTime<Utc>,
    pub chunks: Vec<ChunkResult>,
    pub segments: Vec<TranscriptSegment>,
}

impl JobResult {
    /// Assemble from a job and its chunks (any order).
    pub fn assemble(job: &Job, mut chunks: Vec<ChunkResult>, completed_at: DateTime<Utc>) -> Self {
        chunks.sort_by_key(|c| c.chunk_index);
        let segments = crate::processor::merge::merge_segments(
            &chunks,
            crate::defaults::MERGE_GAP_SECS,
        );
        Self {
            job_id: job.id,
            session_id: job.session_id.clone(),
            attempt: job.attempt,
            audio_duration: job.audio_duration,
            completed_at,
            chunks,
            segments,
        }
    }
}

/// One diarization request and its current attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub session_id: SessionId,
    pub audio_ref: PathBuf,
    pub mode: SchedulingMode,
    pub status: JobStatus,
    /// Starts at 1, incremented by every restart.
    pub attempt: u32,
    pub audio_duration: f64,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Populated once COMPLETED; rebuilt from chunks, never persisted.
    #[serde(skip)]
    pub cached_result: Option<Arc<JobResult>>,
}

impl Job {
    pub fn new(
        session_id: SessionId,
        audio_ref: PathBuf,
        mode: SchedulingMode,
        audio_duration: f64,
        total_chunks: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            session_id,
            audio_ref,
            mode,
            status: JobStatus::Pending,
            attempt: 1,
            audio_duration,
            total_chunks,
            processed_chunks: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
            cached_result: None,
        }
    }

    /// `processed_chunks / total_chunks * 100`.
    pub fn progress_pct(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.processed_chunks as f64 / self.total_chunks as f64 * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Read model for polling clients: the job plus its current attempt's chunks
/// in `chunk_index` order.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job: Job,
    pub chunks: Vec<ChunkResult>,
}

/// Operational query over stored jobs. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub session_id: Option<SessionId>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.session_id
            .as_ref()
            .is_none_or(|session| *session == job.session_id)
            && self.status.is_none_or(|status| status == job.status)
    }

    /// Filter, sort newest first and truncate to the limit.
    pub fn apply(&self, jobs: impl IntoIterator<Item = Job>) -> Vec<Job> {
        let mut selected: Vec<Job> = jobs.into_iter().filter(|j| self.matches(j)).collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}
