//! Job data model and lifecycle states.

pub mod status;
pub mod types;

pub use status::JobStatus;
pub use types::{
    ChunkResult, ChunkWindow, Job, JobFilter, JobId, JobResult, JobSnapshot, SchedulingMode,
    SessionId, SpeakerLabel, TranscriptSegment,
};
