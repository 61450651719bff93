//! diarist - Diarization job orchestration for long recordings
//!
//! Splits audio into windows, transcribes and labels each window with pluggable
//! collaborators, and tracks every job through a crash-safe result store.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod admission;
pub mod audio;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod export;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod planner;
pub mod processor;
pub mod scheduler;
pub mod speaker;
pub mod store;
pub mod stt;

// Collaborator boundaries
pub use audio::{AudioExtractor, WavExtractor};
pub use speaker::SpeakerClassifier;
pub use stt::Transcriber;

// Orchestration
pub use orchestrator::{HealthReport, JobOrchestrator};
pub use scheduler::SchedulingPolicy;
pub use store::ResultStore;

// Domain types
pub use export::ExportFormat;
pub use job::{
    ChunkResult, ChunkWindow, Job, JobFilter, JobId, JobResult, JobSnapshot, JobStatus,
    SchedulingMode, SessionId, SpeakerLabel, TranscriptSegment,
};

// Error handling
pub use error::{DiaristError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
