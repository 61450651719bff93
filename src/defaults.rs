//! Default configuration constants for diarist.
//!
//! Shared by the config layer, the planner and the scheduling policies so the
//! documented defaults live in one place.

/// Sample rate every extracted window is normalized to, in Hz.
///
/// 16kHz mono is what speech-to-text backends expect.
pub const SAMPLE_RATE: u32 = 16000;

/// Default chunk length in seconds.
pub const CHUNK_SECS: f64 = 30.0;

/// Recommended chunk length range in seconds. Values outside it are accepted
/// but logged as a warning.
pub const RECOMMENDED_CHUNK_SECS: (f64, f64) = (15.0, 45.0);

/// Overlap between consecutive windows in background mode, in seconds.
///
/// A small overlap avoids clipping words that straddle a boundary; duplicated
/// boundary words are removed when segments are merged.
pub const BACKGROUND_OVERLAP_SECS: f64 = 0.8;

/// Overlap between consecutive windows in parallel mode, in seconds.
pub const PARALLEL_OVERLAP_SECS: f64 = 0.0;

/// Largest tolerated gap between consecutive windows when checking coverage.
pub const COVERAGE_EPSILON_SECS: f64 = 0.05;

/// Worker threads per parallel-mode job.
pub const WORKER_POOL_SIZE: usize = 2;

/// How long the background policy sleeps when admission is refused.
pub const IDLE_POLL_MS: u64 = 1000;

/// Minimum windowed CPU idle fraction (0.0 to 1.0) for background admission.
pub const CPU_IDLE_THRESHOLD: f32 = 0.5;

/// Rolling window over which CPU samples are averaged.
pub const SAMPLE_WINDOW_SECS: u64 = 10;

/// Timeout for one speaker-classification call.
pub const CLASSIFICATION_TIMEOUT_SECS: u64 = 60;

/// Classifier calls that may still be running, including ones abandoned
/// after a timeout. Beyond this, chunks are labelled UNKNOWN without a call.
pub const MAX_CLASSIFIER_THREADS: usize = 4;

/// Retries for extraction/transcription per chunk (on top of the first try).
pub const MAX_RETRIES: u32 = 2;

/// Base backoff between retries; doubles after every failed try.
pub const RETRY_BACKOFF_MS: u64 = 500;

/// Default tracing filter directive.
pub const LOG_FILTER: &str = "info,diarist=debug";

/// Adjacency tolerance when merging same-speaker chunks into segments.
///
/// Windows closer than this (or overlapping) count as temporally adjacent.
pub const MERGE_GAP_SECS: f64 = 0.5;
