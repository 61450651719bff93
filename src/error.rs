//! Error types for diarist.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiaristError {
    // Submission errors (rejected before a job exists)
    #[error("Invalid submission: {message}")]
    Validation { message: String },

    #[error("Transcription service unavailable: {message}")]
    TranscriptionUnavailable { message: String },

    // Chunk processing errors
    #[error("Audio extraction failed: {message}")]
    Extraction { message: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Chunk {chunk_index} failed after {attempts} attempt(s): {message}")]
    ChunkProcessing {
        chunk_index: usize,
        attempts: u32,
        message: String,
    },

    // Speaker classification errors (always degraded to UNKNOWN)
    #[error("Speaker classification timed out after {timeout_ms}ms")]
    ClassificationTimeout { timeout_ms: u64 },

    #[error("Speaker classification failed: {message}")]
    Classification { message: String },

    // Job state errors
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Invalid state for {operation}: {message}")]
    InvalidState { operation: String, message: String },

    #[error("Unsupported export format: {format}")]
    UnsupportedFormat { format: String },

    // Persistence errors
    #[error("Result store error: {message}")]
    Storage { message: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl DiaristError {
    /// Shorthand for an `InvalidState` error.
    pub fn invalid_state(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// True for errors that end a job (recorded in `Job::last_error`).
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(
            self,
            DiaristError::ChunkProcessing { .. } | DiaristError::Storage { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, DiaristError>;
