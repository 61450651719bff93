use crate::defaults;
use crate::error::{DiaristError, Result};
use crate::job::SchedulingMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub scheduling: SchedulingConfig,
    pub admission: AdmissionConfig,
    pub classification: ClassificationConfig,
    pub retry: RetryConfig,
    pub transcription: TranscriptionConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// How audio is cut into windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_secs: f64,
    pub background_overlap_secs: f64,
    pub parallel_overlap_secs: f64,
    pub coverage_epsilon_secs: f64,
}

/// Worker pool and idle polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulingConfig {
    pub worker_pool_size: usize,
    pub idle_poll_ms: u64,
}

/// CPU-idle gate used by the background policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    pub cpu_idle_threshold: f32,
    pub sample_window_secs: u64,
}

/// Speaker classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassificationConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

/// Per-chunk retry budget for extraction and transcription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

/// Hints passed through to the transcription collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub language_hint: Option<String>,
}

/// Result store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub dir: Option<PathBuf>,
    pub integrity_hashes: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Jsonl,
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_secs: defaults::CHUNK_SECS,
            background_overlap_secs: defaults::BACKGROUND_OVERLAP_SECS,
            parallel_overlap_secs: defaults::PARALLEL_OVERLAP_SECS,
            coverage_epsilon_secs: defaults::COVERAGE_EPSILON_SECS,
        }
    }
}

impl ChunkingConfig {
    /// Window overlap for the given scheduling mode.
    pub fn overlap_for(&self, mode: SchedulingMode) -> f64 {
        match mode {
            SchedulingMode::Parallel => self.parallel_overlap_secs,
            SchedulingMode::Background => self.background_overlap_secs,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: defaults::WORKER_POOL_SIZE,
            idle_poll_ms: defaults::IDLE_POLL_MS,
        }
    }
}

impl SchedulingConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cpu_idle_threshold: defaults::CPU_IDLE_THRESHOLD,
            sample_window_secs: defaults::SAMPLE_WINDOW_SECS,
        }
    }
}

impl AdmissionConfig {
    pub fn sample_window(&self) -> Duration {
        Duration::from_secs(self.sample_window_secs)
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: defaults::CLASSIFICATION_TIMEOUT_SECS,
        }
    }
}

impl ClassificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            backoff_ms: defaults::RETRY_BACKOFF_MS,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (1-based): base, 2×base, 4×base, ...
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: defaults::LOG_FILTER.to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DIARIST_CHUNK_SECS → chunking.chunk_secs
    /// - DIARIST_WORKERS → scheduling.worker_pool_size
    /// - DIARIST_CLASSIFICATION → classification.enabled ("0"/"false"/"off" disable)
    /// - DIARIST_STORE_DIR → store.dir (and selects the jsonl backend)
    ///
    /// Unparsable numeric values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secs) = std::env::var("DIARIST_CHUNK_SECS")
            && let Ok(secs) = secs.trim().parse::<f64>()
        {
            self.chunking.chunk_secs = secs;
        }

        if let Ok(workers) = std::env::var("DIARIST_WORKERS")
            && let Ok(workers) = workers.trim().parse::<usize>()
        {
            self.scheduling.worker_pool_size = workers;
        }

        if let Ok(flag) = std::env::var("DIARIST_CLASSIFICATION")
            && !flag.is_empty()
        {
            self.classification.enabled =
                !matches!(flag.to_lowercase().as_str(), "0" | "false" | "off" | "no");
        }

        if let Ok(dir) = std::env::var("DIARIST_STORE_DIR")
            && !dir.is_empty()
        {
            self.store.backend = StoreBackend::Jsonl;
            self.store.dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Check hard limits. Soft recommendations are only logged.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if !(c.chunk_secs.is_finite() && c.chunk_secs > 0.0) {
            return Err(invalid("chunking.chunk_secs", "must be a positive number"));
        }
        for (key, overlap) in [
            ("chunking.background_overlap_secs", c.background_overlap_secs),
            ("chunking.parallel_overlap_secs", c.parallel_overlap_secs),
        ] {
            if !(overlap.is_finite() && overlap >= 0.0 && overlap < c.chunk_secs) {
                return Err(invalid(key, "must be >= 0 and shorter than a chunk"));
            }
        }
        let epsilon = c.coverage_epsilon_secs;
        if !(epsilon.is_finite() && epsilon >= 0.0 && epsilon < c.chunk_secs) {
            return Err(invalid(
                "chunking.coverage_epsilon_secs",
                "must be >= 0 and shorter than a chunk",
            ));
        }
        if self.scheduling.worker_pool_size == 0 {
            return Err(invalid("scheduling.worker_pool_size", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.admission.cpu_idle_threshold) {
            return Err(invalid(
                "admission.cpu_idle_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.admission.sample_window_secs == 0 {
            return Err(invalid("admission.sample_window_secs", "must be at least 1"));
        }
        if self.store.backend == StoreBackend::Jsonl && self.store.dir.is_none() {
            return Err(invalid("store.dir", "required for the jsonl backend"));
        }

        let (low, high) = defaults::RECOMMENDED_CHUNK_SECS;
        if c.chunk_secs < low || c.chunk_secs > high {
            tracing::warn!(
                chunk_secs = c.chunk_secs,
                "chunk length outside the recommended {low}-{high}s range"
            );
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/diarist/config.toml on Linux, or a relative
    /// `diarist/config.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("diarist")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> DiaristError {
    DiaristError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
