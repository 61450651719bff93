//! Audio-extraction collaborator boundary.

use crate::error::{DiaristError, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Raw audio for one window, normalized to mono PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub start_time: f64,
    pub end_time: f64,
}

impl AudioWindow {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

/// Reads windows of source audio. The source itself is not owned by diarist.
pub trait AudioExtractor: Send + Sync {
    /// Total duration of the recording in seconds. Fails if it is unreadable.
    fn probe_duration(&self, audio_ref: &Path) -> Result<f64>;

    /// Extract `[start_time, end_time)` from the recording.
    fn extract_window(&self, audio_ref: &Path, start_time: f64, end_time: f64)
    -> Result<AudioWindow>;
}

impl<T: AudioExtractor> AudioExtractor for Arc<T> {
    fn probe_duration(&self, audio_ref: &Path) -> Result<f64> {
        (**self).probe_duration(audio_ref)
    }

    fn extract_window(
        &self,
        audio_ref: &Path,
        start_time: f64,
        end_time: f64,
    ) -> Result<AudioWindow> {
        (**self).extract_window(audio_ref, start_time, end_time)
    }
}

/// Mock extractor for testing: every path is a silent recording of fixed length.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    duration: f64,
    sample_rate: u32,
    unreadable: bool,
    failures_left: Arc<AtomicU32>,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            // Low rate keeps long test recordings cheap.
            sample_rate: 100,
            unreadable: false,
            failures_left: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Probing and extraction both fail.
    pub fn unreadable() -> Self {
        Self {
            unreadable: true,
            ..Self::new(0.0)
        }
    }

    /// Fail the next `count` extractions, then succeed.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AudioExtractor for MockExtractor {
    fn probe_duration(&self, audio_ref: &Path) -> Result<f64> {
        if self.unreadable {
            return Err(DiaristError::Extraction {
                message: format!("cannot open {}", audio_ref.display()),
            });
        }
        Ok(self.duration)
    }

    fn extract_window(
        &self,
        audio_ref: &Path,
        start_time: f64,
        end_time: f64,
    ) -> Result<AudioWindow> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let transient = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if self.unreadable || transient {
            return Err(DiaristError::Extraction {
                message: format!("mock extraction failure for {}", audio_ref.display()),
            });
        }
        let count = ((end_time - start_time).max(0.0) * self.sample_rate as f64) as usize;
        Ok(AudioWindow {
            samples: vec![0; count],
            sample_rate: self.sample_rate,
            start_time,
            end_time,
        })
    }
}
