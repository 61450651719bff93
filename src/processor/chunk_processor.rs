//! Per-chunk pipeline: extract → transcribe → classify → build result.

use crate::audio::AudioExtractor;
use crate::config::{Config, RetryConfig};
use crate::error::{DiaristError, Result};
use crate::job::{ChunkResult, ChunkWindow, SpeakerLabel};
use crate::speaker::{ClassificationContext, SpeakerClassifier};
use crate::stt::{Transcriber, TranscriptionResult};
use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Knobs the processor needs, lifted out of [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub retry: RetryConfig,
    pub classification_enabled: bool,
    pub classification_timeout: Duration,
    pub language_hint: Option<String>,
    pub integrity_hashes: bool,
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.clone(),
            classification_enabled: config.classification.enabled,
            classification_timeout: config.classification.timeout(),
            language_hint: config.transcription.language_hint.clone(),
            integrity_hashes: config.store.integrity_hashes,
        }
    }

    pub fn with_classification_timeout(mut self, timeout: Duration) -> Self {
        self.classification_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.retry = RetryConfig {
            max_retries,
            backoff_ms,
        };
        self
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Turns one planned window into a [`ChunkResult`].
///
/// Holds no per-job state, so a single instance is shared by every job and
/// every worker thread.
pub struct ChunkProcessor {
    extractor: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn Transcriber>,
    classifier: Option<Arc<dyn SpeakerClassifier>>,
    settings: ProcessorSettings,
    classifiers_in_flight: Arc<AtomicUsize>,
}

impl ChunkProcessor {
    pub fn new(
        extractor: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn Transcriber>,
        classifier: Option<Arc<dyn SpeakerClassifier>>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            extractor,
            transcriber,
            classifier,
            settings,
            classifiers_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Classifier threads still running, abandoned ones included.
    pub fn classifications_in_flight(&self) -> usize {
        self.classifiers_in_flight.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn transcriber(&self) -> &Arc<dyn Transcriber> {
        &self.transcriber
    }

    /// Process one window of `audio_ref`.
    ///
    /// `previous` is the preceding chunk when the caller already has it and
    /// is only used as classification context.
    ///
    /// Extraction and transcription are retried with exponential backoff.
    /// Exhausting the budget returns [`DiaristError::ChunkProcessing`].
    /// Classification never fails the chunk.
    pub fn process(
        &self,
        audio_ref: &Path,
        window: &ChunkWindow,
        previous: Option<&ChunkResult>,
    ) -> Result<ChunkResult> {
        let started = Instant::now();

        let transcription = self.transcribe_with_retry(audio_ref, window)?;
        let speaker = self.classify(&transcription.text, window, previous);

        let elapsed = started.elapsed().as_secs_f64();
        let real_time_factor = if window.duration() > 0.0 {
            elapsed / window.duration()
        } else {
            0.0
        };

        tracing::debug!(
            chunk_index = window.index,
            speaker = %speaker,
            confidence = transcription.confidence,
            rtf = real_time_factor,
            "Chunk processed"
        );

        let result = ChunkResult {
            chunk_index: window.index,
            start_time: window.start_time,
            end_time: window.end_time,
            text: transcription.text.trim().to_string(),
            speaker,
            confidence: transcription.confidence.clamp(0.0, 1.0),
            language: transcription.language,
            real_time_factor,
            completed_at: Utc::now(),
            content_hash: None,
        };

        Ok(if self.settings.integrity_hashes {
            result.with_hash()
        } else {
            result
        })
    }

    fn transcribe_with_retry(
        &self,
        audio_ref: &Path,
        window: &ChunkWindow,
    ) -> Result<TranscriptionResult> {
        let attempts = self.settings.retry.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.settings.retry.backoff_for(attempt - 1);
                tracing::debug!(
                    chunk_index = window.index,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying chunk"
                );
                thread::sleep(backoff);
            }

            match self.transcribe_once(audio_ref, window) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!(
                        chunk_index = window.index,
                        attempt,
                        error = %e,
                        "Chunk attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(DiaristError::ChunkProcessing {
            chunk_index: window.index,
            attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }

    fn transcribe_once(&self, audio_ref: &Path, window: &ChunkWindow) -> Result<TranscriptionResult> {
        let audio = self
            .extractor
            .extract_window(audio_ref, window.start_time, window.end_time)?;
        self.transcriber
            .transcribe(&audio.samples, self.settings.language_hint.as_deref())
    }

    /// Label the chunk, degrading to UNKNOWN on timeout or error.
    fn classify(
        &self,
        text: &str,
        window: &ChunkWindow,
        previous: Option<&ChunkResult>,
    ) -> SpeakerLabel {
        let Some(classifier) = self.classifier.as_ref() else {
            return SpeakerLabel::Unknown;
        };
        if !self.settings.classification_enabled {
            return SpeakerLabel::Unknown;
        }

        let Some(permit) = InFlight::acquire(
            &self.classifiers_in_flight,
            crate::defaults::MAX_CLASSIFIER_THREADS,
        ) else {
            tracing::warn!(
                chunk_index = window.index,
                classifier = classifier.name(),
                limit = crate::defaults::MAX_CLASSIFIER_THREADS,
                "Too many classifier calls still running, labelling UNKNOWN"
            );
            return SpeakerLabel::Unknown;
        };

        let context = ClassificationContext::new(window, previous);
        match classify_with_timeout(
            Arc::clone(classifier),
            permit,
            text.to_string(),
            context,
            self.settings.classification_timeout,
        ) {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!(
                    chunk_index = window.index,
                    classifier = classifier.name(),
                    error = %e,
                    "Speaker classification degraded to UNKNOWN"
                );
                SpeakerLabel::Unknown
            }
        }
    }
}

/// One slot in the classifier thread budget, released on drop.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run the classifier on its own thread and stop waiting after `timeout`.
///
/// A timed-out call is abandoned: its thread finishes in the background and
/// its answer is dropped. The thread holds `permit` until it exits.
fn classify_with_timeout(
    classifier: Arc<dyn SpeakerClassifier>,
    permit: InFlight,
    text: String,
    context: ClassificationContext,
    timeout: Duration,
) -> Result<SpeakerLabel> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let chunk_index = context.chunk_index;

    thread::Builder::new()
        .name(format!("classify-{chunk_index}"))
        .spawn(move || {
            let _permit = permit;
            let label = classifier.classify(&text, &context);
            if tx.send(label).is_err() {
                tracing::debug!(chunk_index, "Classification finished after caller gave up");
            }
        })
        .map_err(|e| DiaristError::Classification {
            message: format!("failed to spawn classifier thread: {e}"),
        })?;

    match rx.recv_timeout(timeout) {
        Ok(label) => label,
        Err(RecvTimeoutError::Timeout) => Err(DiaristError::ClassificationTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(DiaristError::Classification {
            message: "classifier thread exited without an answer".to_string(),
        }),
    }
}
