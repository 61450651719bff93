use crate::error::{DiaristError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Output of one transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    /// Model-reported confidence (0.0 to 1.0).
    pub confidence: f32,
    /// Language the model detected, if it reports one.
    pub language: Option<String>,
}

impl TranscriptionResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Trait for the external speech-to-text collaborator.
///
/// This trait allows swapping implementations (local model, cloud API, mock).
pub trait Transcriber: Send + Sync {
    /// Transcribe audio samples to text.
    ///
    /// # Arguments
    /// * `audio` - Audio samples as 16-bit PCM at 16kHz mono
    /// * `language_hint` - Optional language code to bias detection
    fn transcribe(&self, audio: &[i16], language_hint: Option<&str>)
    -> Result<TranscriptionResult>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Health signal. New jobs are refused while this is false.
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing across jobs.
impl<T: Transcriber> Transcriber for Arc<T> {
    fn transcribe(
        &self,
        audio: &[i16],
        language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        (**self).transcribe(audio, language_hint)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing. Clones share counters and the ready flag.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    confidence: f32,
    language: Option<String>,
    should_fail: bool,
    fail_after: Option<usize>,
    delay: Duration,
    failures_left: Arc<AtomicU32>,
    ready: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            confidence: 0.9,
            language: Some("en".to_string()),
            should_fail: false,
            fail_after: None,
            delay: Duration::ZERO,
            failures_left: Arc::new(AtomicU32::new(0)),
            ready: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific response.
    ///
    /// `{n}` in the response is replaced by the 0-based call number.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Configure the mock to fail on every transcribe call
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Succeed for the first `calls` calls, then fail every call.
    pub fn with_failure_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Fail the next `count` calls, then succeed.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Flip the health signal.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of transcribe calls made so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(
        &self,
        _audio: &[i16],
        _language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let transient = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        let exhausted = self.fail_after.is_some_and(|limit| call >= limit);
        if self.should_fail || transient || exhausted {
            return Err(DiaristError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }

        Ok(TranscriptionResult {
            text: self.response.replace("{n}", &call.to_string()),
            confidence: self.confidence,
            language: self.language.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail && self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transcriber_returns_response() {
        let transcriber = MockTranscriber::new("test-model").with_response("Hello, this is a test");

        let result = transcriber.transcribe(&[0i16; 1000], None).unwrap();

        assert_eq!(result.text, "Hello, this is a test");
        assert_eq!(result.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_mock_transcriber_numbers_responses() {
        let transcriber = MockTranscriber::new("test-model").with_response("segment {n}");

        assert_eq!(transcriber.transcribe(&[], None).unwrap().text, "segment 0");
        assert_eq!(transcriber.transcribe(&[], None).unwrap().text, "segment 1");
        assert_eq!(transcriber.call_count(), 2);
    }

    #[test]
    fn test_mock_transcriber_returns_error_when_configured() {
        let transcriber = MockTranscriber::new("test-model").with_failure();

        match transcriber.transcribe(&[0i16; 1000], None) {
            Err(DiaristError::Transcription { message }) => {
                assert_eq!(message, "mock transcription failure");
            }
            other => panic!("Expected Transcription error, got {other:?}"),
        }
        assert!(!transcriber.is_ready());
    }

    #[test]
    fn test_transient_failures_then_success() {
        let transcriber = MockTranscriber::new("test-model").with_transient_failures(2);

        assert!(transcriber.transcribe(&[], None).is_err());
        assert!(transcriber.transcribe(&[], None).is_err());
        assert!(transcriber.transcribe(&[], None).is_ok());
        assert_eq!(transcriber.call_count(), 3);
    }

    #[test]
    fn test_ready_flag_is_shared_between_clones() {
        let transcriber = MockTranscriber::new("test-model");
        let handle = transcriber.clone();

        handle.set_ready(false);
        assert!(!transcriber.is_ready());
        handle.set_ready(true);
        assert!(transcriber.is_ready());
    }

    #[test]
    fn test_transcriber_trait_is_object_safe() {
        let transcriber: Arc<dyn Transcriber> =
            Arc::new(MockTranscriber::new("test-model").with_response("boxed test"));

        assert_eq!(transcriber.model_name(), "test-model");
        assert!(transcriber.is_ready());
        assert_eq!(
            transcriber.transcribe(&[0i16; 100], Some("en")).unwrap().text,
            "boxed test"
        );
    }
}
