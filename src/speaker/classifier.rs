use crate::error::{DiaristError, Result};
use crate::job::{ChunkResult, ChunkWindow, SpeakerLabel};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the classifier knows about the conversation around a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationContext {
    pub chunk_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    /// Text of the preceding chunk, when it finished before this one started.
    pub previous_text: Option<String>,
    pub previous_speaker: Option<SpeakerLabel>,
}

impl ClassificationContext {
    pub fn new(window: &ChunkWindow, previous: Option<&ChunkResult>) -> Self {
        Self {
            chunk_index: window.index,
            start_time: window.start_time,
            end_time: window.end_time,
            previous_text: previous.map(|p| p.text.clone()),
            previous_speaker: previous.map(|p| p.speaker),
        }
    }
}

/// Trait for the external speaker-label collaborator.
///
/// Implementations may route between local and cloud models internally. The
/// caller enforces the timeout; a slow implementation is abandoned, not killed.
pub trait SpeakerClassifier: Send + Sync {
    fn classify(&self, text: &str, context: &ClassificationContext) -> Result<SpeakerLabel>;

    /// Name for logging.
    fn name(&self) -> &str {
        "classifier"
    }
}

impl<T: SpeakerClassifier> SpeakerClassifier for Arc<T> {
    fn classify(&self, text: &str, context: &ClassificationContext) -> Result<SpeakerLabel> {
        (**self).classify(text, context)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    Fixed(SpeakerLabel),
    /// PARTY_A on even chunk indices, PARTY_B on odd ones.
    Alternating,
    Fail,
}

/// Mock classifier for testing. Clones share the call counter.
#[derive(Debug, Clone)]
pub struct MockClassifier {
    behavior: MockBehavior,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockClassifier {
    pub fn fixed(label: SpeakerLabel) -> Self {
        Self {
            behavior: MockBehavior::Fixed(label),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn alternating() -> Self {
        Self {
            behavior: MockBehavior::Alternating,
            ..Self::fixed(SpeakerLabel::Unknown)
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: MockBehavior::Fail,
            ..Self::fixed(SpeakerLabel::Unknown)
        }
    }

    /// Sleep this long inside every call (to exercise timeouts).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpeakerClassifier for MockClassifier {
    fn classify(&self, _text: &str, context: &ClassificationContext) -> Result<SpeakerLabel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.behavior {
            MockBehavior::Fixed(label) => Ok(label),
            MockBehavior::Alternating if context.chunk_index % 2 == 0 => Ok(SpeakerLabel::PartyA),
            MockBehavior::Alternating => Ok(SpeakerLabel::PartyB),
            MockBehavior::Fail => Err(DiaristError::Classification {
                message: "mock classifier failure".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
