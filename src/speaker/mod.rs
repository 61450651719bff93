//! Speaker-classification collaborator boundary.

pub mod classifier;

pub use classifier::{ClassificationContext, MockClassifier, SpeakerClassifier};
