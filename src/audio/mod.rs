//! Audio access: the extraction boundary and a WAV implementation.

pub mod extractor;
pub mod wav;

pub use extractor::{AudioExtractor, AudioWindow, MockExtractor};
pub use wav::WavExtractor;
