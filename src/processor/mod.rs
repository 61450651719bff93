//! Chunk processing: the per-window pipeline and result smoothing.

pub mod chunk_processor;
pub mod merge;

pub use chunk_processor::{ChunkProcessor, ProcessorSettings};
pub use merge::merge_segments;
