//! Chunk planning: cut an audio duration into ordered, overlapping windows.
//!
//! Windows start at `index * (chunk - overlap)` and are clamped to the audio
//! duration. A trailing sliver shorter than the coverage epsilon is folded into
//! the last window instead of becoming its own chunk.

use crate::config::ChunkingConfig;
use crate::error::{DiaristError, Result};
use crate::job::{ChunkWindow, SchedulingMode};
use std::fmt;

/// Plans chunk windows for one scheduling mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPlanner {
    chunk_secs: f64,
    overlap_secs: f64,
    min_tail_secs: f64,
}

impl ChunkPlanner {
    pub fn new(chunk_secs: f64, overlap_secs: f64) -> Self {
        Self {
            chunk_secs,
            overlap_secs,
            min_tail_secs: 0.0,
        }
    }

    /// Planner for `mode` using the configured chunk length and that mode's overlap.
    pub fn for_mode(config: &ChunkingConfig, mode: SchedulingMode) -> Self {
        Self::new(config.chunk_secs, config.overlap_for(mode))
            .with_min_tail(config.coverage_epsilon_secs)
    }

    pub fn with_min_tail(mut self, min_tail_secs: f64) -> Self {
        self.min_tail_secs = min_tail_secs.max(0.0);
        self
    }

    pub fn overlap_secs(&self) -> f64 {
        self.overlap_secs
    }

    /// Computes the ordered windows covering `[0, duration)`.
    pub fn plan(&self, duration: f64) -> Result<Vec<ChunkWindow>> {
        if !(duration.is_finite() && duration > 0.0) {
            return Err(DiaristError::validation(format!(
                "audio duration must be positive, got {duration}"
            )));
        }
        let step = self.chunk_secs - self.overlap_secs;
        if !(self.chunk_secs > 0.0 && step > 0.0) {
            return Err(DiaristError::validation(format!(
                "chunk length {}s must exceed overlap {}s",
                self.chunk_secs, self.overlap_secs
            )));
        }

        let mut windows = Vec::new();
        let mut index = 0usize;
        loop {
            let start = index as f64 * step;
            let mut end = (start + self.chunk_secs).min(duration);
            if duration - end <= self.min_tail_secs {
                end = duration;
            }
            windows.push(ChunkWindow::new(index, start, end));
            if end >= duration {
                break;
            }
            index += 1;
        }
        Ok(windows)
    }
}

/// Why a chunk sequence fails to cover the audio.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageViolation {
    Empty,
    StartsLate { start: f64 },
    Gap { after_index: usize, gap: f64 },
    Overlap { after_index: usize, overlap: f64 },
    EndsEarly { end: f64 },
}

impl fmt::Display for CoverageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageViolation::Empty => write!(f, "no chunks"),
            CoverageViolation::StartsLate { start } => write!(f, "first chunk starts at {start}s"),
            CoverageViolation::Gap { after_index, gap } => {
                write!(f, "gap of {gap:.3}s after chunk {after_index}")
            }
            CoverageViolation::Overlap {
                after_index,
                overlap,
            } => write!(f, "overlap of {overlap:.3}s after chunk {after_index}"),
            CoverageViolation::EndsEarly { end } => write!(f, "last chunk ends at {end}s"),
        }
    }
}

/// Checks that `windows` (in index order) cover `[0, duration)` with no gap
/// above `epsilon` and no overlap above `max_overlap`.
pub fn verify_coverage(
    windows: &[ChunkWindow],
    duration: f64,
    epsilon: f64,
    max_overlap: f64,
) -> std::result::Result<(), CoverageViolation> {
    const FLOAT_SLACK: f64 = 1e-9;

    let (Some(first), Some(last)) = (windows.first(), windows.last()) else {
        return Err(CoverageViolation::Empty);
    };
    if first.start_time > epsilon {
        return Err(CoverageViolation::StartsLate {
            start: first.start_time,
        });
    }
    for pair in windows.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let delta = next.start_time - prev.end_time;
        if delta > epsilon + FLOAT_SLACK {
            return Err(CoverageViolation::Gap {
                after_index: prev.index,
                gap: delta,
            });
        }
        if -delta > max_overlap + FLOAT_SLACK {
            return Err(CoverageViolation::Overlap {
                after_index: prev.index,
                overlap: -delta,
            });
        }
    }
    if duration - last.end_time > epsilon + FLOAT_SLACK {
        return Err(CoverageViolation::EndsEarly { end: last.end_time });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split_without_overlap() {
        let windows = ChunkPlanner::new(30.0, 0.0).plan(600.0).unwrap();
        assert_eq!(windows.len(), 20);
        assert_eq!(windows[0], ChunkWindow::new(0, 0.0, 30.0));
        assert_eq!(windows[19], ChunkWindow::new(19, 570.0, 600.0));
        assert!(verify_coverage(&windows, 600.0, 0.0, 0.0).is_ok());
    }

    #[test]
    fn test_last_window_is_clamped() {
        let windows = ChunkPlanner::new(30.0, 0.0).plan(95.0).unwrap();
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[3], ChunkWindow::new(3, 90.0, 95.0));
    }

    #[test]
    fn test_short_audio_single_window() {
        let windows = ChunkPlanner::new(30.0, 0.8).plan(12.5).unwrap();
        assert_eq!(windows, vec![ChunkWindow::new(0, 0.0, 12.5)]);
    }

    #[test]
    fn test_overlap_windows_step_back() {
        let windows = ChunkPlanner::new(30.0, 0.8).plan(100.0).unwrap();
        assert!((windows[1].start_time - 29.2).abs() < 1e-9);
        assert!((windows[2].start_time - 58.4).abs() < 1e-9);
        assert_eq!(windows.last().unwrap().end_time, 100.0);
        assert!(verify_coverage(&windows, 100.0, 0.0, 0.8).is_ok());
        assert!(matches!(
            verify_coverage(&windows, 100.0, 0.0, 0.5),
            Err(CoverageViolation::Overlap { .. })
        ));
    }

    #[test]
    fn test_tail_sliver_folded_into_last_window() {
        let windows = ChunkPlanner::new(30.0, 0.0)
            .with_min_tail(0.05)
            .plan(60.01)
            .unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].end_time, 60.01);
    }

    #[test]
    fn test_rejects_zero_duration() {
        let planner = ChunkPlanner::new(30.0, 0.0);
        assert!(matches!(
            planner.plan(0.0),
            Err(DiaristError::Validation { .. })
        ));
        assert!(planner.plan(f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_overlap_not_shorter_than_chunk() {
        assert!(ChunkPlanner::new(1.0, 1.0).plan(10.0).is_err());
    }

    #[test]
    fn test_for_mode_uses_mode_overlap() {
        let config = ChunkingConfig::default();
        assert_eq!(
            ChunkPlanner::for_mode(&config, SchedulingMode::Background).overlap_secs(),
            0.8
        );
        assert_eq!(
            ChunkPlanner::for_mode(&config, SchedulingMode::Parallel).overlap_secs(),
            0.0
        );
    }

    #[test]
    fn test_verify_coverage_detects_gaps_and_short_ends() {
        let windows = vec![ChunkWindow::new(0, 0.0, 10.0), ChunkWindow::new(1, 10.5, 20.0)];
        assert_eq!(
            verify_coverage(&windows, 20.0, 0.1, 0.0),
            Err(CoverageViolation::Gap {
                after_index: 0,
                gap: 0.5
            })
        );
        assert!(verify_coverage(&windows, 20.0, 0.5, 0.0).is_ok());

        let short = vec![ChunkWindow::new(0, 0.0, 10.0)];
        assert!(matches!(
            verify_coverage(&short, 20.0, 0.1, 0.0),
            Err(CoverageViolation::EndsEarly { .. })
        ));
        assert_eq!(
            verify_coverage(&[], 20.0, 0.1, 0.0),
            Err(CoverageViolation::Empty)
        );
    }
}
