//! Speaker smoothing: merge consecutive same-speaker chunks into segments.
//!
//! Stored chunks are never modified. Segments are derived when a result is
//! assembled, so parallel jobs that append out of order still merge correctly.

use crate::job::{ChunkResult, TranscriptSegment};

/// Longest run of words looked for when de-duplicating an overlap boundary.
const MAX_BOUNDARY_WORDS: usize = 3;

/// Minimum word length to consider for de-duplication.
const MIN_WORD_LENGTH: usize = 2;

/// Merge chunks (sorted by `chunk_index`) into transcript segments.
///
/// Two neighbours merge when they share a speaker label and the gap between
/// them is at most `max_gap_secs`. Overlapping windows always count as
/// adjacent; words repeated across the overlap are dropped once.
pub fn merge_segments(chunks: &[ChunkResult], max_gap_secs: f64) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = Vec::new();

    for chunk in chunks {
        let text = chunk.text.trim();

        if let Some(last) = segments.last_mut()
            && last.speaker == chunk.speaker
            && chunk.start_time - last.end_time <= max_gap_secs
        {
            let overlapped = chunk.start_time < last.end_time;
            let addition = if overlapped {
                strip_repeated_prefix(&last.text, text)
            } else {
                text.to_string()
            };
            if !addition.is_empty() {
                if !last.text.is_empty() {
                    last.text.push(' ');
                }
                last.text.push_str(&addition);
            }
            last.end_time = last.end_time.max(chunk.end_time);
            last.chunk_indices.push(chunk.chunk_index);
            continue;
        }

        segments.push(TranscriptSegment {
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            speaker: chunk.speaker,
            text: text.to_string(),
            chunk_indices: vec![chunk.chunk_index],
        });
    }

    segments
}

/// Drop the leading words of `next` that repeat the trailing words of `prev`.
fn strip_repeated_prefix(prev: &str, next: &str) -> String {
    let prev_words: Vec<&str> = prev.split_whitespace().collect();
    let next_words: Vec<&str> = next.split_whitespace().collect();

    let max = MAX_BOUNDARY_WORDS
        .min(prev_words.len())
        .min(next_words.len());
    let repeated = (1..=max)
        .rev()
        .find(|&n| {
            let tail = &prev_words[prev_words.len() - n..];
            let head = &next_words[..n];
            tail.iter().zip(head).all(|(a, b)| same_word(a, b))
                && head.iter().any(|w| normalize(w).len() >= MIN_WORD_LENGTH)
        })
        .unwrap_or(0);

    next_words[repeated..].join(" ")
}

fn same_word(a: &str, b: &str) -> bool {
    let a = normalize(a);
    !a.is_empty() && a == normalize(b)
}

fn normalize(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}
