//! Human-readable transcript with a per-chunk appendix.

use super::format_timestamp;
use crate::job::JobResult;

pub(super) fn render(result: &JobResult) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Transcript: session {}\n\n", result.session_id));
    out.push_str(&format!("- Job: `{}`\n", result.job_id));
    out.push_str(&format!("- Attempt: {}\n", result.attempt));
    out.push_str(&format!(
        "- Duration: {}\n",
        format_timestamp(result.audio_duration, '.')
    ));
    out.push_str(&format!("- Completed: {}\n\n", result.completed_at.to_rfc3339()));

    out.push_str("## Conversation\n\n");
    for segment in &result.segments {
        if segment.text.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "**{}** [{} - {}]: {}\n\n",
            segment.speaker,
            format_timestamp(segment.start_time, '.'),
            format_timestamp(segment.end_time, '.'),
            escape(&segment.text)
        ));
    }

    out.push_str("## Chunks\n\n");
    out.push_str("| # | Start | End | Speaker | Confidence | RTF |\n");
    out.push_str("|---|-------|-----|---------|------------|-----|\n");
    for chunk in &result.chunks {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.2} | {:.2} |\n",
            chunk.chunk_index,
            format_timestamp(chunk.start_time, '.'),
            format_timestamp(chunk.end_time, '.'),
            chunk.speaker,
            chunk.confidence,
            chunk.real_time_factor
        ));
    }

    out
}

/// Keep transcript text from being read as markup.
fn escape(text: &str) -> String {
    text.chars()
        .fold(String::with_capacity(text.len()), |mut out, c| {
            if matches!(c, '*' | '_' | '`' | '|' | '[' | ']' | '#') {
                out.push('\\');
            }
            out.push(c);
            out
        })
}
