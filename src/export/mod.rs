//! Export of completed jobs to client-facing formats.
//!
//! Every renderer works from the assembled [`JobResult`], so exporting the
//! same attempt twice yields identical bytes.

mod csv;
mod markdown;
mod subtitle;

use crate::error::{DiaristError, Result};
use crate::job::{JobResult, JobSnapshot, JobStatus};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Json,
    Markdown,
    SubtitleVtt,
    SubtitleSrt,
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::Json,
        ExportFormat::Markdown,
        ExportFormat::SubtitleVtt,
        ExportFormat::SubtitleSrt,
        ExportFormat::Csv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "markdown",
            ExportFormat::SubtitleVtt => "subtitle-vtt",
            ExportFormat::SubtitleSrt => "subtitle-srt",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::SubtitleVtt => "vtt",
            ExportFormat::SubtitleSrt => "srt",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::SubtitleVtt => "text/vtt; charset=utf-8",
            ExportFormat::SubtitleSrt => "application/x-subrip",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = DiaristError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "subtitle-vtt" | "vtt" => Ok(ExportFormat::SubtitleVtt),
            "subtitle-srt" | "srt" => Ok(ExportFormat::SubtitleSrt),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(DiaristError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a COMPLETED job. Any other status is `InvalidState`.
pub fn export(snapshot: &JobSnapshot, format: ExportFormat) -> Result<Vec<u8>> {
    let job = &snapshot.job;
    if job.status != JobStatus::Completed {
        return Err(DiaristError::invalid_state(
            "export",
            format!("job {} is {}, not COMPLETED", job.id, job.status),
        ));
    }

    let result = match &job.cached_result {
        Some(cached) => Arc::clone(cached),
        None => Arc::new(JobResult::assemble(
            job,
            snapshot.chunks.clone(),
            job.updated_at,
        )),
    };

    render(&result, format)
}

/// Render an assembled result.
pub fn render(result: &JobResult, format: ExportFormat) -> Result<Vec<u8>> {
    Ok(match format {
        ExportFormat::Json => serde_json::to_vec_pretty(result)?,
        ExportFormat::Markdown => markdown::render(result).into_bytes(),
        ExportFormat::SubtitleVtt => subtitle::render_vtt(result).into_bytes(),
        ExportFormat::SubtitleSrt => subtitle::render_srt(result).into_bytes(),
        ExportFormat::Csv => csv::render(result).into_bytes(),
    })
}

/// `HH:MM:SS` followed by `separator` and milliseconds.
pub(crate) fn format_timestamp(secs: f64, separator: char) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}{separator}{millis:03}")
}
