//! WebVTT and SubRip output. Cues follow merged segment timing.
//!
//! Cue text is folded onto one line, so a transcript can never end a cue
//! early or fake a timing line.

use super::format_timestamp;
use crate::job::{JobResult, TranscriptSegment};

pub(super) fn render_vtt(result: &JobResult) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in cues(result) {
        out.push_str(&format!(
            "{} --> {}\n<v {}>{}\n\n",
            format_timestamp(segment.start_time, '.'),
            format_timestamp(segment.end_time, '.'),
            segment.speaker,
            escape_vtt(&single_line(&segment.text))
        ));
    }
    out
}

pub(super) fn render_srt(result: &JobResult) -> String {
    let mut out = String::new();
    for (number, segment) in cues(result).enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n[{}] {}\n\n",
            number + 1,
            format_timestamp(segment.start_time, ','),
            format_timestamp(segment.end_time, ','),
            segment.speaker,
            defuse_arrows(single_line(&segment.text))
        ));
    }
    out
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// WebVTT cue payloads treat `&`, `<` and `>` as markup.
fn escape_vtt(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// SubRip has no escaping; `-->` would read as a timing separator.
fn defuse_arrows(mut text: String) -> String {
    while text.contains("-->") {
        text = text.replace("-->", "->");
    }
    text
}

/// Segments with something to show.
fn cues(result: &JobResult) -> impl Iterator<Item = &TranscriptSegment> {
    result
        .segments
        .iter()
        .filter(|segment| !segment.text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support;
    use crate::job::SpeakerLabel;

    #[test]
    fn test_vtt_uses_merged_segments() {
        let vtt = render_vtt(&test_support::result());
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains(
            "00:00:00.000 --> 00:01:00.000\n<v PARTY_A>Good morning, what brings you in? Take your time.\n"
        ));
        assert!(vtt.contains("00:01:00.000 --> 00:01:30.000\n<v PARTY_B>"));
    }

    #[test]
    fn test_srt_numbering_and_separator() {
        let srt = render_srt(&test_support::result());
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:01:00,000\n[PARTY_A] Good morning"));
        assert!(srt.contains("\n2\n00:01:00,000 --> 00:01:30,000\n[PARTY_B] I have"));
    }

    #[test]
    fn test_silent_segments_produce_no_cues() {
        let mut result = test_support::result();
        result.segments = vec![TranscriptSegment {
            start_time: 0.0,
            end_time: 30.0,
            speaker: SpeakerLabel::Unknown,
            text: String::new(),
            chunk_indices: vec![0],
        }];
        assert_eq!(render_vtt(&result), "WEBVTT\n\n");
        assert!(render_srt(&result).is_empty());
    }

    fn hostile_result() -> JobResult {
        let mut result = test_support::result();
        result.segments = vec![
            TranscriptSegment {
                start_time: 0.0,
                end_time: 30.0,
                speaker: SpeakerLabel::PartyA,
                text: "first line\n\n00:09:00.000 --> 00:10:00.000\r\nfake <b>cue</b> & more".to_string(),
                chunk_indices: vec![0],
            },
            TranscriptSegment {
                start_time: 30.0,
                end_time: 60.0,
                speaker: SpeakerLabel::PartyB,
                text: "arrow ---> here".to_string(),
                chunk_indices: vec![1],
            },
        ];
        result
    }

    #[test]
    fn test_vtt_text_cannot_break_cues() {
        let vtt = render_vtt(&hostile_result());
        assert_eq!(vtt.matches(" --> ").count(), 2);
        assert_eq!(vtt.matches("\n\n").count(), 3);
        assert!(vtt.contains(
            "<v PARTY_A>first line 00:09:00.000 --&gt; 00:10:00.000 fake &lt;b&gt;cue&lt;/b&gt; &amp; more\n"
        ));
        assert!(vtt.contains("<v PARTY_B>arrow ---&gt; here\n"));
    }

    #[test]
    fn test_srt_text_cannot_break_cues() {
        let srt = render_srt(&hostile_result());
        assert_eq!(srt.matches("-->").count(), 2);
        assert!(srt.starts_with(
            "1\n00:00:00,000 --> 00:00:30,000\n[PARTY_A] first line 00:09:00.000 -> 00:10:00.000 fake <b>cue</b> & more\n\n2\n"
        ));
        assert!(srt.contains("[PARTY_B] arrow -> here\n"));
    }
}
