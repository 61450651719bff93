//! One row per chunk, RFC 4180 quoting.

use crate::job::JobResult;

const HEADER: &str =
    "chunk_index,start_time,end_time,speaker,confidence,real_time_factor,language,text";

pub(super) fn render(result: &JobResult) -> String {
    let mut out = String::with_capacity(HEADER.len() + result.chunks.len() * 96);
    out.push_str(HEADER);
    out.push_str("\r\n");

    for chunk in &result.chunks {
        out.push_str(&format!(
            "{},{:.3},{:.3},{},{:.4},{:.4},{},{}\r\n",
            chunk.chunk_index,
            chunk.start_time,
            chunk.end_time,
            chunk.speaker,
            chunk.confidence,
            chunk.real_time_factor,
            chunk.language.as_deref().unwrap_or(""),
            quote(&chunk.text)
        ));
    }
    out
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support;

    #[test]
    fn test_csv_rows() {
        let csv = render(&test_support::result());
        let lines: Vec<&str> = csv.split("\r\n").collect();

        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            "0,0.000,30.000,PARTY_A,0.8750,0.2500,en,\"Good morning, what brings you in?\""
        );
        assert_eq!(
            lines[3],
            "2,60.000,90.000,PARTY_B,0.8750,0.2500,en,\"I have a \"\"sharp\"\" pain, doctor\""
        );
        assert_eq!(lines.len(), 5); // header + 3 rows + trailing empty
    }
}
