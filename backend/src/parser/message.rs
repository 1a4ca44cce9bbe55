//! Pipe-delimited clinical message parser.
//!
//! Each segment line is split on `|`; the first field names the segment and
//! every later non-blank field at 1-based position `i` becomes
//! `SEGMENT.i`. Segments may be separated by `\r`, `\n` or `\r\n`.
//!
//! ```text
//! PID|1|2||4   ->   PID.1 = 1, PID.2 = 2, PID.4 = 4
//! ```
//!
//! The parser does not interpret component (`^`) or repetition (`~`)
//! separators; that is left to the entity handlers.

use super::{decode_content, detect_encoding, FieldStream, FormatParser};
use crate::error::ParseResult;
use crate::models::{FieldRecord, FileFormat, ImportId, LineKey};

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageParser;

impl FormatParser for MessageParser {
    fn format(&self) -> FileFormat {
        FileFormat::Hl7
    }

    fn parse<'a>(&self, import_id: ImportId, bytes: &'a [u8]) -> ParseResult<FieldStream<'a>> {
        let encoding = detect_encoding(bytes);
        tracing::debug!(import_id, %encoding, "decoding clinical message");
        let content = decode_content(bytes, &encoding);

        let records = split_segments(&content)
            .into_iter()
            .enumerate()
            .flat_map(move |(idx, line)| segment_records(import_id, idx as u32 + 1, &line))
            .map(Ok);

        Ok(Box::new(records))
    }
}

/// Split a message into segment lines, treating `\r\n`, `\r` and `\n` alike.
fn split_segments(content: &str) -> Vec<String> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    let body = normalized.strip_suffix('\n').unwrap_or(&normalized);
    if body.is_empty() {
        return Vec::new();
    }
    body.split('\n').map(str::to_string).collect()
}

/// Records of one segment line.
fn segment_records(import_id: ImportId, line: u32, text: &str) -> Vec<FieldRecord> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut fields = text.split('|');
    let segment = fields.next().unwrap_or("").trim();
    if segment.is_empty() {
        tracing::warn!(import_id, line, "skipping segment without a name");
        return Vec::new();
    }

    fields
        .enumerate()
        .filter_map(|(idx, value)| {
            FieldRecord::new(
                import_id,
                LineKey::line(line),
                format!("{}.{}", segment, idx + 1),
                value,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<(u32, String, String)> {
        MessageParser
            .parse(1, text.as_bytes())
            .unwrap()
            .map(|r| {
                let r = r.unwrap();
                (r.key.line, r.field, r.value)
            })
            .collect()
    }

    #[test]
    fn test_blank_field_is_skipped() {
        let got = parse("PID|1|2||4");
        assert_eq!(
            got,
            vec![
                (1, "PID.1".to_string(), "1".to_string()),
                (1, "PID.2".to_string(), "2".to_string()),
                (1, "PID.4".to_string(), "4".to_string()),
            ]
        );
    }

    #[test]
    fn test_segment_separators() {
        let got = parse("MSH|a\rPID|b\r\nPV1|c\nOBX|d\r");
        let lines: Vec<(u32, &str)> = got.iter().map(|(l, f, _)| (*l, f.as_str())).collect();
        assert_eq!(
            lines,
            vec![(1, "MSH.1"), (2, "PID.1"), (3, "PV1.1"), (4, "OBX.1")]
        );
    }

    #[test]
    fn test_blank_lines_are_counted() {
        let got = parse("MSH|x\n\nPID|y");
        assert_eq!(got[1].0, 3);
    }

    #[test]
    fn test_nameless_segment_is_skipped() {
        let got = parse("|orphan\nPID|ok");
        assert_eq!(got, vec![(2, "PID.1".to_string(), "ok".to_string())]);
    }

    #[test]
    fn test_latin1_message() {
        // PID|Jo<E3>o  ("João" in ISO-8859-1)
        let bytes: &[u8] = b"PID|Jo\xE3o";
        let records: Vec<FieldRecord> = MessageParser
            .parse(1, bytes)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].value.starts_with("Jo"));
    }

    #[test]
    fn test_empty_message() {
        assert!(parse("").is_empty());
    }
}
