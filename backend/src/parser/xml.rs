//! XML tree parser.
//!
//! The root's children are records; everything below them is fields.
//!
//! ```text
//! <patients>                      root
//!   <patient id="7">              record 1   @id = 7
//!     <name>Ana</name>                       name = Ana
//!     <phone>1111</phone>                    phone = 1111
//!     <phone>2222</phone>                    phone[2] = 2222
//!     <address><city>Olinda</city></address> address/city = Olinda
//!   </patient>
//! </patients>
//! ```
//!
//! Only elements with non-blank text (and non-blank attributes) produce
//! records.
//!
//! # Line numbers
//!
//! [`XmlLineMode::Sequential`] is the literal counter: every emitted record
//! takes the next line, so each field of a `<patient>` lands on its own line
//! and no entity ever sees more than one field. [`XmlLineMode::Record`], the
//! default, numbers the root's children instead, so all fields below one
//! record element share a line and complete together when the next record
//! element starts.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::{FieldStream, FormatParser};
use crate::error::{ParseError, ParseResult};
use crate::models::{FieldRecord, FileFormat, ImportId, LineKey};

/// How XML records are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XmlLineMode {
    /// Line = ordinal of the record element holding the field.
    #[default]
    Record,
    /// Line = running counter over emitted records.
    Sequential,
}

impl std::str::FromStr for XmlLineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("unknown XML line mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlParser {
    mode: XmlLineMode,
}

impl XmlParser {
    pub fn new(mode: XmlLineMode) -> Self {
        Self { mode }
    }
}

impl FormatParser for XmlParser {
    fn format(&self) -> FileFormat {
        FileFormat::Xml
    }

    fn parse<'a>(&self, import_id: ImportId, bytes: &'a [u8]) -> ParseResult<FieldStream<'a>> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        Ok(Box::new(XmlRecords {
            import_id,
            mode: self.mode,
            reader,
            stack: Vec::new(),
            record: 0,
            emitted: 0,
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

/// One open element.
struct Frame {
    /// Path segment, with an ordinal suffix for repeated siblings.
    segment: String,
    children: HashMap<String, u32>,
    text: String,
}

struct XmlRecords<'a> {
    import_id: ImportId,
    mode: XmlLineMode,
    reader: Reader<&'a [u8]>,
    stack: Vec<Frame>,
    /// Ordinal of the current record element.
    record: u32,
    emitted: u32,
    pending: VecDeque<FieldRecord>,
    done: bool,
}

impl XmlRecords<'_> {
    fn fail(&mut self, message: String) -> Option<ParseResult<FieldRecord>> {
        self.done = true;
        Some(Err(ParseError::source_read(self.emitted, message)))
    }

    /// Path of the innermost element relative to its record, `None` at record level.
    fn field_path(&self) -> Option<String> {
        if self.stack.len() <= 2 {
            return None;
        }
        let segments: Vec<&str> = self.stack[2..].iter().map(|f| f.segment.as_str()).collect();
        Some(segments.join("/"))
    }

    fn push(&mut self, field: String, value: &str) {
        let line = match self.mode {
            XmlLineMode::Record => self.record,
            XmlLineMode::Sequential => self.emitted + 1,
        };
        if let Some(record) = FieldRecord::new(self.import_id, LineKey::line(line), field, value) {
            self.emitted += 1;
            self.pending.push_back(record);
        }
    }

    fn open(&mut self, start: &BytesStart<'_>) {
        let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();

        let depth = self.stack.len();
        if depth == 1 {
            self.record += 1;
        }

        let segment = match self.stack.last_mut() {
            None => tag,
            Some(parent) => {
                let count = parent.children.entry(tag.clone()).or_insert(0);
                *count += 1;
                if *count == 1 || depth == 1 {
                    tag
                } else {
                    format!("{}[{}]", tag, count)
                }
            }
        };

        self.stack.push(Frame {
            segment,
            children: HashMap::new(),
            text: String::new(),
        });

        if self.stack.len() >= 2 {
            self.attributes(start);
        }
    }

    fn attributes(&mut self, start: &BytesStart<'_>) {
        let prefix = self.field_path();
        for attr in start.attributes() {
            let attr = match attr {
                Ok(attr) => attr,
                Err(e) => {
                    tracing::warn!(import_id = self.import_id, error = %e, "skipping malformed attribute");
                    continue;
                }
            };
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let field = match &prefix {
                Some(path) => format!("{}/@{}", path, key),
                None => format!("@{}", key),
            };
            match attr.unescape_value() {
                Ok(value) => self.push(field, &value),
                Err(e) => {
                    tracing::warn!(import_id = self.import_id, %field, error = %e, "skipping malformed attribute value");
                }
            }
        }
    }

    fn close(&mut self) {
        let field = match self.field_path() {
            Some(path) => Some(path),
            None if self.stack.len() == 2 => Some(self.stack[1].segment.clone()),
            None => None,
        };
        if let Some(frame) = self.stack.pop() {
            if let Some(field) = field {
                self.push(field, &frame.text);
            }
        }
    }
}

impl Iterator for XmlRecords<'_> {
    type Item = ParseResult<FieldRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }

            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    let position = self.reader.buffer_position();
                    return self.fail(format!("malformed XML at byte {}: {}", position, e));
                }
            };

            match event {
                Event::Start(start) => self.open(&start),
                Event::Empty(start) => {
                    self.open(&start);
                    self.close();
                }
                Event::End(_) => self.close(),
                Event::Text(text) => match text.unescape() {
                    Ok(value) => {
                        if let Some(frame) = self.stack.last_mut() {
                            frame.text.push_str(&value);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(import_id = self.import_id, error = %e, "skipping malformed text");
                    }
                },
                Event::CData(data) => {
                    let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(frame) = self.stack.last_mut() {
                        frame.text.push_str(&value);
                    }
                }
                Event::Eof => {
                    if !self.stack.is_empty() {
                        return self.fail("unexpected end of document".to_string());
                    }
                    self.done = true;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str, mode: XmlLineMode) -> Vec<ParseResult<FieldRecord>> {
        XmlParser::new(mode)
            .parse(5, xml.as_bytes())
            .unwrap()
            .collect()
    }

    fn fields(xml: &str, mode: XmlLineMode) -> Vec<(u32, String, String)> {
        parse(xml, mode)
            .into_iter()
            .map(|r| {
                let r = r.unwrap();
                (r.key.line, r.field, r.value)
            })
            .collect()
    }

    const DOC: &str = r#"<?xml version="1.0"?>
<hospitals>
  <hospital code="2337991">
    <name>Hospital da Restauração</name>
    <beds>  </beds>
    <phone>8131811000</phone>
    <phone>8131811001</phone>
    <address><city>Recife</city></address>
  </hospital>
  <hospital>
    <name><![CDATA[Santa Casa & Co]]></name>
    <empty/>
  </hospital>
</hospitals>"#;

    #[test]
    fn test_record_mode_groups_by_element() {
        let got = fields(DOC, XmlLineMode::Record);
        let expected: Vec<(u32, String, String)> = vec![
            (1, "@code".into(), "2337991".into()),
            (1, "name".into(), "Hospital da Restauração".into()),
            (1, "phone".into(), "8131811000".into()),
            (1, "phone[2]".into(), "8131811001".into()),
            (1, "address/city".into(), "Recife".into()),
            (2, "name".into(), "Santa Casa & Co".into()),
        ];
        assert_eq!(got, expected);
    }

    #[test]
    fn test_sequential_mode_counts_records() {
        let lines: Vec<u32> = fields(DOC, XmlLineMode::Sequential)
            .into_iter()
            .map(|(line, _, _)| line)
            .collect();
        assert_eq!(lines, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_entities_are_unescaped() {
        let got = fields("<r><x><a>Silva &amp; Filhos</a></x></r>", XmlLineMode::Record);
        assert_eq!(got, vec![(1, "a".into(), "Silva & Filhos".into())]);
    }

    #[test]
    fn test_malformed_document_ends_with_error() {
        let results = parse("<r><x><a>1</a></x><x><a>2</b></x></r>", XmlLineMode::Record);
        assert!(results.first().unwrap().is_ok());
        assert!(results.last().unwrap().is_err());
        // nothing after the error
        let errors = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_truncated_document_is_fatal() {
        let results = parse("<r><x><a>1</a>", XmlLineMode::Record);
        assert!(results.last().unwrap().is_err());
    }
}
