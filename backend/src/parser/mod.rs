//! Format parsers turning uploaded objects into Field Records.
//!
//! Every parser yields a lazy, finite, non-restartable sequence of
//! [`FieldRecord`]s. Blank fields never produce a record; a malformed single
//! field is skipped with a warning; a broken source yields one
//! [`ParseError`] and ends the sequence.
//!
//! | Format | Field name            | Line                         |
//! |--------|-----------------------|------------------------------|
//! | xls    | column label (`A`)    | row within the sheet         |
//! | xlsx   | column label (`AB`)   | row within the sheet         |
//! | xml    | tag path (`name`)     | record element ordinal       |
//! | hl7    | `SEGMENT.index`       | line within the message      |

pub mod message;
pub mod registry;
pub mod spreadsheet;
pub mod xml;

pub use message::MessageParser;
pub use registry::ReaderRegistry;
pub use spreadsheet::SpreadsheetParser;
pub use xml::{XmlLineMode, XmlParser};

use crate::error::ParseResult;
use crate::models::{FieldRecord, FileFormat, ImportId};

/// Lazy sequence of records produced by a parser.
pub type FieldStream<'a> = Box<dyn Iterator<Item = ParseResult<FieldRecord>> + Send + 'a>;

/// A parser for one declared file format.
pub trait FormatParser: Send + Sync {
    /// The format this parser handles.
    fn format(&self) -> FileFormat;

    /// Start parsing `bytes`.
    ///
    /// Fails up front only when the container itself cannot be opened.
    fn parse<'a>(&self, import_id: ImportId, bytes: &'a [u8]) -> ParseResult<FieldStream<'a>>;
}

// =============================================================================
// Column labels
// =============================================================================

/// Spreadsheet column label of a 1-based column index (`1 -> "A"`, `27 -> "AA"`).
///
/// Returns an empty string for `0`, which has no label.
pub fn column_label(index: u32) -> String {
    let mut n = index;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// 1-based column index of a spreadsheet label (`"AA" -> 27`).
///
/// Case-insensitive; `None` for empty labels, non-letters or overflow.
pub fn column_index(label: &str) -> Option<u32> {
    if label.is_empty() {
        return None;
    }
    label.chars().try_fold(0u32, |acc, c| {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
}

// =============================================================================
// Text decoding
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return "utf-8".to_string();
    }

    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes to string using the specified encoding.
///
/// Undecodable sequences are replaced rather than failing the whole file.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(bytes);
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        other => match encoding_rs::Encoding::for_label(other.as_bytes()) {
            Some(enc) => enc.decode(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}
