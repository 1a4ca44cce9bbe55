//! Field Records and Line Errors.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ImportId;

/// Position of a line inside an uploaded file.
///
/// `sheet` is the 1-based worksheet index for spreadsheets and `0` for
/// formats without worksheets, so rows with the same number on different
/// sheets never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub sheet: u32,
    pub line: u32,
}

impl LineKey {
    pub fn new(sheet: u32, line: u32) -> Self {
        Self { sheet, line }
    }

    /// Key for formats without worksheets.
    pub fn line(line: u32) -> Self {
        Self { sheet: 0, line }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sheet == 0 {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "sheet {}, line {}", self.sheet, self.line)
        }
    }
}

/// One non-blank field observed in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    pub import_id: ImportId,
    #[serde(flatten)]
    pub key: LineKey,
    pub field: String,
    pub value: String,
}

impl FieldRecord {
    /// Build a record, returning `None` for blank values.
    pub fn new(
        import_id: ImportId,
        key: LineKey,
        field: impl Into<String>,
        value: &str,
    ) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        Some(Self {
            import_id,
            key,
            field: field.into(),
            value: value.to_string(),
        })
    }
}

/// Why a line (or one of its fields) failed to materialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineError {
    pub import_id: ImportId,
    #[serde(flatten)]
    pub key: LineKey,
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl LineError {
    pub fn new(
        import_id: ImportId,
        key: LineKey,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            import_id,
            key,
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(val) => write!(
                f,
                "{}, field '{}' (value '{}'): {}",
                self.key, self.field, val, self.message
            ),
            None => write!(f, "{}, field '{}': {}", self.key, self.field, self.message),
        }
    }
}
