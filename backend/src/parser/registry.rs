//! Reader provider registry: file format identifier -> parser.

use std::collections::HashMap;
use std::sync::Arc;

use super::{FormatParser, MessageParser, SpreadsheetParser, XmlLineMode, XmlParser};
use crate::models::FileFormat;

/// Maps declared file formats to the parser able to read them.
///
/// Lookups for unknown providers return `None`; deciding whether that is
/// fatal is left to the caller.
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    parsers: HashMap<FileFormat, Arc<dyn FormatParser>>,
}

impl ReaderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in parser.
    pub fn with_defaults(xml_mode: XmlLineMode) -> Self {
        let mut registry = Self::new();
        registry.register(SpreadsheetParser::legacy());
        registry.register(SpreadsheetParser::modern());
        registry.register(XmlParser::new(xml_mode));
        registry.register(MessageParser);
        registry
    }

    /// Register a parser under the format it declares, replacing any previous one.
    pub fn register<P: FormatParser + 'static>(&mut self, parser: P) {
        let format = parser.format();
        tracing::debug!(%format, "registered reader provider");
        self.parsers.insert(format, Arc::new(parser));
    }

    /// Parser for a declared format.
    pub fn get(&self, format: FileFormat) -> Option<Arc<dyn FormatParser>> {
        self.parsers.get(&format).cloned()
    }

    /// Parser for a provider identifier such as `"xlsx"` or `"clinical-message"`.
    pub fn provider(&self, identifier: &str) -> Option<Arc<dyn FormatParser>> {
        let format: FileFormat = identifier.parse().ok()?;
        self.get(format)
    }

    /// Registered formats.
    pub fn formats(&self) -> Vec<FileFormat> {
        let mut formats: Vec<FileFormat> = self.parsers.keys().copied().collect();
        formats.sort_by_key(|f| f.as_str());
        formats
    }
}
