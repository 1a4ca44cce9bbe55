//! Error types for the clinicload import pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`SourceError`] - Object storage probe/fetch errors
//! - [`ParseError`] - Format parser errors
//! - [`MaterializeError`] - Entity factory configuration errors
//! - [`StoreError`] - Persistence errors
//! - [`QueueError`] - Dispatch queue errors
//! - [`ImportError`] - Top-level orchestration errors
//! - [`ConfigError`] - Environment configuration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.
//!
//! A malformed individual field is not an error type: it becomes a
//! [`crate::models::LineError`] value and processing continues.

use thiserror::Error;

use crate::models::{DataType, FileFormat, ImportId};

// =============================================================================
// Object Source Errors
// =============================================================================

/// Errors while probing or downloading an uploaded object.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP transport failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The storage backend answered with a non-success status.
    #[error("Object storage returned status {0}")]
    Status(u16),

    /// The request did not complete in time.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Local read failed (file-backed sources).
    #[error("Failed to read object: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Parser Errors
// =============================================================================

/// Errors produced by a format parser.
///
/// Every variant is fatal to the remaining record sequence.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The underlying source broke mid-parse.
    #[error("Source read failure at line {line}: {message}")]
    SourceRead { line: u32, message: String },

    /// The workbook container could not be opened.
    #[error("Cannot open workbook: {0}")]
    Workbook(String),

    /// The byte stream could not be decoded.
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl ParseError {
    pub fn source_read(line: u32, message: impl Into<String>) -> Self {
        Self::SourceRead {
            line,
            message: message.into(),
        }
    }
}

// =============================================================================
// Materialization Errors
// =============================================================================

/// Configuration errors of the entity factory.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// No handler registered for the import's data type.
    #[error("No entity handler registered for data type '{0}'")]
    UnsupportedDataType(DataType),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Import not found.
    #[error("Import not found: {0}")]
    NotFound(ImportId),

    /// The store refused a write.
    #[error("Write rejected: {0}")]
    Rejected(String),
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Errors from the dispatch queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No consumer is attached anymore.
    #[error("Dispatch queue is closed")]
    Closed,
}

// =============================================================================
// Import Errors (top-level)
// =============================================================================

/// Top-level orchestration errors.
///
/// Returned by [`crate::pipeline::Orchestrator::handle`]; the variant is
/// recorded on the import as its failure kind.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The object never became reachable within the configured attempts.
    #[error("Source unavailable after {attempts} attempts: {location}")]
    TransientSourceUnavailable { location: String, attempts: u32 },

    /// No parser registered for the declared format.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(FileFormat),

    /// No handler registered for the declared data type.
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(#[from] MaterializeError),

    /// Download or parse broke before the end of the file.
    #[error("Source read failure: {0}")]
    SourceReadFailure(String),

    /// The store rejected a write.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    /// The run was cancelled by shutdown.
    #[error("Import run cancelled")]
    Cancelled,

    /// Re-dispatch could not be published.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ImportError {
    /// Stable label stored on the failed import.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientSourceUnavailable { .. } => "transient_source_unavailable",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::UnsupportedDataType(_) => "unsupported_data_type",
            Self::SourceReadFailure(_) => "source_read_failure",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::Cancelled => "cancelled",
            Self::Queue(_) => "queue",
        }
    }
}

impl From<ParseError> for ImportError {
    fn from(err: ParseError) -> Self {
        Self::SourceReadFailure(err.to_string())
    }
}

impl From<SourceError> for ImportError {
    fn from(err: SourceError) -> Self {
        Self::SourceReadFailure(err.to_string())
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Invalid environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unknown import.
    #[error("Import not found: {0}")]
    NotFound(ImportId),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Queue error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for orchestration.
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // ParseError -> ImportError
        let parse_err = ParseError::source_read(12, "unexpected end of file");
        let import_err: ImportError = parse_err.into();
        assert_eq!(import_err.kind(), "source_read_failure");
        assert!(import_err.to_string().contains("line 12"));

        // StoreError -> ImportError
        let store_err = StoreError::Rejected("disk full".into());
        let import_err: ImportError = store_err.into();
        assert_eq!(import_err.kind(), "persistence_failure");
        assert!(import_err.to_string().contains("disk full"));
    }

    #[test]
    fn test_unsupported_data_type_message() {
        let err: ImportError = MaterializeError::UnsupportedDataType(DataType::Hospital).into();
        assert_eq!(err.kind(), "unsupported_data_type");
        assert!(err.to_string().contains("hospital"));
    }

    #[test]
    fn test_transient_message_names_location() {
        let err = ImportError::TransientSourceUnavailable {
            location: "https://bucket/file.xlsx".into(),
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("bucket/file.xlsx"));
    }
}
