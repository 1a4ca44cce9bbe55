//! Domain models for the clinicload import pipeline.
//!
//! - [`Import`] - One upload job and its lifecycle status
//! - [`DataType`] - Declared domain category of an import
//! - [`FileFormat`] - Declared file format of an import
//! - [`ImportStatus`] - Orchestration state machine
//! - [`FieldRecord`], [`LineKey`], [`LineError`] - Parser output and line failures
//! - [`Entity`] and its variants - Materialized domain objects

mod entity;
mod record;

pub use entity::{Doctor, Entity, Hospital, Municipality, Patient, Sex, State, StoredEntity};
pub use record::{FieldRecord, LineError, LineKey};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned to an import by the store.
pub type ImportId = i64;

// =============================================================================
// Data Type
// =============================================================================

/// Declared domain category of an import.
///
/// Selects the entity handler used by the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    Hospital,
    Doctor,
    Patient,
    /// States and municipalities.
    Location,
    /// Clinical messages carrying patient segments.
    ClinicalCode,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Hospital,
        DataType::Doctor,
        DataType::Patient,
        DataType::Location,
        DataType::ClinicalCode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hospital => "hospital",
            Self::Doctor => "doctor",
            Self::Patient => "patient",
            Self::Location => "location",
            Self::ClinicalCode => "clinical-code",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hospital" => Ok(Self::Hospital),
            "doctor" => Ok(Self::Doctor),
            "patient" => Ok(Self::Patient),
            "location" | "state" | "municipality" => Ok(Self::Location),
            "clinical-code" | "clinical_code" => Ok(Self::ClinicalCode),
            other => Err(format!("unknown data type '{}'", other)),
        }
    }
}

// =============================================================================
// File Format
// =============================================================================

/// Declared file format of an import, also the reader provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Legacy binary spreadsheet (BIFF `.xls`).
    #[serde(alias = "spreadsheet-legacy")]
    Xls,
    /// Modern XML-based spreadsheet (`.xlsx`).
    #[serde(alias = "spreadsheet-modern")]
    Xlsx,
    /// Generic XML document.
    Xml,
    /// Pipe-delimited clinical message.
    #[serde(alias = "clinical-message")]
    Hl7,
}

impl FileFormat {
    pub const ALL: [FileFormat; 4] = [
        FileFormat::Xls,
        FileFormat::Xlsx,
        FileFormat::Xml,
        FileFormat::Hl7,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
            Self::Xml => "xml",
            Self::Hl7 => "hl7",
        }
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self, Self::Xls | Self::Xlsx)
    }

    /// Guess the format from a file name extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1;
        ext.parse().ok()
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xls" | "spreadsheet-legacy" => Ok(Self::Xls),
            "xlsx" | "spreadsheet-modern" => Ok(Self::Xlsx),
            "xml" => Ok(Self::Xml),
            "hl7" | "clinical-message" => Ok(Self::Hl7),
            other => Err(format!("unknown file format '{}'", other)),
        }
    }
}

// =============================================================================
// Import Status
// =============================================================================

/// Lifecycle status of an import.
///
/// ```text
/// Pending -> Probing -> Processing -> Succeeded | PartialSuccess | Failed
///               |  ^
///               v  |
///             Delayed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportStatus {
    Pending,
    Probing,
    Delayed,
    Processing,
    Succeeded,
    PartialSuccess,
    Failed,
}

impl ImportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::PartialSuccess | Self::Failed)
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Probing => "probing",
            Self::Delayed => "delayed",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::PartialSuccess => "partialSuccess",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Import
// =============================================================================

/// Request accepted by the upload API to create an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImport {
    pub data_type: DataType,
    pub file_format: FileFormat,
    pub file_name: String,
    /// Time-limited retrieval reference (pre-signed URL).
    pub source_location: String,
}

/// One upload job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Import {
    pub id: ImportId,
    pub file_name: String,
    pub data_type: DataType,
    pub file_format: FileFormat,
    pub source_location: String,
    pub status: ImportStatus,
    /// Number of probes issued so far.
    pub attempts: u32,
    /// Failure kind label for `Failed` imports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Import {
    pub fn new(id: ImportId, request: NewImport) -> Self {
        let now = Utc::now();
        Self {
            id,
            file_name: request.file_name,
            data_type: request.data_type,
            file_format: request.file_format,
            source_location: request.source_location,
            status: ImportStatus::Pending,
            attempts: 0,
            failure_kind: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}
