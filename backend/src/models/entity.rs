//! Materialized domain entities.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{record::LineKey, ImportId};

// =============================================================================
// Sex
// =============================================================================

/// Administrative sex of a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
    Other,
    Unknown,
}

impl Sex {
    /// Parse from the codes found in registries and clinical messages.
    pub fn from_code(code: &str) -> Option<Self> {
        let normalized = code.trim().to_uppercase();
        match normalized.as_str() {
            "F" | "FEMALE" | "FEMININO" | "FEMENINO" => Some(Self::Female),
            "M" | "MALE" | "MASCULINO" => Some(Self::Male),
            "O" | "A" | "N" | "OTHER" | "OUTRO" => Some(Self::Other),
            "U" | "UNKNOWN" | "IGNORADO" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn to_code(&self) -> &'static str {
        match self {
            Self::Female => "F",
            Self::Male => "M",
            Self::Other => "O",
            Self::Unknown => "U",
        }
    }
}

// =============================================================================
// Variants
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// Two-digit statistical code.
    pub code: u8,
    /// Two-letter abbreviation.
    pub abbreviation: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Municipality {
    /// Seven-digit statistical code; the first two digits are the state code.
    pub code: u32,
    pub name: String,
    pub state_code: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    /// Eleven-digit national document number.
    pub document: String,
    pub name: String,
    pub birth_date: NaiveDate,
    pub sex: Sex,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality_code: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub license_number: String,
    /// State of the issuing medical council.
    pub license_state: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hospital {
    /// Seven-digit facility registry code.
    pub registry_code: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beds: Option<u32>,
}

/// The materialized object for one completed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Entity {
    State(State),
    Municipality(Municipality),
    Patient(Patient),
    Doctor(Doctor),
    Hospital(Hospital),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "State",
            Self::Municipality(_) => "Municipality",
            Self::Patient(_) => "Patient",
            Self::Doctor(_) => "Doctor",
            Self::Hospital(_) => "Hospital",
        }
    }
}

/// An entity after persistence assigned its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntity {
    pub id: u64,
    pub import_id: ImportId,
    pub line: LineKey,
    pub entity: Entity,
}
