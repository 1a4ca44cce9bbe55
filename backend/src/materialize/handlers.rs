//! Built-in entity handlers, one per data type.
//!
//! Tabular layouts (spreadsheet columns / XML tags):
//!
//! | Data type | A              | B             | C             | D         | E     | F                 |
//! |-----------|----------------|---------------|---------------|-----------|-------|-------------------|
//! | location  | code (2 or 7)  | name          | abbreviation  |           |       |                   |
//! | patient   | document       | name          | birth date    | sex       | phone | municipality code |
//! | doctor    | license number | license state | name          | specialty |       |                   |
//! | hospital  | registry code  | name          | municipality  | beds      |       |                   |
//!
//! Clinical messages map `PID` segments onto patients.

use chrono::NaiveDate;

use super::fields::{FieldSpec, LineDraft, Rule};
use super::registry::{BuildFailure, EntityHandler};
use crate::models::{DataType, Doctor, Entity, Hospital, Municipality, Patient, Sex, State};

fn required(draft: &LineDraft, key: &'static str) -> Result<String, BuildFailure> {
    draft
        .get(key)
        .map(str::to_string)
        .ok_or_else(|| BuildFailure::new(key, "missing required field"))
}

fn parsed<T: std::str::FromStr>(draft: &LineDraft, key: &'static str) -> Result<T, BuildFailure> {
    draft
        .parsed(key)
        .ok_or_else(|| BuildFailure::new(key, "missing required field"))
}

// =============================================================================
// Location
// =============================================================================

const LOCATION_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "code",
        column: "A",
        tags: &["code", "@code", "codigo", "ibge"],
        segment: None,
        rule: Rule::Digits { min: 2, max: 7 },
        required: true,
    },
    FieldSpec {
        key: "name",
        column: "B",
        tags: &["name", "nome"],
        segment: None,
        rule: Rule::Text,
        required: true,
    },
    FieldSpec {
        key: "abbreviation",
        column: "C",
        tags: &["abbreviation", "uf", "sigla"],
        segment: None,
        rule: Rule::StateCode,
        required: false,
    },
];

/// States (2-digit code) and municipalities (7-digit code).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationHandler;

impl EntityHandler for LocationHandler {
    fn data_type(&self) -> DataType {
        DataType::Location
    }

    fn fields(&self) -> &'static [FieldSpec] {
        LOCATION_FIELDS
    }

    fn build(&self, draft: &LineDraft) -> Result<Entity, BuildFailure> {
        let code = required(draft, "code")?;
        let name = required(draft, "name")?;

        match code.len() {
            2 => {
                let abbreviation = draft
                    .get("abbreviation")
                    .map(str::to_string)
                    .ok_or_else(|| BuildFailure::new("abbreviation", "states need an abbreviation"))?;
                Ok(Entity::State(State {
                    code: parsed(draft, "code")?,
                    abbreviation,
                    name,
                }))
            }
            7 => {
                let code: u32 = parsed(draft, "code")?;
                Ok(Entity::Municipality(Municipality {
                    code,
                    name,
                    state_code: (code / 100_000) as u8,
                }))
            }
            _ => Err(BuildFailure::new(
                "code",
                "must have 2 digits (state) or 7 digits (municipality)",
            )),
        }
    }
}

// =============================================================================
// Patient
// =============================================================================

const PATIENT_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "document",
        column: "A",
        tags: &["document", "@document", "cpf"],
        segment: None,
        rule: Rule::Digits { min: 11, max: 11 },
        required: true,
    },
    FieldSpec {
        key: "name",
        column: "B",
        tags: &["name", "nome"],
        segment: None,
        rule: Rule::Text,
        required: true,
    },
    FieldSpec {
        key: "birth_date",
        column: "C",
        tags: &["birthDate", "birth_date", "nascimento"],
        segment: None,
        rule: Rule::Date,
        required: true,
    },
    FieldSpec {
        key: "sex",
        column: "D",
        tags: &["sex", "sexo"],
        segment: None,
        rule: Rule::Sex,
        required: true,
    },
    FieldSpec {
        key: "phone",
        column: "E",
        tags: &["phone", "telefone"],
        segment: None,
        rule: Rule::Phone,
        required: false,
    },
    FieldSpec {
        key: "municipality_code",
        column: "F",
        tags: &["municipalityCode", "municipality_code", "address/municipality"],
        segment: None,
        rule: Rule::Digits { min: 7, max: 7 },
        required: false,
    },
];

const PID_DOCUMENT: Rule = Rule::Digits { min: 11, max: 11 };

const CLINICAL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "document",
        column: "",
        tags: &[],
        segment: Some("PID.3"),
        rule: Rule::FirstComponent(&PID_DOCUMENT),
        required: true,
    },
    FieldSpec {
        key: "name",
        column: "",
        tags: &[],
        segment: Some("PID.5"),
        rule: Rule::PersonName,
        required: true,
    },
    FieldSpec {
        key: "birth_date",
        column: "",
        tags: &[],
        segment: Some("PID.7"),
        rule: Rule::Date,
        required: true,
    },
    FieldSpec {
        key: "sex",
        column: "",
        tags: &[],
        segment: Some("PID.8"),
        rule: Rule::Sex,
        required: true,
    },
    FieldSpec {
        key: "phone",
        column: "",
        tags: &[],
        segment: Some("PID.13"),
        rule: Rule::FirstComponent(&Rule::Phone),
        required: false,
    },
];

/// Patients, from tabular files or from clinical-message `PID` segments.
#[derive(Debug, Clone, Copy)]
pub struct PatientHandler {
    data_type: DataType,
    fields: &'static [FieldSpec],
}

impl PatientHandler {
    /// Handler for the `patient` data type.
    pub fn tabular() -> Self {
        Self {
            data_type: DataType::Patient,
            fields: PATIENT_FIELDS,
        }
    }

    /// Handler for the `clinical-code` data type.
    pub fn clinical() -> Self {
        Self {
            data_type: DataType::ClinicalCode,
            fields: CLINICAL_FIELDS,
        }
    }
}

impl EntityHandler for PatientHandler {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    fn build(&self, draft: &LineDraft) -> Result<Entity, BuildFailure> {
        let birth_date: NaiveDate = parsed(draft, "birth_date")?;
        let sex = Sex::from_code(&required(draft, "sex")?)
            .ok_or_else(|| BuildFailure::new("sex", "unknown sex code"))?;

        Ok(Entity::Patient(Patient {
            document: required(draft, "document")?,
            name: required(draft, "name")?,
            birth_date,
            sex,
            phone: draft.get("phone").map(str::to_string),
            municipality_code: draft.parsed("municipality_code"),
        }))
    }
}

// =============================================================================
// Doctor
// =============================================================================

const DOCTOR_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "license_number",
        column: "A",
        tags: &["license", "licenseNumber", "crm"],
        segment: None,
        rule: Rule::Digits { min: 4, max: 10 },
        required: true,
    },
    FieldSpec {
        key: "license_state",
        column: "B",
        tags: &["licenseState", "license/@state", "uf"],
        segment: None,
        rule: Rule::StateCode,
        required: true,
    },
    FieldSpec {
        key: "name",
        column: "C",
        tags: &["name", "nome"],
        segment: None,
        rule: Rule::Text,
        required: true,
    },
    FieldSpec {
        key: "specialty",
        column: "D",
        tags: &["specialty", "especialidade"],
        segment: None,
        rule: Rule::Text,
        required: false,
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct DoctorHandler;

impl EntityHandler for DoctorHandler {
    fn data_type(&self) -> DataType {
        DataType::Doctor
    }

    fn fields(&self) -> &'static [FieldSpec] {
        DOCTOR_FIELDS
    }

    fn build(&self, draft: &LineDraft) -> Result<Entity, BuildFailure> {
        Ok(Entity::Doctor(Doctor {
            license_number: required(draft, "license_number")?,
            license_state: required(draft, "license_state")?,
            name: required(draft, "name")?,
            specialty: draft.get("specialty").map(str::to_string),
        }))
    }
}

// =============================================================================
// Hospital
// =============================================================================

const HOSPITAL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "registry_code",
        column: "A",
        tags: &["code", "@code", "cnes", "registryCode"],
        segment: None,
        rule: Rule::Digits { min: 7, max: 7 },
        required: true,
    },
    FieldSpec {
        key: "name",
        column: "B",
        tags: &["name", "nome"],
        segment: None,
        rule: Rule::Text,
        required: true,
    },
    FieldSpec {
        key: "municipality_code",
        column: "C",
        tags: &["municipalityCode", "address/municipality", "ibge"],
        segment: None,
        rule: Rule::Digits { min: 7, max: 7 },
        required: false,
    },
    FieldSpec {
        key: "beds",
        column: "D",
        tags: &["beds", "leitos"],
        segment: None,
        rule: Rule::Integer,
        required: false,
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct HospitalHandler;

impl EntityHandler for HospitalHandler {
    fn data_type(&self) -> DataType {
        DataType::Hospital
    }

    fn fields(&self) -> &'static [FieldSpec] {
        HOSPITAL_FIELDS
    }

    fn build(&self, draft: &LineDraft) -> Result<Entity, BuildFailure> {
        Ok(Entity::Hospital(Hospital {
            registry_code: required(draft, "registry_code")?,
            name: required(draft, "name")?,
            municipality_code: draft.parsed("municipality_code"),
            beds: draft.parsed("beds"),
        }))
    }
}
