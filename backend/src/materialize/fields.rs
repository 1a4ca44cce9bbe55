//! Field tables and per-field validation rules.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{FileFormat, Sex};

/// How a raw value is validated and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Free text, inner whitespace collapsed.
    Text,
    /// Digits only once `.`, `-`, `/` and spaces are removed.
    Digits { min: usize, max: usize },
    /// Non-negative whole number.
    Integer,
    /// Calendar date, normalized to `YYYY-MM-DD`.
    Date,
    /// Two-letter state abbreviation, upper-cased.
    StateCode,
    /// Sex code, normalized to `F`, `M`, `O` or `U`.
    Sex,
    /// Phone number, 8 to 15 digits.
    Phone,
    /// Clinical-message person name `family^given^middle`.
    PersonName,
    /// First `^` component of a composite value, checked with the inner rule.
    FirstComponent(&'static Rule),
}

/// Accepted date layouts, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d", "%d-%m-%Y"];

impl Rule {
    /// Validate `raw`, returning its canonical text or a message.
    pub fn normalize(&self, raw: &str) -> Result<String, String> {
        let raw = raw.trim();
        match self {
            Rule::Text => Ok(collapse_whitespace(raw)),

            Rule::Digits { min, max } => {
                let digits: String = raw
                    .chars()
                    .filter(|c| !matches!(c, '.' | '-' | '/' | ' '))
                    .collect();
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err("must contain only digits".to_string());
                }
                if digits.len() < *min || digits.len() > *max {
                    return Err(if min == max {
                        format!("must have {} digits", min)
                    } else {
                        format!("must have between {} and {} digits", min, max)
                    });
                }
                Ok(digits)
            }

            Rule::Integer => raw
                .parse::<u32>()
                .map(|n| n.to_string())
                .map_err(|_| "must be a whole number".to_string()),

            Rule::Date => parse_date(raw)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .ok_or_else(|| "must be a date (YYYY-MM-DD or DD/MM/YYYY)".to_string()),

            Rule::StateCode => {
                if raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
                    Ok(raw.to_ascii_uppercase())
                } else {
                    Err("must be a two-letter state abbreviation".to_string())
                }
            }

            Rule::Sex => Sex::from_code(raw)
                .map(|s| s.to_code().to_string())
                .ok_or_else(|| "must be one of F, M, O, U".to_string()),

            Rule::Phone => {
                let digits: String = raw
                    .chars()
                    .filter(|c| !matches!(c, '+' | '(' | ')' | '-' | ' ' | '.'))
                    .collect();
                if (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
                    Ok(digits)
                } else {
                    Err("must be a phone number with 8 to 15 digits".to_string())
                }
            }

            Rule::PersonName => {
                let mut parts = raw.split('^').map(str::trim);
                let family = parts.next().unwrap_or("");
                let rest: Vec<&str> = parts.take(2).filter(|p| !p.is_empty()).collect();
                let mut name = rest.join(" ");
                if !family.is_empty() {
                    if !name.is_empty() {
                        name.push(' ');
                    }
                    name.push_str(family);
                }
                if name.is_empty() {
                    Err("must contain a name".to_string())
                } else {
                    Ok(collapse_whitespace(&name))
                }
            }

            Rule::FirstComponent(inner) => {
                let first = raw.split('^').next().unwrap_or("");
                inner.normalize(first)
            }
        }
    }
}

/// Parse a date in any accepted layout; timestamps keep only their date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let candidate = if raw.len() > 8 && raw.chars().take(8).all(|c| c.is_ascii_digit()) {
        // clinical timestamps: YYYYMMDDHHMM[SS]
        &raw[..8]
    } else if let Some((date, _)) = raw.split_once('T') {
        date
    } else {
        raw
    };
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Field specs
// =============================================================================

/// One field of an entity and where it is found in each format.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Draft key used by the handler.
    pub key: &'static str,
    /// Spreadsheet column label.
    pub column: &'static str,
    /// Accepted XML tag paths, first one is canonical.
    pub tags: &'static [&'static str],
    /// Clinical-message reference (`PID.3`).
    pub segment: Option<&'static str>,
    pub rule: Rule,
    pub required: bool,
}

impl FieldSpec {
    /// Whether a parser field name refers to this spec for `format`.
    pub fn matches(&self, format: FileFormat, name: &str) -> bool {
        match format {
            FileFormat::Xls | FileFormat::Xlsx => {
                !self.column.is_empty() && self.column.eq_ignore_ascii_case(name)
            }
            FileFormat::Xml => self.tags.iter().any(|tag| tag.eq_ignore_ascii_case(name)),
            FileFormat::Hl7 => self.segment.is_some_and(|s| s.eq_ignore_ascii_case(name)),
        }
    }

    /// Name of this field as a user sees it in a file of `format`.
    pub fn source_name(&self, format: FileFormat) -> String {
        match format {
            FileFormat::Xls | FileFormat::Xlsx if !self.column.is_empty() => self.column.to_string(),
            FileFormat::Xml if !self.tags.is_empty() => self.tags[0].to_string(),
            FileFormat::Hl7 => self.segment.unwrap_or(self.key).to_string(),
            _ => self.key.to_string(),
        }
    }
}

/// Find the spec a parser field name refers to.
pub fn resolve<'f>(fields: &'f [FieldSpec], format: FileFormat, name: &str) -> Option<&'f FieldSpec> {
    fields.iter().find(|spec| spec.matches(format, name))
}

// =============================================================================
// Line draft
// =============================================================================

/// Validated values collected for one line.
#[derive(Debug, Clone, Default)]
pub struct LineDraft {
    values: BTreeMap<&'static str, String>,
    rejected: BTreeSet<&'static str>,
}

impl LineDraft {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: &'static str, value: String) {
        self.values.entry(key).or_insert(value);
    }

    pub fn reject(&mut self, key: &'static str) {
        self.rejected.insert(key);
    }

    pub fn was_rejected(&self, key: &str) -> bool {
        self.rejected.contains(key)
    }

    /// No field of the line was recognized.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.rejected.is_empty()
    }

    /// Parse a stored value; stored values are already validated.
    pub fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}
