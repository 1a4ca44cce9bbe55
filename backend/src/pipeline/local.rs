//! Synchronous runs over local files, used by the CLI.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::config::Settings;
use crate::error::{ImportError, ImportResult, SourceError};
use crate::materialize::{HandlerRegistry, LineAccumulator, Outcome};
use crate::models::{DataType, Entity, FieldRecord, FileFormat, LineError, LineKey};
use crate::parser::ReaderRegistry;

/// Import id used for records of local runs.
pub const LOCAL_IMPORT_ID: i64 = 0;

/// Everything one local file produced.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRun {
    pub entities: Vec<LocalEntity>,
    pub line_errors: Vec<LineError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalEntity {
    #[serde(flatten)]
    pub line: LineKey,
    pub entity: Entity,
}

fn read(path: &Path) -> ImportResult<Vec<u8>> {
    fs::read(path).map_err(|e| SourceError::Io(e).into())
}

/// Parse a local file into Field Records.
pub fn parse_file(path: &Path, format: FileFormat, settings: &Settings) -> ImportResult<Vec<FieldRecord>> {
    let readers = ReaderRegistry::with_defaults(settings.xml_lines);
    let parser = readers
        .get(format)
        .ok_or(ImportError::UnsupportedFormat(format))?;
    let bytes = read(path)?;

    let records = parser
        .parse(LOCAL_IMPORT_ID, &bytes)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Parse and materialize a local file without persisting anything.
pub fn process_file(
    path: &Path,
    format: FileFormat,
    data_type: DataType,
    settings: &Settings,
) -> ImportResult<LocalRun> {
    let handlers = HandlerRegistry::with_defaults();
    let mut accumulator = LineAccumulator::new(LOCAL_IMPORT_ID, data_type, format, &handlers)?;
    let header_rows = if format.is_spreadsheet() {
        settings.header_rows
    } else {
        0
    };

    let mut run = LocalRun::default();
    let mut collect = |outcomes: Vec<Outcome>| {
        for outcome in outcomes {
            match outcome {
                Outcome::Entity { key, entity } => run.entities.push(LocalEntity { line: key, entity }),
                Outcome::Error(err) => run.line_errors.push(err),
            }
        }
    };

    for record in parse_file(path, format, settings)? {
        if record.key.line <= header_rows {
            continue;
        }
        collect(accumulator.materialize(&record));
    }
    collect(accumulator.finish());
    Ok(run)
}
