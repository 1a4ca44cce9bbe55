//! Spreadsheet parser for legacy (`.xls`) and modern (`.xlsx`) workbooks.
//!
//! Worksheets are visited in file order and loaded one at a time; each
//! sheet yields its non-blank cells row by row, left to right. The field
//! name is the column label and the line is the 1-based row within the
//! sheet, keyed together with the 1-based sheet index.

use calamine::{Data, DataType as _, Range, Reader, Sheets, Xls, Xlsx};
use std::io::Cursor;

use super::{column_label, FieldStream, FormatParser};
use crate::error::{ParseError, ParseResult};
use crate::models::{FieldRecord, FileFormat, ImportId, LineKey};

/// Parser for both spreadsheet flavours, selected by format.
#[derive(Debug, Clone, Copy)]
pub struct SpreadsheetParser {
    format: FileFormat,
}

impl SpreadsheetParser {
    /// Legacy binary workbook (BIFF8).
    pub fn legacy() -> Self {
        Self {
            format: FileFormat::Xls,
        }
    }

    /// Office Open XML workbook.
    pub fn modern() -> Self {
        Self {
            format: FileFormat::Xlsx,
        }
    }
}

impl FormatParser for SpreadsheetParser {
    fn format(&self) -> FileFormat {
        self.format
    }

    fn parse<'a>(&self, import_id: ImportId, bytes: &'a [u8]) -> ParseResult<FieldStream<'a>> {
        let cursor = Cursor::new(bytes);
        let workbook = match self.format {
            FileFormat::Xls => Sheets::Xls(
                Xls::new(cursor).map_err(|e| ParseError::Workbook(e.to_string()))?,
            ),
            _ => Sheets::Xlsx(
                Xlsx::new(cursor).map_err(|e| ParseError::Workbook(e.to_string()))?,
            ),
        };

        let sheet_count = workbook.sheet_names().len();
        tracing::debug!(import_id, sheets = sheet_count, format = %self.format, "workbook opened");

        Ok(Box::new(SheetCells {
            import_id,
            workbook,
            sheet_count,
            next_sheet: 0,
            pending: Vec::new().into_iter(),
            done: false,
        }))
    }
}

/// Iterator loading one worksheet at a time.
struct SheetCells<'a> {
    import_id: ImportId,
    workbook: Sheets<Cursor<&'a [u8]>>,
    sheet_count: usize,
    next_sheet: usize,
    pending: std::vec::IntoIter<FieldRecord>,
    done: bool,
}

impl Iterator for SheetCells<'_> {
    type Item = ParseResult<FieldRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                return Some(Ok(record));
            }
            if self.done || self.next_sheet >= self.sheet_count {
                return None;
            }

            let index = self.next_sheet;
            self.next_sheet += 1;
            let sheet = index as u32 + 1;

            match self.workbook.worksheet_range_at(index) {
                None => continue,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(ParseError::source_read(
                        0,
                        format!("cannot read sheet {}: {}", sheet, e),
                    )));
                }
                Some(Ok(range)) => {
                    self.pending = sheet_records(self.import_id, sheet, &range).into_iter();
                }
            }
        }
    }
}

/// Records of one worksheet, in row then column order.
pub(crate) fn sheet_records(import_id: ImportId, sheet: u32, range: &Range<Data>) -> Vec<FieldRecord> {
    let (row0, col0) = match range.start() {
        Some(start) => start,
        None => return Vec::new(),
    };

    let mut records = Vec::new();
    for (r, c, cell) in range.used_cells() {
        let line = row0 + r as u32 + 1;
        let column = col0 + c as u32 + 1;
        match render_cell(cell) {
            Ok(Some(value)) => {
                if let Some(record) =
                    FieldRecord::new(import_id, LineKey::new(sheet, line), column_label(column), &value)
                {
                    records.push(record);
                }
            }
            Ok(None) => {}
            Err(reason) => {
                tracing::warn!(
                    import_id,
                    sheet,
                    line,
                    field = %column_label(column),
                    %reason,
                    "skipping malformed cell"
                );
            }
        }
    }
    records
}

/// Text of a cell; `Err` for error cells.
fn render_cell(cell: &Data) -> Result<Option<String>, String> {
    match cell {
        Data::Empty => Ok(None),
        Data::String(s) => Ok(Some(s.clone())),
        Data::Int(i) => Ok(Some(i.to_string())),
        Data::Float(f) => Ok(Some(format_number(*f))),
        Data::Bool(b) => Ok(Some(b.to_string())),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => {
                Ok(Some(dt.date().format("%Y-%m-%d").to_string()))
            }
            Some(dt) => Ok(Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string())),
            None => Err(format!("invalid date serial {}", cell)),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Ok(Some(s.clone())),
        Data::Error(e) => Err(format!("error cell {}", e)),
    }
}

/// Integral floats render without a fractional part (`12.0 -> "12"`).
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
