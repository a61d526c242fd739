//! File readers: raw bytes -> row matrix (`Vec<Vec<String>>`, header row first).
//!
//! Both readers buffer the whole input, perform no entity construction and fail
//! with `EmptyFile` unless there is a header plus at least one data row.

use crate::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

pub type RowMatrix = Vec<Vec<String>>;

/// Input formats, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Delimited,
    Spreadsheet,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> ImportResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" | "tsv" | "txt" => Ok(FileFormat::Delimited),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(FileFormat::Spreadsheet),
            _ => Err(ImportError::UnsupportedFormat(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )),
        }
    }
}

/// Read `bytes` according to `format`.
pub fn read_rows(bytes: &[u8], format: FileFormat) -> ImportResult<RowMatrix> {
    match format {
        FileFormat::Delimited => read_delimited(bytes),
        FileFormat::Spreadsheet => read_spreadsheet(bytes),
    }
}

// =============================================================================
// DELIMITED TEXT
// =============================================================================

/// Decode as UTF-8 (dropping a BOM), falling back to Windows-1252.
pub fn decode_text(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            debug!("input is not UTF-8; decoded as windows-1252");
            decoded.into_owned()
        }
    };
    match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    }
}

/// Tab wins only when the first line has strictly more tabs than commas.
pub fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    let tabs = first_line.matches('\t').count();
    let commas = first_line.matches(',').count();
    if tabs > commas {
        b'\t'
    } else {
        b','
    }
}

pub fn read_delimited(bytes: &[u8]) -> ImportResult<RowMatrix> {
    let text = decode_text(bytes);
    let delimiter = sniff_delimiter(&text);
    debug!(
        "delimiter: {}",
        if delimiter == b'\t' { "tab" } else { "comma" }
    );

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .quoting(true)
        .double_quote(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
    }

    ensure_data_rows(rows)
}

// =============================================================================
// SPREADSHEET
// =============================================================================

/// Render one spreadsheet cell the way the text readers would have produced it.
/// Date cells become their serial day count, which the date parser understands.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => format_float(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format_float(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Read the first sheet of an xlsx/xlsm/xlsb/xls/ods workbook.
pub fn read_spreadsheet(bytes: &[u8]) -> ImportResult<RowMatrix> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names.first().ok_or(ImportError::NoSheets)?;
    info!(
        "reading sheet '{}' (first of {} sheets)",
        sheet_name,
        sheet_names.len()
    );

    let range = workbook.worksheet_range(sheet_name)?;
    let (row_count, col_count) = range.get_size();
    debug!("sheet size: {} rows x {} columns", row_count, col_count);

    let rows: RowMatrix = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    ensure_data_rows(rows)
}

fn ensure_data_rows(rows: RowMatrix) -> ImportResult<RowMatrix> {
    if rows.len() < 2 {
        return Err(ImportError::EmptyFile { rows: rows.len() });
    }
    Ok(rows)
}
