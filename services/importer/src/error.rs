//! Error taxonomy for the import pipeline.
//!
//! - `ImportError`: terminal, aborts the whole import (structural, schema, storage)
//! - `RowError`: rejects a single data row, counted and logged, never propagated
//! - `StoreError`: raised by the storage collaborator

use thiserror::Error;

/// Terminal errors. Any of these ends the import before (or instead of) a summary.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file has {rows} row(s); need a header row and at least one data row")]
    EmptyFile { rows: usize },

    #[error("workbook has no sheets")]
    NoSheets,

    #[error("unsupported file type '{0}'; use .csv, .tsv, .txt, .xlsx, .xlsm, .xlsb, .xls or .ods")]
    UnsupportedFormat(String),

    #[error("malformed delimited file: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error(
        "missing required column(s): {}. Available headers: {}",
        missing.join(", "),
        available.join(", ")
    )]
    MissingColumns {
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("import cancelled")]
    Cancelled,

    #[error("import timed out after {0}s")]
    TimedOut(u64),
}

/// Why a single data row was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("{0} is required")]
    MissingRequiredField(&'static str),

    #[error("invalid number for {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid date for {field}: '{value}'")]
    InvalidDate { field: &'static str, value: String },
}

/// A rejected row together with its 1-based position in the file.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("row {row}: {reason}")]
pub struct RowRejected {
    pub row: usize,
    pub reason: RowError,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("import session already committed")]
    NoSession,

    #[error("{0}")]
    Rejected(String),
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;
