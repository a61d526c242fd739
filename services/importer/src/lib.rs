//! Billing usage importer.
//!
//! Loads partner/customer/product usage exports (CSV, TSV or spreadsheet) into a
//! relational store:
//! - Read the file into a row matrix
//! - Resolve header spellings to canonical fields
//! - Parse rows in parallel, aggregate on one thread (first occurrence wins)
//! - Upsert reference entities, resolve fact keys, bulk insert facts
//!
//! Data-quality problems are counted and logged; structural and storage problems
//! end the import with an `ImportError`.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod headers;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod readers;
pub mod row;
pub mod store;
pub mod values;

pub use config::{Config, HeaderMode, ImportOptions, LoadMode, OnParseFailure};
pub use error::{ImportError, ImportResult, RowError, RowRejected, StoreError};
pub use pipeline::{dry_run, prepare, run_cancellable, run_import, ImportSummary, PreparedFile};
pub use store::{ImportSession, ImportStore, PgStore, TableCounts};
