//! Environment configuration and per-run import options.

use anyhow::{Context, Result};

/// Upper bound on row-parsing threads regardless of configuration.
pub const MAX_WORKERS: usize = 8;

/// How header spellings are matched to required canonical fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMode {
    /// Alias table only.
    #[default]
    Strict,
    /// Alias table, then substring matching for whatever is still missing.
    BestEffort,
}

/// What the row parser does when a number or date cell cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnParseFailure {
    /// Numbers become 0, usage dates become today, charge-start dates become empty.
    #[default]
    SubstituteDefault,
    /// The row is rejected.
    RejectRow,
}

/// Whether the store is purged before the first batch is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    #[default]
    Append,
    Replace,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub header_mode: HeaderMode,
    pub on_parse_failure: OnParseFailure,
    pub load_mode: LoadMode,
    /// Row-parsing threads; 1 parses on the calling thread.
    pub workers: usize,
    /// Facts per load batch; 0 loads the whole file as one batch.
    pub batch_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            header_mode: HeaderMode::default(),
            on_parse_failure: OnParseFailure::default(),
            load_mode: LoadMode::default(),
            workers: 1,
            batch_size: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: Option<String>,
    pub max_connections: u32,
    pub workers: usize,
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl Config {
    /// Reads `DB_URL` (or `DATABASE_URL`), `DB_MAX_CONNECTIONS`, `IMPORT_WORKERS`,
    /// `IMPORT_TIMEOUT_SECS` and `IMPORT_BATCH_SIZE`.
    pub fn from_env() -> Result<Self> {
        let db_url = std::env::var("DB_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();

        Ok(Self {
            db_url,
            max_connections: env_number("DB_MAX_CONNECTIONS", 5)?,
            workers: env_number::<usize>("IMPORT_WORKERS", 4)?.clamp(1, MAX_WORKERS),
            timeout_secs: env_number("IMPORT_TIMEOUT_SECS", 600)?,
            batch_size: env_number("IMPORT_BATCH_SIZE", 0)?,
        })
    }

    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url
            .as_deref()
            .context("DB_URL env var missing (DATABASE_URL is also accepted)")
    }
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", key, raw)),
        _ => Ok(default),
    }
}
