//! End-to-end import: bytes -> rows -> column map -> parsed rows -> batches -> store.

use crate::aggregate::{parse_rows, AggregateStats, Aggregator, ImportBatch, RowOutcome};
use crate::config::{ImportOptions, LoadMode};
use crate::error::{ImportError, ImportResult, StoreError};
use crate::headers::ColumnMap;
use crate::loader::{load_batch, load_into, LoadReport};
use crate::readers::{read_rows, FileFormat};
use crate::row::RowParser;
use crate::store::{ImportSession, ImportStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// A file that has been read and parsed but not yet aggregated or loaded.
#[derive(Debug)]
pub struct PreparedFile {
    pub run_id: Uuid,
    pub file_name: String,
    pub content_hash: String,
    pub outcomes: Vec<RowOutcome>,
    started: Instant,
}

/// What one import did. Counts of distinct entities are per file; the load
/// counters add up over every batch.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub file_name: String,
    pub content_hash: String,
    pub dry_run: bool,
    pub rows_read: usize,
    pub blank_rows: usize,
    pub rejected_rows: usize,
    pub partners: usize,
    pub customers: usize,
    pub products: usize,
    pub facts_parsed: usize,
    pub facts_accepted: usize,
    pub facts_dropped: usize,
    pub reference_failures: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
}

impl ImportSummary {
    fn new(
        prepared: &PreparedFile,
        stats: &AggregateStats,
        load: &LoadReport,
        batches: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            run_id: prepared.run_id,
            file_name: prepared.file_name.clone(),
            content_hash: prepared.content_hash.clone(),
            dry_run,
            rows_read: stats.rows_read,
            blank_rows: stats.blank_rows,
            rejected_rows: stats.rejected_rows,
            partners: stats.partners,
            customers: stats.customers,
            products: stats.products,
            facts_parsed: stats.facts_parsed,
            facts_accepted: load.facts_accepted,
            facts_dropped: load.facts_dropped,
            reference_failures: load.reference_failures,
            batches,
            elapsed_ms: prepared.started.elapsed().as_millis() as u64,
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Read and parse a whole file. CPU bound; call from a blocking context.
///
/// Structural and schema errors end here, before any row is parsed.
pub fn prepare(file_name: &str, bytes: &[u8], options: &ImportOptions) -> ImportResult<PreparedFile> {
    let started = Instant::now();
    let run_id = Uuid::new_v4();
    let content_hash = content_hash(bytes);
    info!(
        "import {} of '{}' ({} bytes, {})",
        run_id,
        file_name,
        bytes.len(),
        content_hash
    );

    let format = FileFormat::from_path(Path::new(file_name))?;
    let rows = read_rows(bytes, format)?;

    let (header, data) = rows
        .split_first()
        .ok_or(ImportError::EmptyFile { rows: 0 })?;
    let columns = ColumnMap::from_headers(header, options.header_mode)?;
    info!(
        "{} columns recognised, {} data rows",
        columns.field_count(),
        data.len()
    );

    let parser = RowParser::new(columns, options.on_parse_failure);
    let outcomes = parse_rows(&parser, data, options.workers);

    Ok(PreparedFile {
        run_id,
        file_name: file_name.to_string(),
        content_hash,
        outcomes,
        started,
    })
}

/// Aggregate only; nothing is written.
pub fn dry_run(mut prepared: PreparedFile) -> ImportSummary {
    let mut aggregator = Aggregator::new();
    for outcome in std::mem::take(&mut prepared.outcomes) {
        aggregator.ingest(outcome);
    }
    info!("dry run: {} facts would be loaded", aggregator.pending_facts());
    ImportSummary::new(&prepared, &aggregator.stats(), &LoadReport::default(), 0, true)
}

/// Aggregate and load. With `batch_size > 0` the aggregator is drained every
/// `batch_size` facts. Append mode commits each chunk in its own session. Replace
/// mode purges and loads every chunk in one session and commits once, so a failed
/// chunk leaves the previous contents in place.
pub async fn run_import<S: ImportStore>(
    store: &S,
    mut prepared: PreparedFile,
    options: &ImportOptions,
) -> ImportResult<ImportSummary> {
    let mut aggregator = Aggregator::new();
    let mut sink = BatchSink::new(store, options.load_mode);

    for outcome in std::mem::take(&mut prepared.outcomes) {
        aggregator.ingest(outcome);

        if options.batch_size > 0 && aggregator.pending_facts() >= options.batch_size {
            sink.load(aggregator.drain_batch()).await?;
        }
    }

    if aggregator.pending_facts() > 0 {
        sink.load(aggregator.drain_batch()).await?;
    }
    let (totals, batches) = sink.finish().await?;
    if batches == 0 {
        warn!("no facts to load; store left untouched");
    }

    let summary = ImportSummary::new(&prepared, &aggregator.stats(), &totals, batches, false);
    info!(
        "import {} done: {} facts accepted, {} dropped, {} rows rejected in {} ms",
        summary.run_id,
        summary.facts_accepted,
        summary.facts_dropped,
        summary.rejected_rows,
        summary.elapsed_ms
    );
    Ok(summary)
}

/// Routes drained batches to the store. The replace session is opened on the
/// first batch, so a run with nothing to load never purges.
struct BatchSink<'a, S: ImportStore> {
    store: &'a S,
    mode: LoadMode,
    replace_session: Option<S::Session>,
    totals: LoadReport,
    batches: usize,
}

impl<'a, S: ImportStore> BatchSink<'a, S> {
    fn new(store: &'a S, mode: LoadMode) -> Self {
        Self {
            store,
            mode,
            replace_session: None,
            totals: LoadReport::default(),
            batches: 0,
        }
    }

    async fn load(&mut self, batch: ImportBatch) -> ImportResult<()> {
        self.batches += 1;
        info!(
            "batch {}: {} facts, {} partners, {} customers, {} products",
            self.batches,
            batch.facts.len(),
            batch.partners.len(),
            batch.customers.len(),
            batch.products.len()
        );

        let report = match self.mode {
            LoadMode::Append => load_batch(self.store.begin().await?, batch, false).await?,
            LoadMode::Replace => {
                let purge = self.replace_session.is_none();
                if purge {
                    self.replace_session = Some(self.store.begin().await?);
                }
                let session = self
                    .replace_session
                    .as_mut()
                    .ok_or(ImportError::Storage(StoreError::NoSession))?;
                load_into(session, batch, purge).await?
            }
        };
        self.totals += report;
        Ok(())
    }

    async fn finish(self) -> ImportResult<(LoadReport, usize)> {
        if let Some(mut session) = self.replace_session {
            session.commit().await?;
            info!(
                "replace committed: {} batches, {} facts inserted, {} dropped",
                self.batches, self.totals.facts_accepted, self.totals.facts_dropped
            );
        }
        Ok((self.totals, self.batches))
    }
}

/// Run `import` until it finishes, `timeout` elapses or `cancel` resolves.
/// Whichever comes first wins; the losing import future is dropped, which
/// rolls back any open session.
pub async fn run_cancellable<T, F, C>(import: F, timeout: Duration, cancel: C) -> ImportResult<T>
where
    F: Future<Output = ImportResult<T>>,
    C: Future<Output = ()>,
{
    tokio::select! {
        result = tokio::time::timeout(timeout, import) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(ImportError::TimedOut(timeout.as_secs())),
        },
        _ = cancel => Err(ImportError::Cancelled),
    }
}
