//! Row fan-out and the deduplicating aggregator.
//!
//! `parse_rows` is the only parallel section of the pipeline: a rayon pool parses
//! rows against the shared, read-only column map and hands back outcomes in file
//! order. The `Aggregator` then consumes them on a single thread, so first-write-wins
//! is decided by row position and never by thread scheduling.

use crate::config::MAX_WORKERS;
use crate::error::RowRejected;
use crate::models::{Customer, ParsedRow, Partner, Product, UnresolvedFact};
use crate::row::{is_blank, RowParser};
use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

/// Result of parsing one data row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Blank,
    Parsed(Box<ParsedRow>),
    Rejected(RowRejected),
}

/// Parse every data row (header excluded). Row numbers are 1-based file lines, so
/// the first data row is row 2.
pub fn parse_rows(parser: &RowParser, rows: &[Vec<String>], workers: usize) -> Vec<RowOutcome> {
    let parse_one = |(idx, record): (usize, &Vec<String>)| {
        if is_blank(record) {
            return RowOutcome::Blank;
        }
        match parser.parse(record, idx + 2) {
            Ok(parsed) => RowOutcome::Parsed(Box::new(parsed)),
            Err(rejected) => RowOutcome::Rejected(rejected),
        }
    };

    let workers = workers.clamp(1, MAX_WORKERS).min(rows.len().max(1));
    if workers == 1 {
        return rows.iter().enumerate().map(parse_one).collect();
    }

    match ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|idx| format!("row-parser-{idx}"))
        .build()
    {
        Ok(pool) => {
            debug!("parsing {} rows on {} threads", rows.len(), workers);
            pool.install(|| rows.par_iter().enumerate().map(parse_one).collect())
        }
        Err(e) => {
            warn!("row-parser pool unavailable ({}); parsing sequentially", e);
            rows.iter().enumerate().map(parse_one).collect()
        }
    }
}

/// Distinct entities and facts ready for one loader call.
#[derive(Debug, Default, Clone)]
pub struct ImportBatch {
    pub partners: Vec<Partner>,
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub facts: Vec<UnresolvedFact>,
}

/// Running totals across the whole file, unaffected by batch draining.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateStats {
    pub rows_read: usize,
    pub blank_rows: usize,
    pub rejected_rows: usize,
    pub facts_parsed: usize,
    pub partners: usize,
    pub customers: usize,
    pub products: usize,
}

/// Entity maps hold the first value seen per natural key for the whole run and
/// are never cleared; only the fact list is per batch.
#[derive(Debug, Default)]
pub struct Aggregator {
    partners: IndexMap<String, Partner>,
    customers: IndexMap<String, Customer>,
    products: IndexMap<String, Product>,
    facts: Vec<UnresolvedFact>,
    stats: AggregateStats,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, outcome: RowOutcome) {
        self.stats.rows_read += 1;
        match outcome {
            RowOutcome::Blank => self.stats.blank_rows += 1,
            RowOutcome::Rejected(rejected) => {
                warn!("{}", rejected);
                self.stats.rejected_rows += 1;
            }
            RowOutcome::Parsed(parsed) => self.accept(*parsed),
        }
    }

    fn accept(&mut self, parsed: ParsedRow) {
        let ParsedRow {
            partner,
            customer,
            product,
            fact,
        } = parsed;

        self.partners
            .entry(partner.partner_id.clone())
            .or_insert(partner);
        self.customers
            .entry(customer.customer_id.clone())
            .or_insert(customer);
        self.products
            .entry(product.product_id.clone())
            .or_insert(product);

        self.facts.push(fact);
        self.stats.facts_parsed += 1;
    }

    /// Facts accumulated since the last drain.
    pub fn pending_facts(&self) -> usize {
        self.facts.len()
    }

    /// Hand over the facts accumulated since the last drain, together with the
    /// run-wide first value of every entity those facts reference, in order of
    /// first reference within the batch.
    pub fn drain_batch(&mut self) -> ImportBatch {
        let facts = std::mem::take(&mut self.facts);

        let (partners, customers, products) = {
            let mut partner_keys = IndexSet::new();
            let mut customer_keys = IndexSet::new();
            let mut product_keys = IndexSet::new();
            for fact in &facts {
                partner_keys.insert(fact.partner_key.as_str());
                customer_keys.insert(fact.customer_key.as_str());
                product_keys.insert(fact.product_key.as_str());
            }
            (
                referenced(&self.partners, &partner_keys),
                referenced(&self.customers, &customer_keys),
                referenced(&self.products, &product_keys),
            )
        };

        ImportBatch {
            partners,
            customers,
            products,
            facts,
        }
    }

    pub fn stats(&self) -> AggregateStats {
        AggregateStats {
            partners: self.partners.len(),
            customers: self.customers.len(),
            products: self.products.len(),
            ..self.stats.clone()
        }
    }
}

fn referenced<T: Clone>(entities: &IndexMap<String, T>, keys: &IndexSet<&str>) -> Vec<T> {
    keys.iter()
        .filter_map(|key| entities.get(*key).cloned())
        .collect()
}
