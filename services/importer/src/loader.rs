//! Two-phase loader.
//!
//! Phase 1 upserts every distinct reference entity and records its surrogate id;
//! a failed upsert is logged and skipped. Phase 2 resolves each fact's natural keys
//! against those ids, drops what cannot be resolved, and bulk-inserts the rest.
//! Purge (replace mode), upserts and bulk insert share the session, which is
//! committed only when all of them succeeded. `load_into` leaves the commit to
//! the caller so several batches can share one session.

use crate::aggregate::ImportBatch;
use crate::error::ImportResult;
use crate::models::{Fact, SurrogateKeys};
use crate::store::ImportSession;
use serde::Serialize;
use std::ops::AddAssign;
use tracing::{debug, info, warn};

/// Outcome of one loader call.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub partners: usize,
    pub customers: usize,
    pub products: usize,
    pub reference_failures: usize,
    pub facts_accepted: usize,
    pub facts_dropped: usize,
}

impl AddAssign for LoadReport {
    fn add_assign(&mut self, other: Self) {
        self.partners += other.partners;
        self.customers += other.customers;
        self.products += other.products;
        self.reference_failures += other.reference_failures;
        self.facts_accepted += other.facts_accepted;
        self.facts_dropped += other.facts_dropped;
    }
}

/// Load one batch in its own session and commit it.
pub async fn load_batch<S: ImportSession>(
    mut session: S,
    batch: ImportBatch,
    purge: bool,
) -> ImportResult<LoadReport> {
    let report = load_into(&mut session, batch, purge).await?;
    session.commit().await?;

    info!(
        "batch committed: {} facts inserted, {} dropped, {} reference failures",
        report.facts_accepted, report.facts_dropped, report.reference_failures
    );

    Ok(report)
}

/// Load one batch into an open session without committing it.
pub async fn load_into<S: ImportSession>(
    session: &mut S,
    batch: ImportBatch,
    purge: bool,
) -> ImportResult<LoadReport> {
    let mut report = LoadReport::default();

    if purge {
        info!("purging usages, products, customers and partners");
        session.purge_all().await?;
    }

    // Phase 1: reference upserts
    let mut keys = SurrogateKeys::default();

    for partner in &batch.partners {
        match session.upsert_partner(partner).await {
            Ok(id) => {
                keys.partners.insert(partner.partner_id.clone(), id);
                report.partners += 1;
            }
            Err(e) => {
                warn!("partner '{}' upsert failed: {}", partner.partner_id, e);
                report.reference_failures += 1;
            }
        }
    }

    for customer in &batch.customers {
        match session.upsert_customer(customer).await {
            Ok(id) => {
                keys.customers.insert(customer.customer_id.clone(), id);
                report.customers += 1;
            }
            Err(e) => {
                warn!("customer '{}' upsert failed: {}", customer.customer_id, e);
                report.reference_failures += 1;
            }
        }
    }

    for product in &batch.products {
        match session.upsert_product(product).await {
            Ok(id) => {
                keys.products.insert(product.product_id.clone(), id);
                report.products += 1;
            }
            Err(e) => {
                warn!("product '{}' upsert failed: {}", product.product_id, e);
                report.reference_failures += 1;
            }
        }
    }

    debug!(
        "surrogate keys: {} partners, {} customers, {} products",
        keys.partners.len(),
        keys.customers.len(),
        keys.products.len()
    );

    // Phase 2: resolve and bulk insert
    let mut facts: Vec<Fact> = Vec::with_capacity(batch.facts.len());
    for fact in batch.facts {
        let row = fact.row;
        match fact.resolve(&keys) {
            Ok(resolved) => facts.push(resolved),
            Err(unresolved) => {
                warn!("row {}: fact dropped, {}", row, unresolved);
                report.facts_dropped += 1;
            }
        }
    }

    let inserted = session.insert_usages(&facts).await?;
    report.facts_accepted = inserted as usize;

    debug!(
        "batch loaded: {} facts inserted, {} dropped",
        report.facts_accepted, report.facts_dropped
    );

    Ok(report)
}
