//! In-memory store for tests. Sessions work on a private copy of the tables and
//! publish it on `commit`, so an uncommitted session leaves no trace.

use super::{ImportSession, ImportStore, TableCounts};
use crate::error::StoreError;
use crate::models::{Customer, Fact, Partner, Product};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub partners: IndexMap<String, (i64, Partner)>,
    pub customers: IndexMap<String, (i64, Customer)>,
    pub products: IndexMap<String, (i64, Product)>,
    pub usages: Vec<Fact>,
    next_id: i64,
}

impl Tables {
    fn counts(&self) -> TableCounts {
        TableCounts {
            partners: self.partners.len() as i64,
            customers: self.customers.len() as i64,
            products: self.products.len() as i64,
            usages: self.usages.len() as i64,
        }
    }
}

/// Failure injection, keyed by natural key or by how many calls the store has
/// already served.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub partners: HashSet<String>,
    pub customers: HashSet<String>,
    pub products: HashSet<String>,
    pub bulk_insert: bool,
    pub bulk_inserts_allowed: Option<usize>,
    pub begins_allowed: Option<usize>,
    pub purge: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<Faults>>,
    begins: Arc<AtomicUsize>,
    bulk_inserts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_partner(&self, key: &str) {
        self.faults.lock().unwrap().partners.insert(key.to_string());
    }

    pub fn fail_customer(&self, key: &str) {
        self.faults.lock().unwrap().customers.insert(key.to_string());
    }

    pub fn fail_product(&self, key: &str) {
        self.faults.lock().unwrap().products.insert(key.to_string());
    }

    pub fn fail_bulk_insert(&self) {
        self.faults.lock().unwrap().bulk_insert = true;
    }

    /// From now on, let `allowed` bulk inserts through, across sessions, and fail the rest.
    pub fn fail_bulk_insert_after(&self, allowed: usize) {
        self.bulk_inserts.store(0, Ordering::SeqCst);
        self.faults.lock().unwrap().bulk_inserts_allowed = Some(allowed);
    }

    /// From now on, let `allowed` sessions open and refuse the rest.
    pub fn fail_begin_after(&self, allowed: usize) {
        self.begins.store(0, Ordering::SeqCst);
        self.faults.lock().unwrap().begins_allowed = Some(allowed);
    }

    /// Sessions opened since the last `fail_begin_after`, or since creation.
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn fail_purge(&self) {
        self.faults.lock().unwrap().purge = true;
    }

    pub fn snapshot(&self) -> Tables {
        self.tables.lock().unwrap().clone()
    }

    pub fn counts(&self) -> TableCounts {
        self.tables.lock().unwrap().counts()
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    type Session = MemorySession;

    async fn begin(&self) -> Result<MemorySession, StoreError> {
        let faults = self.faults.lock().unwrap().clone();
        let served = self.begins.fetch_add(1, Ordering::SeqCst);
        if faults.begins_allowed.is_some_and(|allowed| served >= allowed) {
            return Err(StoreError::Rejected("no more sessions".to_string()));
        }
        Ok(MemorySession {
            staged: Some(self.snapshot()),
            faults,
            bulk_inserts: Arc::clone(&self.bulk_inserts),
            target: Arc::clone(&self.tables),
        })
    }

    async fn table_counts(&self) -> Result<TableCounts, StoreError> {
        Ok(self.counts())
    }
}

pub struct MemorySession {
    staged: Option<Tables>,
    faults: Faults,
    bulk_inserts: Arc<AtomicUsize>,
    target: Arc<Mutex<Tables>>,
}

impl MemorySession {
    fn tables(&mut self) -> Result<&mut Tables, StoreError> {
        self.staged.as_mut().ok_or(StoreError::NoSession)
    }
}

fn upsert<T: Clone>(
    table: &mut IndexMap<String, (i64, T)>,
    next_id: &mut i64,
    key: &str,
    value: &T,
) -> i64 {
    match table.get_mut(key) {
        Some((id, existing)) => {
            *existing = value.clone();
            *id
        }
        None => {
            *next_id += 1;
            table.insert(key.to_string(), (*next_id, value.clone()));
            *next_id
        }
    }
}

#[async_trait]
impl ImportSession for MemorySession {
    async fn purge_all(&mut self) -> Result<(), StoreError> {
        if self.faults.purge {
            return Err(StoreError::Rejected("purge refused".to_string()));
        }
        let tables = self.tables()?;
        tables.usages.clear();
        tables.products.clear();
        tables.customers.clear();
        tables.partners.clear();
        Ok(())
    }

    async fn upsert_partner(&mut self, partner: &Partner) -> Result<i64, StoreError> {
        if self.faults.partners.contains(&partner.partner_id) {
            return Err(StoreError::Rejected(format!("partner {}", partner.partner_id)));
        }
        let tables = self.tables()?;
        Ok(upsert(&mut tables.partners, &mut tables.next_id, &partner.partner_id, partner))
    }

    async fn upsert_customer(&mut self, customer: &Customer) -> Result<i64, StoreError> {
        if self.faults.customers.contains(&customer.customer_id) {
            return Err(StoreError::Rejected(format!("customer {}", customer.customer_id)));
        }
        let tables = self.tables()?;
        Ok(upsert(&mut tables.customers, &mut tables.next_id, &customer.customer_id, customer))
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<i64, StoreError> {
        if self.faults.products.contains(&product.product_id) {
            return Err(StoreError::Rejected(format!("product {}", product.product_id)));
        }
        let tables = self.tables()?;
        Ok(upsert(&mut tables.products, &mut tables.next_id, &product.product_id, product))
    }

    async fn insert_usages(&mut self, facts: &[Fact]) -> Result<u64, StoreError> {
        let served = self.bulk_inserts.fetch_add(1, Ordering::SeqCst);
        if self.faults.bulk_insert
            || self.faults.bulk_inserts_allowed.is_some_and(|allowed| served >= allowed)
        {
            return Err(StoreError::Rejected("bulk insert refused".to_string()));
        }
        let tables = self.tables()?;
        tables.usages.extend_from_slice(facts);
        Ok(facts.len() as u64)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let staged = self.staged.take().ok_or(StoreError::NoSession)?;
        *self.target.lock().unwrap() = staged;
        Ok(())
    }
}
