//! Storage collaborator used by the loader.
//!
//! A store hands out one `ImportSession` per batch. A session is one unit of work:
//! nothing it writes is visible until `commit`, and dropping it uncommitted
//! discards everything (including a purge).

use crate::error::StoreError;
use crate::models::{Customer, Fact, Partner, Product};
use async_trait::async_trait;
use serde::Serialize;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::{PgImportSession, PgStore};

/// Row counts per table, used for post-import reporting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub partners: i64,
    pub customers: i64,
    pub products: i64,
    pub usages: i64,
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    type Session: ImportSession;

    async fn begin(&self) -> Result<Self::Session, StoreError>;

    async fn table_counts(&self) -> Result<TableCounts, StoreError>;
}

#[async_trait]
pub trait ImportSession: Send {
    /// Delete every usage, product, customer and partner, in that order.
    async fn purge_all(&mut self) -> Result<(), StoreError>;

    /// Insert or update by `partner_id`; returns the surrogate id.
    /// A failure leaves the session usable for further calls.
    async fn upsert_partner(&mut self, partner: &Partner) -> Result<i64, StoreError>;

    async fn upsert_customer(&mut self, customer: &Customer) -> Result<i64, StoreError>;

    async fn upsert_product(&mut self, product: &Product) -> Result<i64, StoreError>;

    /// Set-oriented insert of resolved facts; all or nothing.
    async fn insert_usages(&mut self, facts: &[Fact]) -> Result<u64, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}
