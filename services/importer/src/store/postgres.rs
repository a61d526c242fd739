//! Postgres store over `sqlx`. One transaction per import session.

use super::{ImportSession, ImportStore, TableCounts};
use crate::error::StoreError;
use crate::models::{Customer, Fact, Partner, Product};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgArguments, PgConnection};
use sqlx::query::QueryAs;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

const UPSERT_PARTNER: &str = r#"
    INSERT INTO partners (partner_id, partner_name, mpn_id, tier2_mpn_id)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (partner_id) DO UPDATE SET
        partner_name = EXCLUDED.partner_name,
        mpn_id = EXCLUDED.mpn_id,
        tier2_mpn_id = EXCLUDED.tier2_mpn_id,
        updated_at = CURRENT_TIMESTAMP
    RETURNING id::bigint
"#;

const UPSERT_CUSTOMER: &str = r#"
    INSERT INTO customers (customer_id, customer_name, customer_domain_name, country)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (customer_id) DO UPDATE SET
        customer_name = EXCLUDED.customer_name,
        customer_domain_name = EXCLUDED.customer_domain_name,
        country = EXCLUDED.country,
        updated_at = CURRENT_TIMESTAMP
    RETURNING id::bigint
"#;

const UPSERT_PRODUCT: &str = r#"
    INSERT INTO products (product_id, sku_id, sku_name, product_name, meter_type, category, sub_category, unit_type)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (product_id) DO UPDATE SET
        sku_id = EXCLUDED.sku_id,
        sku_name = EXCLUDED.sku_name,
        product_name = EXCLUDED.product_name,
        meter_type = EXCLUDED.meter_type,
        category = EXCLUDED.category,
        sub_category = EXCLUDED.sub_category,
        unit_type = EXCLUDED.unit_type,
        updated_at = CURRENT_TIMESTAMP
    RETURNING id::bigint
"#;

const INSERT_USAGES: &str = r#"
    INSERT INTO usages (invoice_number, charge_start_date, usage_date, quantity, unit_price,
                        billing_pre_tax_total, resource_location, tags, benefit_type,
                        partner_id, customer_id, product_id)
    SELECT * FROM UNNEST(
        $1::text[], $2::date[], $3::date[], $4::float8[], $5::float8[],
        $6::float8[], $7::text[], $8::text[], $9::text[],
        $10::int8[], $11::int8[], $12::int8[]
    )
"#;

/// Facts before parents.
const PURGE_ORDER: &[&str] = &["usages", "products", "customers", "partners"];

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportStore for PgStore {
    type Session = PgImportSession;

    async fn begin(&self) -> Result<PgImportSession, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgImportSession { tx: Some(tx) })
    }

    async fn table_counts(&self) -> Result<TableCounts, StoreError> {
        let (partners, customers, products, usages): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM partners),
                (SELECT COUNT(*) FROM customers),
                (SELECT COUNT(*) FROM products),
                (SELECT COUNT(*) FROM usages)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TableCounts {
            partners,
            customers,
            products,
            usages,
        })
    }
}

/// Open transaction. Dropped without `commit` means rolled back.
pub struct PgImportSession {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgImportSession {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(StoreError::NoSession),
        }
    }
}

/// Run a single-row upsert inside a savepoint so a failure does not abort the
/// enclosing transaction.
async fn upsert_returning_id(
    conn: &mut PgConnection,
    query: QueryAs<'_, Postgres, (i64,), PgArguments>,
) -> Result<i64, StoreError> {
    sqlx::query("SAVEPOINT reference_upsert")
        .execute(&mut *conn)
        .await?;

    match query.fetch_one(&mut *conn).await {
        Ok((id,)) => {
            sqlx::query("RELEASE SAVEPOINT reference_upsert")
                .execute(&mut *conn)
                .await?;
            Ok(id)
        }
        Err(e) => {
            sqlx::query("ROLLBACK TO SAVEPOINT reference_upsert")
                .execute(&mut *conn)
                .await?;
            Err(e.into())
        }
    }
}

#[async_trait]
impl ImportSession for PgImportSession {
    async fn purge_all(&mut self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        for table in PURGE_ORDER {
            let deleted = sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *conn)
                .await?
                .rows_affected();
            debug!("purged {} rows from {}", deleted, table);
        }
        Ok(())
    }

    async fn upsert_partner(&mut self, partner: &Partner) -> Result<i64, StoreError> {
        let query = sqlx::query_as(UPSERT_PARTNER)
            .bind(&partner.partner_id)
            .bind(&partner.partner_name)
            .bind(&partner.mpn_id)
            .bind(&partner.tier2_mpn_id);
        upsert_returning_id(self.conn()?, query).await
    }

    async fn upsert_customer(&mut self, customer: &Customer) -> Result<i64, StoreError> {
        let query = sqlx::query_as(UPSERT_CUSTOMER)
            .bind(&customer.customer_id)
            .bind(&customer.customer_name)
            .bind(&customer.customer_domain_name)
            .bind(&customer.country);
        upsert_returning_id(self.conn()?, query).await
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<i64, StoreError> {
        let query = sqlx::query_as(UPSERT_PRODUCT)
            .bind(&product.product_id)
            .bind(&product.sku_id)
            .bind(&product.sku_name)
            .bind(&product.product_name)
            .bind(&product.meter_type)
            .bind(&product.category)
            .bind(&product.sub_category)
            .bind(&product.unit_type);
        upsert_returning_id(self.conn()?, query).await
    }

    async fn insert_usages(&mut self, facts: &[Fact]) -> Result<u64, StoreError> {
        if facts.is_empty() {
            return Ok(0);
        }

        let columns = UsageColumns::from_facts(facts);
        let result = sqlx::query(INSERT_USAGES)
            .bind(columns.invoice_number)
            .bind(columns.charge_start_date)
            .bind(columns.usage_date)
            .bind(columns.quantity)
            .bind(columns.unit_price)
            .bind(columns.billing_pre_tax_total)
            .bind(columns.resource_location)
            .bind(columns.tags)
            .bind(columns.benefit_type)
            .bind(columns.partner_id)
            .bind(columns.customer_id)
            .bind(columns.product_id)
            .execute(self.conn()?)
            .await?;

        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::NoSession)?;
        tx.commit().await?;
        Ok(())
    }
}

/// Column-major view of a fact slice, one array per `UNNEST` parameter.
#[derive(Default)]
struct UsageColumns {
    invoice_number: Vec<String>,
    charge_start_date: Vec<Option<NaiveDate>>,
    usage_date: Vec<NaiveDate>,
    quantity: Vec<f64>,
    unit_price: Vec<f64>,
    billing_pre_tax_total: Vec<f64>,
    resource_location: Vec<String>,
    tags: Vec<String>,
    benefit_type: Vec<String>,
    partner_id: Vec<i64>,
    customer_id: Vec<i64>,
    product_id: Vec<i64>,
}

impl UsageColumns {
    fn from_facts(facts: &[Fact]) -> Self {
        let mut columns = UsageColumns::default();
        for fact in facts {
            let line = &fact.line;
            columns.invoice_number.push(line.invoice_number.clone());
            columns.charge_start_date.push(line.charge_start_date);
            columns.usage_date.push(line.usage_date);
            columns.quantity.push(line.quantity);
            columns.unit_price.push(line.unit_price);
            columns.billing_pre_tax_total.push(line.billing_pre_tax_total);
            columns.resource_location.push(line.resource_location.clone());
            columns.tags.push(line.tags.clone());
            columns.benefit_type.push(line.benefit_type.clone());
            columns.partner_id.push(fact.partner_id);
            columns.customer_id.push(fact.customer_id);
            columns.product_id.push(fact.product_id);
        }
        columns
    }
}
