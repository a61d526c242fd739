//! Reference entities and usage facts as they flow through one import run.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Partner, keyed by `partner_id`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partner {
    pub partner_id: String,
    pub partner_name: String,
    pub mpn_id: String,
    pub tier2_mpn_id: String,
}

/// Customer, keyed by `customer_id`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub customer_id: String,
    pub customer_name: String,
    pub customer_domain_name: String,
    pub country: String,
}

/// Product, keyed by `product_id`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub product_id: String,
    pub sku_id: String,
    pub sku_name: String,
    pub product_name: String,
    pub meter_type: String,
    pub category: String,
    pub sub_category: String,
    pub unit_type: String,
}

/// Measures and attributes shared by both stages of a usage fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageLine {
    pub invoice_number: String,
    pub charge_start_date: Option<NaiveDate>,
    pub usage_date: NaiveDate,
    pub quantity: f64,
    pub unit_price: f64,
    pub billing_pre_tax_total: f64,
    pub resource_location: String,
    pub tags: String,
    pub benefit_type: String,
}

/// A usage fact that still references its partner/customer/product by natural key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedFact {
    pub partner_key: String,
    pub customer_key: String,
    pub product_key: String,
    /// 1-based row number in the source file
    pub row: usize,
    pub line: UsageLine,
}

/// A usage fact whose foreign keys are store surrogate ids. Only these are persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fact {
    pub partner_id: i64,
    pub customer_id: i64,
    pub product_id: i64,
    pub line: UsageLine,
}

/// Which reference a fact failed to resolve, with the natural key that missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Partner(String),
    Customer(String),
    Product(String),
}

impl Unresolved {
    pub fn name(&self) -> &'static str {
        match self {
            Unresolved::Partner(_) => "partner",
            Unresolved::Customer(_) => "customer",
            Unresolved::Product(_) => "product",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Unresolved::Partner(key) | Unresolved::Customer(key) | Unresolved::Product(key) => key,
        }
    }
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unresolved {} '{}'", self.name(), self.key())
    }
}

/// Natural key -> surrogate id, one per reference table, built during phase 1.
#[derive(Debug, Default)]
pub struct SurrogateKeys {
    pub partners: HashMap<String, i64>,
    pub customers: HashMap<String, i64>,
    pub products: HashMap<String, i64>,
}

impl UnresolvedFact {
    /// Swap natural keys for surrogate ids; fails on the first key that has no id.
    pub fn resolve(self, keys: &SurrogateKeys) -> Result<Fact, Unresolved> {
        let partner_id = *keys
            .partners
            .get(&self.partner_key)
            .ok_or_else(|| Unresolved::Partner(self.partner_key.clone()))?;
        let customer_id = *keys
            .customers
            .get(&self.customer_key)
            .ok_or_else(|| Unresolved::Customer(self.customer_key.clone()))?;
        let product_id = *keys
            .products
            .get(&self.product_key)
            .ok_or_else(|| Unresolved::Product(self.product_key.clone()))?;

        Ok(Fact {
            partner_id,
            customer_id,
            product_id,
            line: self.line,
        })
    }
}

/// Output of parsing one accepted data row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub partner: Partner,
    pub customer: Customer,
    pub product: Product,
    pub fact: UnresolvedFact,
}
