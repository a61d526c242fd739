//! Header normalization: raw column labels -> canonical field names -> column index.
//!
//! A label is trimmed, lower-cased and stripped of spaces, underscores and hyphens,
//! then looked up in `ALIASES`. Unknown tokens become their own canonical name, so
//! extra columns never fail an import; only the six `REQUIRED_COLUMNS` are checked.

use crate::config::HeaderMode;
use crate::error::{ImportError, ImportResult};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Canonical fields every file must provide.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "partner_id",
    "customer_id",
    "product_id",
    "usage_date",
    "quantity",
    "unit_price",
];

/// Normalized token -> canonical field name.
const ALIASES: &[(&str, &str)] = &[
    // partner
    ("partnerid", "partner_id"),
    ("partnername", "partner_name"),
    ("mpnid", "mpn_id"),
    ("tier2mpnid", "tier2_mpn_id"),
    ("tier2mpn", "tier2_mpn_id"),
    // customer
    ("customerid", "customer_id"),
    ("customername", "customer_name"),
    ("customerdomainname", "customer_domain_name"),
    ("customerdomain", "customer_domain_name"),
    ("customercountry", "country"),
    // product
    ("productid", "product_id"),
    ("skuid", "sku_id"),
    ("skuname", "sku_name"),
    ("productname", "product_name"),
    ("metertype", "meter_type"),
    ("metercategory", "category"),
    ("metersubcategory", "sub_category"),
    ("subcategory", "sub_category"),
    ("unittype", "unit_type"),
    // usage
    ("invoicenumber", "invoice_number"),
    ("chargestartdate", "charge_start_date"),
    ("usagedate", "usage_date"),
    ("quantity", "quantity"),
    ("qty", "quantity"),
    ("unitprice", "unit_price"),
    ("billingpretaxtotal", "billing_pre_tax_total"),
    ("resourcelocation", "resource_location"),
    ("tags", "tags"),
    ("benefittype", "benefit_type"),
    // extended billing export columns, recognised but not persisted
    ("availabilityid", "availability_id"),
    ("publishername", "publisher_name"),
    ("publisherid", "publisher_id"),
    ("subscriptiondescription", "subscription_description"),
    ("subscriptionid", "subscription_id"),
    ("chargeenddate", "charge_end_date"),
    ("meterid", "meter_id"),
    ("metername", "meter_name"),
    ("meterregion", "meter_region"),
    ("unit", "unit"),
    ("consumedservice", "consumed_service"),
    ("resourcegroup", "resource_group"),
    ("resourceuri", "resource_uri"),
    ("chargetype", "charge_type"),
    ("billingcurrency", "billing_currency"),
    ("pricingpretaxtotal", "pricing_pre_tax_total"),
    ("pricingcurrency", "pricing_currency"),
    ("serviceinfo1", "service_info1"),
    ("serviceinfo2", "service_info2"),
    ("additionalinfo", "additional_info"),
    ("effectiveunitprice", "effective_unit_price"),
    ("pctobcexchangerate", "pc_to_bc_exchange_rate"),
    ("pctobcexchangeratedate", "pc_to_bc_exchange_rate_date"),
    ("entitlementid", "entitlement_id"),
    ("entitlementdescription", "entitlement_description"),
    ("partnerearnedcreditpercentage", "partner_earned_credit_percentage"),
    ("creditpercentage", "credit_percentage"),
    ("credittype", "credit_type"),
    ("benefitorderid", "benefit_order_id"),
    ("benefitid", "benefit_id"),
];

/// Substring hints used by `HeaderMode::BestEffort`, most specific first.
const FUZZY_HINTS: &[(&str, &[&str])] = &[
    ("partner_id", &["partner"]),
    ("customer_id", &["customer"]),
    ("product_id", &["product"]),
    ("usage_date", &["usagedate", "date"]),
    ("quantity", &["quantity", "qty"]),
    ("unit_price", &["unitprice", "price"]),
];

/// Lower-case and drop whitespace, underscores and hyphens.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .collect()
}

/// Canonical field name for a raw header label.
pub fn canonical_name(raw: &str) -> String {
    let token = normalize_header(raw);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == token)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(token)
}

/// Canonical field name -> column index for one file.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: HashMap<String, usize>,
}

impl ColumnMap {
    /// Resolve a header row. Fails with `MissingColumns` listing every absent
    /// required field together with every header that was offered.
    pub fn from_headers(headers: &[String], mode: HeaderMode) -> ImportResult<Self> {
        let mut columns: HashMap<String, usize> = HashMap::new();
        let mut tokens: Vec<(usize, String, bool)> = Vec::with_capacity(headers.len());

        for (idx, raw) in headers.iter().enumerate() {
            let token = normalize_header(raw);
            if token.is_empty() {
                continue;
            }
            let canonical = canonical_name(raw);
            let via_alias = canonical != token;
            debug!("column '{}' -> '{}' -> '{}' (index {})", raw, token, canonical, idx);

            if let Some(first) = columns.get(&canonical) {
                warn!(
                    "duplicate column '{}' at index {} ignored; keeping index {}",
                    canonical, idx, first
                );
            } else {
                columns.insert(canonical, idx);
            }
            tokens.push((idx, token, via_alias));
        }

        let mut map = ColumnMap { columns };

        if mode == HeaderMode::BestEffort {
            map.fuzzy_fill(&tokens);
        }

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| !map.columns.contains_key(**name))
            .map(|name| name.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(ImportError::MissingColumns {
                missing,
                available: headers
                    .iter()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .collect(),
            });
        }

        Ok(map)
    }

    /// Bind still-missing required fields to headers that contain a hint.
    /// Headers the alias table did not recognise are preferred; a column already
    /// bound to a required field is never reused.
    fn fuzzy_fill(&mut self, tokens: &[(usize, String, bool)]) {
        for (field, hints) in FUZZY_HINTS {
            if self.columns.contains_key(*field) {
                continue;
            }

            let taken: Vec<usize> = REQUIRED_COLUMNS
                .iter()
                .filter_map(|name| self.columns.get(*name).copied())
                .collect();

            let candidate = hints.iter().find_map(|hint| {
                let mut matching = tokens
                    .iter()
                    .filter(|(idx, token, _)| !taken.contains(idx) && token.contains(hint));
                let unknown = matching.clone().find(|(_, _, via_alias)| !via_alias);
                unknown.or_else(|| matching.next())
            });

            if let Some((idx, token, _)) = candidate {
                warn!(
                    "best-effort header match: '{}' used as {} (index {})",
                    token, field, idx
                );
                self.columns.insert(field.to_string(), *idx);
            }
        }
    }

    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Trimmed cell for `field`, or "" when the column is absent or the row is short.
    pub fn cell<'r>(&self, row: &'r [String], field: &str) -> &'r str {
        self.index_of(field)
            .and_then(|idx| row.get(idx))
            .map(|cell| cell.trim())
            .unwrap_or("")
    }

    /// Number of canonical fields bound to a column.
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }
}
