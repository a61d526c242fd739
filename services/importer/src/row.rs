//! Row parser: one row of string cells -> partner, customer, product and usage fact.
//!
//! Parsing is pure; callers log and count rejections. Which failures reject a row
//! and which fall back to defaults is decided by `OnParseFailure`:
//!
//! | cell                | SubstituteDefault | RejectRow |
//! |---------------------|-------------------|-----------|
//! | empty natural key   | reject            | reject    |
//! | bad number          | 0.0               | reject    |
//! | bad/empty usage date| today             | reject    |
//! | bad charge date     | empty             | reject    |

use crate::config::OnParseFailure;
use crate::error::{RowError, RowRejected};
use crate::headers::ColumnMap;
use crate::models::{Customer, ParsedRow, Partner, Product, UnresolvedFact, UsageLine};
use crate::values::{parse_date, parse_number};
use chrono::{NaiveDate, Utc};

#[derive(Debug, Clone)]
pub struct RowParser {
    columns: ColumnMap,
    on_failure: OnParseFailure,
    /// Substitute for unparsable usage dates; fixed per run so every row agrees.
    fallback_date: NaiveDate,
}

impl RowParser {
    pub fn new(columns: ColumnMap, on_failure: OnParseFailure) -> Self {
        Self {
            columns,
            on_failure,
            fallback_date: Utc::now().date_naive(),
        }
    }

    /// Override the date used when a usage date cannot be parsed.
    pub fn with_fallback_date(mut self, date: NaiveDate) -> Self {
        self.fallback_date = date;
        self
    }

    /// Parse one data row. `row_num` is the 1-based line number used in diagnostics.
    pub fn parse(&self, record: &[String], row_num: usize) -> Result<ParsedRow, RowRejected> {
        self.parse_inner(record, row_num)
            .map_err(|reason| RowRejected { row: row_num, reason })
    }

    fn parse_inner(&self, record: &[String], row_num: usize) -> Result<ParsedRow, RowError> {
        let get = |field: &str| self.columns.cell(record, field);

        let partner_key = required(get("partner_id"), "partner_id")?;
        let customer_key = required(get("customer_id"), "customer_id")?;
        let product_key = required(get("product_id"), "product_id")?;

        let usage_date = match parse_date(get("usage_date")) {
            Some(date) => date,
            None => self.fallback(
                self.fallback_date,
                RowError::InvalidDate {
                    field: "usage_date",
                    value: get("usage_date").to_string(),
                },
            )?,
        };

        let charge_start_raw = get("charge_start_date");
        let charge_start_date = if charge_start_raw.is_empty() {
            None
        } else {
            match parse_date(charge_start_raw) {
                Some(date) => Some(date),
                None => self.fallback(
                    None,
                    RowError::InvalidDate {
                        field: "charge_start_date",
                        value: charge_start_raw.to_string(),
                    },
                )?,
            }
        };

        let quantity = self.number(get("quantity"), "quantity")?;
        let unit_price = self.number(get("unit_price"), "unit_price")?;
        let billing_pre_tax_total =
            self.number(get("billing_pre_tax_total"), "billing_pre_tax_total")?;

        let partner = Partner {
            partner_id: partner_key.clone(),
            partner_name: get("partner_name").to_string(),
            mpn_id: get("mpn_id").to_string(),
            tier2_mpn_id: get("tier2_mpn_id").to_string(),
        };

        let customer = Customer {
            customer_id: customer_key.clone(),
            customer_name: get("customer_name").to_string(),
            customer_domain_name: get("customer_domain_name").to_string(),
            country: get("country").to_string(),
        };

        let product = Product {
            product_id: product_key.clone(),
            sku_id: get("sku_id").to_string(),
            sku_name: get("sku_name").to_string(),
            product_name: get("product_name").to_string(),
            meter_type: get("meter_type").to_string(),
            category: get("category").to_string(),
            sub_category: get("sub_category").to_string(),
            unit_type: get("unit_type").to_string(),
        };

        let fact = UnresolvedFact {
            partner_key,
            customer_key,
            product_key,
            row: row_num,
            line: UsageLine {
                invoice_number: get("invoice_number").to_string(),
                charge_start_date,
                usage_date,
                quantity,
                unit_price,
                billing_pre_tax_total,
                resource_location: get("resource_location").to_string(),
                tags: get("tags").to_string(),
                benefit_type: get("benefit_type").to_string(),
            },
        };

        Ok(ParsedRow {
            partner,
            customer,
            product,
            fact,
        })
    }

    fn number(&self, raw: &str, field: &'static str) -> Result<f64, RowError> {
        match parse_number(raw) {
            Some(value) => Ok(value),
            None => self.fallback(
                0.0,
                RowError::InvalidNumber {
                    field,
                    value: raw.to_string(),
                },
            ),
        }
    }

    fn fallback<T>(&self, default: T, error: RowError) -> Result<T, RowError> {
        match self.on_failure {
            OnParseFailure::SubstituteDefault => {
                tracing::debug!("{}; using default", error);
                Ok(default)
            }
            OnParseFailure::RejectRow => Err(error),
        }
    }
}

fn required(value: &str, field: &'static str) -> Result<String, RowError> {
    if value.is_empty() {
        Err(RowError::MissingRequiredField(field))
    } else {
        Ok(value.to_string())
    }
}

/// True when every cell is blank; such rows are skipped, not rejected.
pub fn is_blank(record: &[String]) -> bool {
    record.iter().all(|cell| cell.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeaderMode;

    const HEADER: &[&str] = &[
        "Partner Id", "Partner Name", "Customer Id", "Customer Name", "Country",
        "Product Id", "Product Name", "Meter Category", "Usage Date", "Charge Start Date",
        "Quantity", "Unit Price", "Billing Pre Tax Total", "Resource Location", "Invoice Number",
    ];

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn parser(on_failure: OnParseFailure) -> RowParser {
        let columns = ColumnMap::from_headers(&strings(HEADER), HeaderMode::Strict).unwrap();
        RowParser::new(columns, on_failure)
            .with_fallback_date(NaiveDate::from_ymd_opt(2030, 6, 1).unwrap())
    }

    fn row(overrides: &[(usize, &str)]) -> Vec<String> {
        let mut cells = strings(&[
            "P1", "Partner One", "C1", "Customer One", "BR",
            "PR1", "Virtual Machines", "Compute", "2024-01-15", "01/01/2024",
            "2", "19.90", "39,80", "brazilsouth", "INV-001",
        ]);
        for (idx, value) in overrides {
            cells[*idx] = value.to_string();
        }
        cells
    }

    // -------------------------------------------------------------------------
    // HAPPY PATH
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_full_row() {
        let parsed = parser(OnParseFailure::SubstituteDefault).parse(&row(&[]), 2).unwrap();

        assert_eq!(parsed.partner.partner_id, "P1");
        assert_eq!(parsed.partner.partner_name, "Partner One");
        assert_eq!(parsed.customer.country, "BR");
        assert_eq!(parsed.product.category, "Compute");
        assert_eq!(parsed.fact.partner_key, "P1");
        assert_eq!(parsed.fact.customer_key, "C1");
        assert_eq!(parsed.fact.product_key, "PR1");
        assert_eq!(parsed.fact.row, 2);
        assert_eq!(parsed.fact.line.usage_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(parsed.fact.line.charge_start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(parsed.fact.line.quantity, 2.0);
        assert_eq!(parsed.fact.line.unit_price, 19.9);
        assert_eq!(parsed.fact.line.billing_pre_tax_total, 39.8);
        assert_eq!(parsed.fact.line.invoice_number, "INV-001");
    }

    #[test]
    fn test_short_row_yields_empty_optionals() {
        let columns = ColumnMap::from_headers(
            &strings(&["partner_id", "customer_id", "product_id", "usage_date", "quantity", "unit_price", "tags"]),
            HeaderMode::Strict,
        )
        .unwrap();
        let parser = RowParser::new(columns, OnParseFailure::RejectRow);

        let parsed = parser
            .parse(&strings(&["P1", "C1", "PR1", "2024-01-15", "1", "5"]), 2)
            .unwrap();
        assert_eq!(parsed.fact.line.tags, "");
        assert_eq!(parsed.fact.line.charge_start_date, None);
        assert_eq!(parsed.fact.line.billing_pre_tax_total, 0.0);
    }

    // -------------------------------------------------------------------------
    // REQUIRED FIELDS
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_natural_keys_reject_in_both_modes() {
        for mode in [OnParseFailure::SubstituteDefault, OnParseFailure::RejectRow] {
            let parser = parser(mode);

            let err = parser.parse(&row(&[(0, "  ")]), 3).unwrap_err();
            assert_eq!(err.row, 3);
            assert_eq!(err.reason, RowError::MissingRequiredField("partner_id"));

            let err = parser.parse(&row(&[(2, "")]), 4).unwrap_err();
            assert_eq!(err.reason, RowError::MissingRequiredField("customer_id"));

            let err = parser.parse(&row(&[(5, "")]), 5).unwrap_err();
            assert_eq!(err.reason, RowError::MissingRequiredField("product_id"));
        }
    }

    // -------------------------------------------------------------------------
    // PERMISSIVE VS STRICT
    // -------------------------------------------------------------------------

    #[test]
    fn test_permissive_defaults_bad_numbers_to_zero() {
        let parsed = parser(OnParseFailure::SubstituteDefault)
            .parse(&row(&[(10, "lots"), (11, "n/a")]), 2)
            .unwrap();
        assert_eq!(parsed.fact.line.quantity, 0.0);
        assert_eq!(parsed.fact.line.unit_price, 0.0);
    }

    #[test]
    fn test_strict_rejects_bad_number() {
        let err = parser(OnParseFailure::RejectRow)
            .parse(&row(&[(10, "lots")]), 7)
            .unwrap_err();
        assert_eq!(
            err.reason,
            RowError::InvalidNumber { field: "quantity", value: "lots".to_string() }
        );
    }

    #[test]
    fn test_permissive_substitutes_usage_date() {
        let parsed = parser(OnParseFailure::SubstituteDefault)
            .parse(&row(&[(8, "not a date")]), 2)
            .unwrap();
        assert_eq!(parsed.fact.line.usage_date, NaiveDate::from_ymd_opt(2030, 6, 1).unwrap());
    }

    #[test]
    fn test_strict_rejects_usage_date() {
        let err = parser(OnParseFailure::RejectRow)
            .parse(&row(&[(8, "not a date")]), 9)
            .unwrap_err();
        assert_eq!(err.to_string(), "row 9: invalid date for usage_date: 'not a date'");
    }

    #[test]
    fn test_bad_charge_start_date() {
        let parsed = parser(OnParseFailure::SubstituteDefault)
            .parse(&row(&[(9, "soon")]), 2)
            .unwrap();
        assert_eq!(parsed.fact.line.charge_start_date, None);

        assert!(parser(OnParseFailure::RejectRow).parse(&row(&[(9, "soon")]), 2).is_err());
    }

    #[test]
    fn test_serial_usage_date_is_not_a_failure() {
        let parsed = parser(OnParseFailure::RejectRow)
            .parse(&row(&[(8, "45000")]), 2)
            .unwrap();
        assert_eq!(parsed.fact.line.usage_date, NaiveDate::from_ymd_opt(2023, 3, 15).unwrap());
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(&strings(&["", "  ", "\t"])));
        assert!(is_blank(&[]));
        assert!(!is_blank(&strings(&["", "x"])));
    }
}
