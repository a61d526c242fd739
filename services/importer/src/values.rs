//! Cell value parsing shared by every file format.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

/// Day zero of spreadsheet serial dates (accounts for the 1900 leap-year bug).
const SERIAL_DATE_BASE: (i32, u32, u32) = (1899, 12, 30);

/// Date-only layouts, tried in order.
const DATE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%d/%m/%y",
    "%d-%m-%y",
    "%m/%d/%y",
    "%m-%d-%y",
];

/// Date-and-time layouts, tried after the date-only ones; the time is discarded.
const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parse a number written with either `.` or `,` as decimal separator.
///
/// Everything outside `[0-9.,+-]` is dropped, `,` becomes `.`, and when several
/// dots remain only the last one is kept as the decimal point. Empty input is 0.
/// Returns `None` when nothing numeric is left to parse.
pub fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(0.0);
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '+' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let normalized = match cleaned.rfind('.') {
        Some(last) if cleaned[..last].contains('.') => {
            let (int_part, frac_part) = cleaned.split_at(last);
            format!("{}{}", int_part.replace('.', ""), frac_part)
        }
        _ => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a calendar date from the supported textual layouts, falling back to a
/// spreadsheet serial day count. Times of day are dropped.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DATE_LAYOUTS
        .iter()
        .find_map(|layout| {
            NaiveDate::parse_from_str(raw, layout)
                .ok()
                .filter(plausible_year)
        })
        .or_else(|| {
            DATETIME_LAYOUTS.iter().find_map(|layout| {
                NaiveDateTime::parse_from_str(raw, layout)
                    .ok()
                    .map(|dt| dt.date())
                    .filter(plausible_year)
            })
        })
        .or_else(|| parse_serial_date(raw))
}

/// Interpret `raw` as a spreadsheet serial: whole days since 1899-12-30.
pub fn parse_serial_date(raw: &str) -> Option<NaiveDate> {
    let serial: f64 = raw.trim().parse().ok()?;
    if !serial.is_finite() {
        return None;
    }
    let (y, m, d) = SERIAL_DATE_BASE;
    let base = NaiveDate::from_ymd_opt(y, m, d)?;
    base.checked_add_signed(Duration::try_days(serial.trunc() as i64)?)
}

/// Four-digit layouts also accept short years ("24" as year 24); those belong to
/// the two-digit layouts instead.
fn plausible_year(date: &NaiveDate) -> bool {
    date.year() >= 1000
}
