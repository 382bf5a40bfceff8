//! Cell coercion
//!
//! Turns raw spreadsheet cell strings into typed JSON values according to the
//! declared type of the target field. Nothing here fails: unparseable numbers
//! become `0`, unparseable dates are returned unchanged and unparseable
//! structured values fall back to a comma-separated list. The row validator
//! is the place where bad values are reported.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};

use crate::types::DeclaredType;

static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("valid day/month/year pattern")
});

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Coerce one cell to the in-memory value for its declared type
pub fn coerce_cell(raw: &str, declared: DeclaredType) -> Value {
    match declared {
        DeclaredType::Integer => {
            let n = parse_number(raw).unwrap_or(0.0);
            Value::from(n.trunc() as i64)
        }
        DeclaredType::Decimal => parse_number(raw)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(0)),
        DeclaredType::Dateonly | DeclaredType::Date => coerce_date(raw, declared),
        DeclaredType::Json => coerce_structured(raw),
        _ => Value::String(raw.trim().to_string()),
    }
}

/// Parse a currency-formatted number in Indonesian (`5.450.000,50`) or
/// US (`5,450,000.50`) grouping.
pub fn parse_number(raw: &str) -> Option<f64> {
    let negative = raw.trim_start().starts_with('-');
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let kept = kept.trim_matches(|c| c == '.' || c == ',');
    if kept.is_empty() {
        return None;
    }

    let normalized = normalize_grouping(kept);
    let value: f64 = normalized.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Rewrite grouping/decimal separators to a plain `1234.56` form, deciding
/// the convention from the trailing digits.
fn normalize_grouping(s: &str) -> String {
    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');

    match (last_dot, last_comma) {
        // 5.450.000,50
        (Some(dot), Some(comma)) if comma > dot => s.replace('.', "").replace(',', "."),
        // 5,450,000.50
        (Some(_), Some(_)) => s.replace(',', ""),
        (None, Some(comma)) => {
            let trailing = s.len() - comma - 1;
            if trailing == 3 || s.matches(',').count() > 1 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        (Some(dot), None) => {
            let trailing = s.len() - dot - 1;
            if trailing == 3 || s.matches('.').count() > 1 {
                s.replace('.', "")
            } else {
                s.to_string()
            }
        }
        (None, None) => s.to_string(),
    }
}

/// Normalize a date cell. `DD/MM/YYYY` is read day-first; anything else goes
/// through a list of common layouts. Unrecognized input is returned as-is.
pub fn coerce_date(raw: &str, declared: DeclaredType) -> Value {
    let trimmed = raw.trim();

    if let Some(caps) = DAY_MONTH_YEAR.captures(trimmed) {
        let day: u32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        let year: i32 = caps[3].parse().unwrap_or(0);
        return match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            None => Value::String(raw.to_string()),
        };
    }

    if let Some(timestamp) = parse_timestamp(trimmed) {
        let formatted = match declared {
            DeclaredType::Dateonly => timestamp.date_naive().format("%Y-%m-%d").to_string(),
            _ => timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        return Value::String(formatted);
    }

    match parse_plain_date(trimmed) {
        Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        None => Value::String(raw.to_string()),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub(crate) fn parse_plain_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse `{...}` / `[...]` as JSON, otherwise split on commas
pub fn coerce_structured(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }
    Value::Array(
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| Value::String(part.to_string()))
            .collect(),
    )
}
