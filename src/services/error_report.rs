//! Flat CSV export of accumulated row errors

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::Value;

use crate::types::RowErrors;

const FIXED_COLUMNS: &[&str] = &["row", "field", "message", "value"];

/// One line per (row, field, message), followed by the row's payload
/// fields as extra columns. Every cell is quoted.
pub fn render_error_report(errors: &RowErrors) -> Result<(String, usize)> {
    let payload_keys: BTreeSet<&str> = errors
        .values()
        .filter_map(|e| e.payload.as_object())
        .flat_map(|obj| obj.keys().map(String::as_str))
        .collect();

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    writer.write_record(FIXED_COLUMNS.iter().copied().chain(payload_keys.iter().copied()))?;

    let mut lines = 0;
    for (row, error) in errors {
        for issue in &error.issues {
            let mut record = vec![
                row.to_string(),
                issue.field.clone(),
                issue.message.clone(),
                issue.original_value.clone().unwrap_or_default(),
            ];
            record.extend(payload_keys.iter().map(|key| cell_text(error.payload.get(*key))));
            writer.write_record(&record)?;
            lines += 1;
        }
    }

    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("Failed to finish error report: {}", e))?;
    Ok((String::from_utf8(bytes)?, lines))
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// `debtors.csv` -> `debtors-errors.csv`
pub fn report_file_name(upload_name: &str) -> String {
    let stem = upload_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(upload_name);
    format!("{}-errors.csv", stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImportIssue, RowError};
    use serde_json::json;

    #[test]
    fn test_report_has_one_line_per_issue() {
        let mut errors = RowErrors::new();
        errors.insert(
            2,
            RowError {
                issues: vec![
                    ImportIssue::error(2, "firstName", "Required"),
                    ImportIssue::error(2, "email", "Invalid email address").with_value(Some("budi@".to_string())),
                ],
                payload: json!({ "email": "budi@", "notes": "said \"call later\"" }),
            },
        );
        errors.insert(
            4,
            RowError {
                issues: vec![ImportIssue::error(4, "nationalId", "nationalId '317' already exists")],
                payload: json!({ "nationalId": "317", "mobilePhones": ["0812"] }),
            },
        );

        let (csv, lines) = render_error_report(&errors).unwrap();
        assert_eq!(lines, 3);

        let rows: Vec<&str> = csv.lines().collect();
        assert_eq!(
            rows[0],
            r#""row","field","message","value","email","mobilePhones","nationalId","notes""#
        );
        assert_eq!(
            rows[2],
            r##""2","email","Invalid email address","budi@","budi@","","","said ""call later"""##
        );
        assert!(rows[3].contains(r#""[""0812""]""#));
    }

    #[test]
    fn test_empty_report_has_header_only() {
        let (csv, lines) = render_error_report(&RowErrors::new()).unwrap();
        assert_eq!(lines, 0);
        assert_eq!(csv.trim_end(), r#""row","field","message","value""#);
    }

    #[test]
    fn test_report_file_name() {
        assert_eq!(report_file_name("debtors.csv"), "debtors-errors.csv");
        assert_eq!(report_file_name("march"), "march-errors.csv");
    }
}
