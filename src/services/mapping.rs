//! Column mapping resolver
//!
//! `ColumnMapping` keeps column -> field and field -> column in step, so a
//! field can never be fed by two columns no matter which path assigns it.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{FieldDescriptor, HeaderDiff};

/// Field whose manual per-row override is dropped once the sheet supplies it
pub const SIZE_FIELD: &str = "size";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("Column {column} is outside the sheet ({width} columns)")]
    ColumnOutOfRange { column: usize, width: usize },

    #[error("Field '{field}' is already mapped from column {column}")]
    FieldTaken { field: String, column: usize },

    #[error("Unknown field '{0}'")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Template headers do not match the uploaded sheet:\n{}", format_diff(.0))]
    HeaderMismatch(Vec<HeaderDiff>),

    #[error("Template references unknown fields: {}", .0.join(", "))]
    UnknownFields(Vec<String>),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Bidirectional column index <-> field name mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    by_column: BTreeMap<usize, String>,
    by_field: HashMap<String, usize>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a plain column -> field map, checking bounds and uniqueness
    pub fn from_pairs(pairs: &BTreeMap<usize, String>, width: usize) -> Result<Self, MappingError> {
        let mut mapping = Self::new();
        for (&column, field) in pairs {
            if column >= width {
                return Err(MappingError::ColumnOutOfRange { column, width });
            }
            mapping.assign(column, field)?;
        }
        Ok(mapping)
    }

    /// Map `column` to `field`. Fails if another column already owns the field;
    /// whatever `column` pointed at before is released.
    pub fn assign(&mut self, column: usize, field: &str) -> Result<(), MappingError> {
        if let Some(&owner) = self.by_field.get(field) {
            if owner == column {
                return Ok(());
            }
            return Err(MappingError::FieldTaken {
                field: field.to_string(),
                column: owner,
            });
        }

        if let Some(previous) = self.by_column.insert(column, field.to_string()) {
            self.by_field.remove(&previous);
        }
        self.by_field.insert(field.to_string(), column);
        Ok(())
    }

    pub fn unassign(&mut self, column: usize) -> Option<String> {
        let field = self.by_column.remove(&column)?;
        self.by_field.remove(&field);
        Some(field)
    }

    pub fn field_for(&self, column: usize) -> Option<&str> {
        self.by_column.get(&column).map(String::as_str)
    }

    pub fn column_for(&self, field: &str) -> Option<usize> {
        self.by_field.get(field).copied()
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.by_field.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.by_column.iter().map(|(c, f)| (*c, f.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_column.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<usize, String> {
        self.by_column.clone()
    }

    /// Choices for one column: every field not mapped elsewhere. The column's
    /// own selection stays in its list.
    pub fn options_for(&self, column: usize, fields: &[FieldDescriptor]) -> Vec<FieldDescriptor> {
        fields
            .iter()
            .filter(|f| match self.column_for(&f.name) {
                None => true,
                Some(owner) => owner == column,
            })
            .cloned()
            .collect()
    }

    /// Field names referenced by this mapping that `fields` does not know
    pub fn unknown_fields(&self, fields: &[FieldDescriptor]) -> Vec<String> {
        self.by_column
            .values()
            .filter(|name| !fields.iter().any(|f| &f.name == *name))
            .cloned()
            .collect()
    }
}

/// Drop a manual `size` once the sheet supplies it
pub fn clear_shadowed_overrides(mapping: &ColumnMapping, overrides: &mut Map<String, Value>) {
    if mapping.contains_field(SIZE_FIELD) {
        overrides.remove(SIZE_FIELD);
    }
}

/// Positional header comparison
pub fn diff_headers(expected: &[String], actual: &[String]) -> Vec<HeaderDiff> {
    let width = expected.len().max(actual.len());
    (0..width)
        .filter_map(|column| {
            let e = expected.get(column);
            let a = actual.get(column);
            (e != a).then(|| HeaderDiff {
                column,
                expected: e.cloned(),
                actual: a.cloned(),
            })
        })
        .collect()
}

/// Re-apply a saved mapping to the current sheet. Headers must match exactly
/// and every field must still exist; nothing is returned otherwise.
pub fn apply_template(
    template_headers: &[String],
    template_mapping: &BTreeMap<usize, String>,
    current_headers: &[String],
    fields: &[FieldDescriptor],
) -> Result<ColumnMapping, TemplateError> {
    let diff = diff_headers(template_headers, current_headers);
    if !diff.is_empty() {
        return Err(TemplateError::HeaderMismatch(diff));
    }

    let unknown: Vec<String> = template_mapping
        .values()
        .filter(|name| !fields.iter().any(|f| &f.name == *name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(TemplateError::UnknownFields(unknown));
    }

    Ok(ColumnMapping::from_pairs(template_mapping, current_headers.len())?)
}

fn format_diff(diff: &[HeaderDiff]) -> String {
    diff.iter()
        .map(|d| {
            format!(
                "  column {}: expected {}, found {}",
                d.column,
                quoted(d.expected.as_deref()),
                quoted(d.actual.as_deref())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn quoted(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("\"{}\"", v),
        None => "(none)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeclaredType;
    use serde_json::json;

    fn fields() -> Vec<FieldDescriptor> {
        ["firstName", "email", "size", "BankAccounts.bankName"]
            .iter()
            .map(|n| FieldDescriptor::new(*n, *n, DeclaredType::String))
            .collect()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_assign_rejects_field_owned_by_other_column() {
        let mut mapping = ColumnMapping::new();
        mapping.assign(0, "firstName").unwrap();
        let err = mapping.assign(2, "firstName").unwrap_err();
        assert_eq!(err, MappingError::FieldTaken { field: "firstName".to_string(), column: 0 });
        assert_eq!(mapping.field_for(2), None);
    }

    #[test]
    fn test_reassigning_column_releases_previous_field() {
        let mut mapping = ColumnMapping::new();
        mapping.assign(0, "firstName").unwrap();
        mapping.assign(0, "email").unwrap();
        assert!(!mapping.contains_field("firstName"));
        assert_eq!(mapping.column_for("email"), Some(0));

        // firstName is free again
        mapping.assign(1, "firstName").unwrap();
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_unassign() {
        let mut mapping = ColumnMapping::new();
        mapping.assign(3, "email").unwrap();
        assert_eq!(mapping.unassign(3), Some("email".to_string()));
        assert!(mapping.is_empty());
        assert_eq!(mapping.unassign(3), None);
    }

    #[test]
    fn test_options_hide_fields_used_elsewhere() {
        let mut mapping = ColumnMapping::new();
        mapping.assign(0, "firstName").unwrap();

        let for_other: Vec<String> = mapping.options_for(1, &fields()).into_iter().map(|f| f.name).collect();
        assert!(!for_other.contains(&"firstName".to_string()));
        assert_eq!(for_other.len(), 3);

        let for_self: Vec<String> = mapping.options_for(0, &fields()).into_iter().map(|f| f.name).collect();
        assert!(for_self.contains(&"firstName".to_string()));
        assert_eq!(for_self.len(), 4);
    }

    #[test]
    fn test_from_pairs_checks_bounds_and_duplicates() {
        let pairs = BTreeMap::from([(0, "firstName".to_string()), (5, "email".to_string())]);
        assert_eq!(
            ColumnMapping::from_pairs(&pairs, 3).unwrap_err(),
            MappingError::ColumnOutOfRange { column: 5, width: 3 }
        );

        let pairs = BTreeMap::from([(0, "email".to_string()), (1, "email".to_string())]);
        assert!(matches!(
            ColumnMapping::from_pairs(&pairs, 3),
            Err(MappingError::FieldTaken { .. })
        ));
    }

    #[test]
    fn test_size_override_cleared_when_mapped() {
        let mut overrides = json!({ "size": "L", "collectorId": "c1" }).as_object().unwrap().clone();

        let mut mapping = ColumnMapping::new();
        mapping.assign(0, "firstName").unwrap();
        clear_shadowed_overrides(&mapping, &mut overrides);
        assert!(overrides.contains_key("size"));

        mapping.assign(4, "size").unwrap();
        clear_shadowed_overrides(&mapping, &mut overrides);
        assert!(!overrides.contains_key("size"));
        assert!(overrides.contains_key("collectorId"));
    }

    #[test]
    fn test_template_header_mismatch_reports_diff() {
        let template_mapping = BTreeMap::from([(0, "firstName".to_string())]);
        let err = apply_template(
            &headers(&["A", "B", "C"]),
            &template_mapping,
            &headers(&["A", "X", "C"]),
            &fields(),
        )
        .unwrap_err();

        match &err {
            TemplateError::HeaderMismatch(diff) => {
                assert_eq!(
                    diff,
                    &vec![HeaderDiff {
                        column: 1,
                        expected: Some("B".to_string()),
                        actual: Some("X".to_string()),
                    }]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("column 1: expected \"B\", found \"X\""));
    }

    #[test]
    fn test_template_header_length_difference() {
        let diff = diff_headers(&headers(&["A", "B"]), &headers(&["A", "B", "C"]));
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].expected, None);
        assert_eq!(diff[0].actual.as_deref(), Some("C"));
    }

    #[test]
    fn test_template_unknown_field() {
        let template_mapping = BTreeMap::from([(0, "firstName".to_string()), (1, "nickname".to_string())]);
        let err = apply_template(&headers(&["A", "B"]), &template_mapping, &headers(&["A", "B"]), &fields())
            .unwrap_err();
        assert_eq!(err, TemplateError::UnknownFields(vec!["nickname".to_string()]));
    }

    #[test]
    fn test_template_applies_on_match() {
        let template_mapping = BTreeMap::from([(0, "firstName".to_string()), (2, "BankAccounts.bankName".to_string())]);
        let mapping =
            apply_template(&headers(&["Nama", "KTP", "Bank"]), &template_mapping, &headers(&["Nama", "KTP", "Bank"]), &fields())
                .unwrap();
        assert_eq!(mapping.to_map(), template_mapping);
    }
}
