//! Field descriptors derived from the persisted schema

use crate::types::{options_for_field, ColumnInfo, DeclaredType, FieldDescriptor};

/// Columns never offered for mapping
const SYSTEM_COLUMNS: &[&str] = &["id", "debtor_id", "created_at", "updated_at"];

/// Child tables exposed as `Group.subField` descriptors
const GROUP_TABLES: &[(&str, &str)] = &[("relations", "Relations"), ("bank_accounts", "BankAccounts")];

pub const DEBTOR_TABLE: &str = "debtors";

/// Tables introspected for the catalog
pub fn catalog_tables() -> Vec<&'static str> {
    std::iter::once(DEBTOR_TABLE)
        .chain(GROUP_TABLES.iter().map(|(table, _)| *table))
        .collect()
}

pub fn descriptors_from_columns(columns: &[ColumnInfo]) -> Vec<FieldDescriptor> {
    columns
        .iter()
        .filter(|c| !SYSTEM_COLUMNS.contains(&c.column_name.as_str()))
        .filter_map(|c| {
            let field = camel_case(&c.column_name);
            let (name, label) = if c.table_name == DEBTOR_TABLE {
                (field.clone(), label_for(&field))
            } else {
                let (_, group) = GROUP_TABLES.iter().find(|(table, _)| *table == c.table_name)?;
                (format!("{}.{}", group, field), format!("{}: {}", label_for(group), label_for(&field)))
            };

            let declared_type = if options_for_field(&name).is_some() {
                DeclaredType::Enum
            } else {
                DeclaredType::from_sql_type(&c.data_type)
            };
            Some(FieldDescriptor::new(name, label, declared_type))
        })
        .collect()
}

/// Declared type of a field, `STRING` for names the catalog does not know
pub fn declared_type_of(fields: &[FieldDescriptor], name: &str) -> DeclaredType {
    fields
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.declared_type)
        .unwrap_or(DeclaredType::String)
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `firstName` -> `First Name`, `BankAccounts` -> `Bank Accounts`
fn label_for(name: &str) -> String {
    let mut label = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if i == 0 {
            label.extend(c.to_uppercase());
        } else {
            if c.is_uppercase() {
                label.push(' ');
            }
            label.push(c);
        }
    }
    label
}
