//! Field descriptor types used for column mapping and cell coercion

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Declared storage type of a mappable field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeclaredType {
    String,
    Text,
    Integer,
    Decimal,
    Boolean,
    Dateonly,
    Date,
    Json,
    Enum,
}

impl DeclaredType {
    /// Map an `information_schema.columns.data_type` value
    pub fn from_sql_type(data_type: &str) -> DeclaredType {
        match data_type.to_lowercase().as_str() {
            "character varying" | "character" | "varchar" | "uuid" => DeclaredType::String,
            "smallint" | "integer" | "bigint" => DeclaredType::Integer,
            "double precision" | "numeric" | "real" | "decimal" => DeclaredType::Decimal,
            "boolean" => DeclaredType::Boolean,
            "date" => DeclaredType::Dateonly,
            t if t.starts_with("timestamp") => DeclaredType::Date,
            "json" | "jsonb" | "array" => DeclaredType::Json,
            "user-defined" => DeclaredType::Enum,
            _ => DeclaredType::Text,
        }
    }
}

/// A field that spreadsheet columns can be mapped onto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    pub declared_type: DeclaredType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, label: impl Into<String>, declared_type: DeclaredType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            declared_type,
        }
    }
}

/// Raw column row from `information_schema.columns`
#[derive(Debug, Clone, FromRow)]
pub struct ColumnInfo {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sql_type_maps_postgres_types() {
        assert_eq!(DeclaredType::from_sql_type("character varying"), DeclaredType::String);
        assert_eq!(DeclaredType::from_sql_type("text"), DeclaredType::Text);
        assert_eq!(DeclaredType::from_sql_type("integer"), DeclaredType::Integer);
        assert_eq!(DeclaredType::from_sql_type("double precision"), DeclaredType::Decimal);
        assert_eq!(DeclaredType::from_sql_type("date"), DeclaredType::Dateonly);
        assert_eq!(DeclaredType::from_sql_type("timestamp with time zone"), DeclaredType::Date);
        assert_eq!(DeclaredType::from_sql_type("jsonb"), DeclaredType::Json);
        assert_eq!(DeclaredType::from_sql_type("boolean"), DeclaredType::Boolean);
    }

    #[test]
    fn test_declared_type_serializes_uppercase() {
        let json = serde_json::to_string(&DeclaredType::Dateonly).unwrap();
        assert_eq!(json, "\"DATEONLY\"");
    }
}
