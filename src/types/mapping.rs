//! Mapping template types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Saved column mapping, reusable for sheets with the same header row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MappingTemplate {
    pub id: i64,
    pub name: String,
    pub headers: Json<Vec<String>>,
    pub mapping: Json<BTreeMap<usize, String>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Request to save a mapping template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub name: String,
    pub headers: Vec<String>,
    pub mapping: BTreeMap<usize, String>,
}

/// Request to list templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTemplatesRequest {
    #[serde(default = "crate::types::messages::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// One positional difference between a template's headers and an uploaded sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderDiff {
    pub column: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
}
