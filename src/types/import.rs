//! Spreadsheet ingestion types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::FieldDescriptor;

/// Import issue level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportIssueLevel {
    Info,
    Warning,
    Error,
}

/// Single import issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    /// Row index within the uploaded batch (0-based, header excluded)
    pub row_number: i32,
    pub level: ImportIssueLevel,
    pub field: String,
    pub message: String,
    pub original_value: Option<String>,
}

impl ImportIssue {
    pub fn error(row_number: usize, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            row_number: row_number as i32,
            level: ImportIssueLevel::Error,
            field: field.into(),
            message: message.into(),
            original_value: None,
        }
    }

    pub fn with_value(mut self, value: Option<String>) -> Self {
        self.original_value = value;
        self
    }
}

/// Everything known about one failing row: its issues plus the payload it carried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub issues: Vec<ImportIssue>,
    /// Coerced row as it was validated or submitted
    #[serde(rename = "_payload")]
    pub payload: serde_json::Value,
}

/// Row errors keyed by row index within the batch
pub type RowErrors = BTreeMap<usize, RowError>;

/// Ingestion session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestionStage {
    Uploaded,
    Parsed,
    Mapped,
    Validated,
    Committing,
    Committed,
    PartiallyFailed,
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Upload of a spreadsheet file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSheetRequest {
    pub file_name: String,
    pub content_base64: String,
}

/// Request addressing an ingestion session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_id: Uuid,
}

/// Replace the column mapping and uniform defaults of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetMappingRequest {
    pub session_id: Uuid,
    /// Column index -> field name
    #[serde(default)]
    pub mapping: BTreeMap<usize, String>,
    /// Values applied to every row (e.g. an operator-selected collector)
    #[serde(default)]
    pub defaults: serde_json::Map<String, serde_json::Value>,
    /// Manually entered values for single rows, keyed by row index
    #[serde(default)]
    pub overrides: BTreeMap<usize, serde_json::Map<String, serde_json::Value>>,
}

/// Apply a saved mapping template to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyTemplateRequest {
    pub session_id: Uuid,
    pub template_id: i64,
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Summary of a session after upload or mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub file_name: String,
    pub stage: IngestionStage,
    pub headers: Vec<String>,
    pub row_count: usize,
    pub mapping: BTreeMap<usize, String>,
    pub defaults: serde_json::Map<String, serde_json::Value>,
    pub overrides: BTreeMap<usize, serde_json::Map<String, serde_json::Value>>,
}

/// Choices offered for one column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnOptions {
    pub column: usize,
    pub header: String,
    pub selected: Option<String>,
    pub options: Vec<FieldDescriptor>,
}

/// Result of the row-level validation step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub session_id: Uuid,
    pub stage: IngestionStage,
    pub row_count: usize,
    /// Rows eligible for commit (zero whenever any row failed)
    pub eligible_count: usize,
    pub errors: RowErrors,
}

/// Result of a commit run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub session_id: Uuid,
    pub stage: IngestionStage,
    pub succeeded: u32,
    pub failed: u32,
    pub errors: RowErrors,
}

/// Reply to a discard request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardResponse {
    pub session_id: Uuid,
    pub discarded: bool,
}

/// Downloadable error report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReportResponse {
    pub file_name: String,
    pub content_type: String,
    pub content: String,
    pub line_count: usize,
}
