//! Progress channel payloads

use serde::{Deserialize, Serialize};

/// Long-running job kinds that report progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Ingestion,
    Distribution,
}

impl ProgressKind {
    /// Event name used as the last subject token
    pub fn event_name(&self) -> &'static str {
        match self {
            ProgressKind::Ingestion => "ingestion",
            ProgressKind::Distribution => "distribution",
        }
    }
}

/// Percent-complete event pushed to the initiating user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub uid: String,
    pub progress: u8,
}
