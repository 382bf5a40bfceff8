//! Debtor distribution types

use serde::{Deserialize, Serialize};

use super::DebtorFilter;

/// How debtors are spread across collectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionPolicy {
    /// Contiguous chunks of `ceil(debtors / collectors)`
    Even,
    /// Debtor `i` goes to collector `i mod N`
    #[serde(alias = "round_robin", alias = "roundRobin")]
    Roundrobin,
}

/// What happens when an update fails mid-run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failing update; earlier updates stay applied
    #[default]
    Halt,
    /// Record the failure and keep going
    Continue,
}

impl FailurePolicy {
    pub fn parse(s: &str) -> Option<FailurePolicy> {
        match s.trim().to_lowercase().as_str() {
            "halt" => Some(FailurePolicy::Halt),
            "continue" => Some(FailurePolicy::Continue),
            _ => None,
        }
    }
}

/// One bulk assignment produced by the even policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAssignment {
    pub collector_id: String,
    pub debtor_ids: Vec<i64>,
}

/// Request to distribute debtors across collectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDistributionRequest {
    /// Explicit targets; when absent, unassigned debtors matching `filter` are used
    pub debtor_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub filter: DebtorFilter,
    pub collector_ids: Vec<String>,
    pub policy: DistributionPolicy,
    pub failure_policy: Option<FailurePolicy>,
}

/// Failed update recorded under the continue policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionFailure {
    pub collector_id: String,
    pub debtor_ids: Vec<i64>,
    pub message: String,
}

/// Result of a distribution run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionOutcome {
    pub total: usize,
    pub assigned: usize,
    pub failures: Vec<DistributionFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parses_wire_names() {
        let even: DistributionPolicy = serde_json::from_str("\"even\"").unwrap();
        let rr: DistributionPolicy = serde_json::from_str("\"roundrobin\"").unwrap();
        assert_eq!(even, DistributionPolicy::Even);
        assert_eq!(rr, DistributionPolicy::Roundrobin);
    }

    #[test]
    fn test_failure_policy_defaults_to_halt() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::Halt);
        assert_eq!(FailurePolicy::parse(" Continue "), Some(FailurePolicy::Continue));
        assert_eq!(FailurePolicy::parse("retry"), None);
    }
}
