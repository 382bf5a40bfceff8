//! Debtor distribution across collectors
//!
//! Planning is pure; `run_distribution` walks the plan sequentially, one
//! store call per step, publishing progress after each step and a terminal
//! 100 once the loop is done.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{info, warn};

use crate::services::progress::{notify, round_percent, ProgressPublisher};
use crate::services::store::{DebtorStore, StoreError};
use crate::types::{
    ChunkAssignment, DistributionFailure, DistributionOutcome, DistributionPolicy, FailurePolicy,
    ProgressKind,
};

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("At least one collector is required")]
    NoCollectors,

    #[error("Assigning debtors to collector {collector_id} failed after {assigned} debtors were assigned: {source}")]
    Halted {
        collector_id: String,
        assigned: usize,
        #[source]
        source: StoreError,
    },
}

/// Contiguous chunks of `ceil(debtors / collectors)`, one per collector.
/// Trailing chunks may be short or empty.
pub fn plan_even(debtor_ids: &[i64], collector_ids: &[String]) -> Vec<ChunkAssignment> {
    if collector_ids.is_empty() {
        return Vec::new();
    }
    let chunk_size = debtor_ids.len().div_ceil(collector_ids.len());

    collector_ids
        .iter()
        .enumerate()
        .map(|(i, collector_id)| {
            let start = (i * chunk_size).min(debtor_ids.len());
            let end = ((i + 1) * chunk_size).min(debtor_ids.len());
            ChunkAssignment {
                collector_id: collector_id.clone(),
                debtor_ids: debtor_ids[start..end].to_vec(),
            }
        })
        .collect()
}

/// Debtor `i` goes to collector `i mod N`, one step per debtor
pub fn plan_round_robin(debtor_ids: &[i64], collector_ids: &[String]) -> Vec<ChunkAssignment> {
    if collector_ids.is_empty() {
        return Vec::new();
    }
    debtor_ids
        .iter()
        .enumerate()
        .map(|(i, id)| ChunkAssignment {
            collector_id: collector_ids[i % collector_ids.len()].clone(),
            debtor_ids: vec![*id],
        })
        .collect()
}

pub fn plan(policy: DistributionPolicy, debtor_ids: &[i64], collector_ids: &[String]) -> Vec<ChunkAssignment> {
    match policy {
        DistributionPolicy::Even => plan_even(debtor_ids, collector_ids),
        DistributionPolicy::Roundrobin => plan_round_robin(debtor_ids, collector_ids),
    }
}

/// Ids with repeats removed, first occurrence kept
fn unique_in_order(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Assign `debtor_ids` to `collector_ids`, each debtor once. Updates already
/// applied are kept when a later step fails. `assigned` counts rows the store
/// actually updated.
pub async fn run_distribution(
    store: &dyn DebtorStore,
    progress: &dyn ProgressPublisher,
    uid: &str,
    debtor_ids: &[i64],
    collector_ids: &[String],
    policy: DistributionPolicy,
    failure_policy: FailurePolicy,
) -> Result<DistributionOutcome, DistributionError> {
    if collector_ids.is_empty() {
        return Err(DistributionError::NoCollectors);
    }

    let debtor_ids = unique_in_order(debtor_ids);
    let total = debtor_ids.len();
    let steps = plan(policy, &debtor_ids, collector_ids);
    let mut processed = 0;
    let mut assigned = 0;
    let mut failures = Vec::new();

    for step in steps {
        if !step.debtor_ids.is_empty() {
            match store.assign_collector(&step.debtor_ids, &step.collector_id).await {
                Ok(rows) => {
                    let rows = rows as usize;
                    if rows < step.debtor_ids.len() {
                        warn!(
                            "{} of {} debtors for collector {} were not updated",
                            step.debtor_ids.len() - rows,
                            step.debtor_ids.len(),
                            step.collector_id
                        );
                    }
                    assigned += rows;
                }
                Err(e) => match failure_policy {
                    FailurePolicy::Halt => {
                        return Err(DistributionError::Halted {
                            collector_id: step.collector_id,
                            assigned,
                            source: e,
                        });
                    }
                    FailurePolicy::Continue => {
                        warn!("Assignment to collector {} failed: {}", step.collector_id, e);
                        failures.push(DistributionFailure {
                            collector_id: step.collector_id.clone(),
                            debtor_ids: step.debtor_ids.clone(),
                            message: e.to_string(),
                        });
                    }
                },
            }
        }

        processed += step.debtor_ids.len();
        notify(progress, uid, ProgressKind::Distribution, round_percent(processed, total)).await;
    }

    // Completion marker, sent even when the last step already reported 100
    notify(progress, uid, ProgressKind::Distribution, 100).await;

    info!(
        "Distributed {}/{} debtors across {} collectors ({:?})",
        assigned,
        total,
        collector_ids.len(),
        policy
    );

    Ok(DistributionOutcome {
        total,
        assigned,
        failures,
    })
}
