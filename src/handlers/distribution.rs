//! Debtor distribution handler

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{forbidden, parse_authorized, send};
use crate::auth::Permission;
use crate::db::queries;
use crate::services::distribution::{run_distribution, DistributionError};
use crate::services::job_history::{JOB_DISTRIBUTION_RUN, JOB_HISTORY};
use crate::services::progress::ProgressPublisher;
use crate::services::store::DebtorStore;
use crate::types::{DistributionOutcome, ErrorResponse, FailurePolicy, RunDistributionRequest, SuccessResponse};

#[derive(Clone)]
pub struct DistributionState {
    pub pool: PgPool,
    pub jwt_secret: Arc<String>,
    pub store: Arc<dyn DebtorStore>,
    pub progress: Arc<dyn ProgressPublisher>,
    pub default_failure_policy: FailurePolicy,
}

pub(crate) fn distribution_error_response(request_id: Uuid, err: &DistributionError) -> ErrorResponse {
    match err {
        DistributionError::NoCollectors => ErrorResponse::new(request_id, "VALIDATION_ERROR", err.to_string()),
        DistributionError::Halted {
            collector_id, assigned, ..
        } => ErrorResponse::new(request_id, "DISTRIBUTION_FAILED", err.to_string())
            .with_details(serde_json::json!({ "collectorId": collector_id, "assigned": assigned })),
    }
}

fn outcome_details(outcome: &DistributionOutcome) -> String {
    format!(
        "{}/{} debtors assigned, {} failed updates",
        outcome.assigned,
        outcome.total,
        outcome.failures.len()
    )
}

/// Handle distribution.run messages
pub async fn handle_run(client: Client, mut subscriber: Subscriber, state: DistributionState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received distribution.run message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<RunDistributionRequest>(&client, &reply, &msg.payload, &state.jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::Distribute) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        let run = &request.payload;
        if run.collector_ids.is_empty() {
            send(&client, reply, &distribution_error_response(request.id, &DistributionError::NoCollectors)).await?;
            continue;
        }

        match queries::user::unknown_collectors(&state.pool, &run.collector_ids).await {
            Ok(unknown) if !unknown.is_empty() => {
                let error = ErrorResponse::new(
                    request.id,
                    "VALIDATION_ERROR",
                    format!("Unknown collectors: {}", unknown.join(", ")),
                )
                .with_details(serde_json::json!({ "unknownCollectors": unknown }));
                send(&client, reply, &error).await?;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to check collectors: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
                continue;
            }
        }

        let debtor_ids = match run.debtor_ids {
            Some(ref ids) => ids.clone(),
            None => match queries::debtor::unassigned_debtor_ids(&state.pool, &run.filter).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!("Failed to resolve debtors to distribute: {}", e);
                    let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                    send(&client, reply, &error).await?;
                    continue;
                }
            },
        };

        let failure_policy = run.failure_policy.unwrap_or(state.default_failure_policy);
        let client = client.clone();
        let state = state.clone();

        // Runs on its own task so progress for one operator never waits on another
        tokio::spawn(async move {
            let run = request.payload;
            let started_at = Utc::now();
            info!(
                "Distributing {} debtors across {} collectors ({:?}, {:?})",
                debtor_ids.len(),
                run.collector_ids.len(),
                run.policy,
                failure_policy
            );

            let result = run_distribution(
                state.store.as_ref(),
                state.progress.as_ref(),
                &auth.user_id,
                &debtor_ids,
                &run.collector_ids,
                run.policy,
                failure_policy,
            )
            .await;

            let response = match result {
                Ok(outcome) => {
                    let details = outcome_details(&outcome);
                    if outcome.failures.is_empty() {
                        JOB_HISTORY.record_completed(JOB_DISTRIBUTION_RUN, &auth.user_id, started_at, Some(details));
                    } else {
                        JOB_HISTORY.record_partial(JOB_DISTRIBUTION_RUN, &auth.user_id, started_at, Some(details));
                    }
                    send(&client, reply, &SuccessResponse::new(request.id, outcome)).await
                }
                Err(e) => {
                    error!("Distribution failed: {}", e);
                    JOB_HISTORY.record_failed(JOB_DISTRIBUTION_RUN, &auth.user_id, started_at, e.to_string(), None);
                    send(&client, reply, &distribution_error_response(request.id, &e)).await
                }
            };
            if let Err(e) = response {
                error!("Failed to reply to distribution.run: {}", e);
            }
        });
    }

    Ok(())
}
