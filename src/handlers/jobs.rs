//! Job history handler

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{parse_authorized, send};
use crate::auth::AuthInfo;
use crate::services::job_history::{JobHistoryResponse, JobHistoryService, JOB_HISTORY};
use crate::types::SuccessResponse;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Admins see every job, everyone else only their own
fn history_for(service: &JobHistoryService, auth: &AuthInfo, limit: Option<usize>) -> JobHistoryResponse {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(100);
    if auth.is_admin() {
        service.get_recent(limit)
    } else {
        service.get_recent_for_user(&auth.user_id, limit)
    }
}

/// Handle job.history messages
pub async fn handle_job_history(client: Client, mut subscriber: Subscriber, jwt_secret: Arc<String>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received job.history message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<JobHistoryRequest>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        let history = history_for(&JOB_HISTORY, &auth, request.payload.limit);
        send(&client, reply, &SuccessResponse::new(request.id, history)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::job_history::JOB_INGEST_COMMIT;
    use crate::types::Role;
    use chrono::Utc;

    fn auth(user_id: &str, role: Role) -> AuthInfo {
        AuthInfo {
            user_id: user_id.to_string(),
            email: String::new(),
            role,
        }
    }

    #[test]
    fn test_non_admin_sees_own_jobs_only() {
        let service = JobHistoryService::in_memory();
        service.record_completed(JOB_INGEST_COMMIT, "u-1", Utc::now(), None);
        service.record_completed(JOB_INGEST_COMMIT, "u-2", Utc::now(), None);

        let own = history_for(&service, &auth("u-1", Role::User), None);
        assert_eq!(own.jobs.len(), 1);
        assert_eq!(own.jobs[0].user_id, "u-1");

        let all = history_for(&service, &auth("admin", Role::Admin), None);
        assert_eq!(all.jobs.len(), 2);
    }

    #[test]
    fn test_limit_is_capped() {
        let service = JobHistoryService::in_memory();
        for _ in 0..3 {
            service.record_completed(JOB_INGEST_COMMIT, "u-1", Utc::now(), None);
        }
        let history = history_for(&service, &auth("u-1", Role::User), Some(2));
        assert_eq!(history.jobs.len(), 2);
    }
}
