//! Spreadsheet ingestion handlers
//!
//! Each subject drives one transition of a session held in `IngestionSessions`.
//! Commits run on their own task so a long batch does not hold up other users.

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subject, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{forbidden, parse_authorized, send};
use crate::auth::{AuthInfo, Permission};
use crate::db::queries;
use crate::services::ingestion::{commit_session, IngestionError, IngestionSession, IngestionSessions};
use crate::services::job_history::{JOB_HISTORY, JOB_INGEST_COMMIT};
use crate::services::mapping::TemplateError;
use crate::services::progress::ProgressPublisher;
use crate::services::spreadsheet::decode_upload;
use crate::services::store::DebtorStore;
use crate::types::{
    ApplyTemplateRequest, CommitResponse, DiscardResponse, ErrorResponse, FieldDescriptor, Request, SessionRequest,
    SetMappingRequest, SuccessResponse, UploadSheetRequest,
};

/// Everything the ingestion subjects share
#[derive(Clone)]
pub struct IngestState {
    pub pool: PgPool,
    pub jwt_secret: Arc<String>,
    pub sessions: Arc<IngestionSessions>,
    pub store: Arc<dyn DebtorStore>,
    pub progress: Arc<dyn ProgressPublisher>,
    pub fields: Arc<Vec<FieldDescriptor>>,
    pub max_rows: usize,
}

/// Reply for a failed session operation
pub(crate) fn ingestion_error_response(request_id: Uuid, err: &IngestionError) -> ErrorResponse {
    match err {
        IngestionError::SessionNotFound(_) => ErrorResponse::new(request_id, "NOT_FOUND", err.to_string()),
        IngestionError::InvalidState { .. } => ErrorResponse::new(request_id, "INVALID_STATE", err.to_string()),
        IngestionError::Template(TemplateError::HeaderMismatch(diff)) => {
            ErrorResponse::new(request_id, "TEMPLATE_MISMATCH", err.to_string())
                .with_details(serde_json::json!({ "headerDiff": diff }))
        }
        IngestionError::Template(TemplateError::UnknownFields(fields)) => {
            ErrorResponse::new(request_id, "TEMPLATE_MISMATCH", err.to_string())
                .with_details(serde_json::json!({ "unknownFields": fields }))
        }
        IngestionError::Spreadsheet(_) | IngestionError::Mapping(_) | IngestionError::Template(_) => {
            ErrorResponse::new(request_id, "VALIDATION_ERROR", err.to_string())
        }
    }
}

/// Parse, authorize and check the ingest permission.
/// `None` means a reply has already been sent.
async fn accept<T: serde::de::DeserializeOwned>(
    client: &Client,
    reply: &Subject,
    payload: &[u8],
    state: &IngestState,
) -> Result<Option<(Request<T>, AuthInfo)>> {
    let Some((request, auth)) = parse_authorized::<T>(client, reply, payload, &state.jwt_secret).await? else {
        return Ok(None);
    };
    if !auth.allows(Permission::Ingest) {
        send(client, reply.clone(), &forbidden(request.id)).await?;
        return Ok(None);
    }
    Ok(Some((request, auth)))
}

/// Reply with a session operation's outcome
async fn reply_with<T: Serialize>(
    client: &Client,
    reply: Subject,
    request_id: Uuid,
    result: Result<T, IngestionError>,
) -> Result<()> {
    match result {
        Ok(payload) => send(client, reply, &SuccessResponse::new(request_id, payload)).await,
        Err(e) => {
            debug!("Ingestion request {} refused: {}", request_id, e);
            send(client, reply, &ingestion_error_response(request_id, &e)).await
        }
    }
}

/// Handle ingest.upload messages
pub async fn handle_upload(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.upload message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<UploadSheetRequest>(&client, &reply, &msg.payload, &state).await? else {
            continue;
        };

        let upload = &request.payload;
        let result = decode_upload(&upload.file_name, &upload.content_base64, state.max_rows)
            .map(|grid| {
                let session = IngestionSession::new(&auth.user_id, &upload.file_name, grid);
                let summary = session.summary();
                state.sessions.insert(session);
                info!(
                    "Ingestion session {} opened for {} ({} rows, {} live sessions)",
                    summary.session_id,
                    upload.file_name,
                    summary.row_count,
                    state.sessions.len()
                );
                summary
            })
            .map_err(IngestionError::from);

        reply_with(&client, reply, request.id, result).await?;
    }

    Ok(())
}

/// Handle ingest.map messages
pub async fn handle_map(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.map message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<SetMappingRequest>(&client, &reply, &msg.payload, &state).await? else {
            continue;
        };

        let SetMappingRequest {
            session_id,
            mapping,
            defaults,
            overrides,
        } = request.payload;
        let result = state.sessions.with_session(session_id, &auth.user_id, |session| {
            session.set_mapping(&mapping, defaults, overrides, &state.fields)?;
            Ok(session.summary())
        });

        reply_with(&client, reply, request.id, result).await?;
    }

    Ok(())
}

/// Handle ingest.options messages
pub async fn handle_options(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.options message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<SessionRequest>(&client, &reply, &msg.payload, &state).await? else {
            continue;
        };

        let result = state
            .sessions
            .with_session(request.payload.session_id, &auth.user_id, |session| {
                Ok(session.column_options(&state.fields))
            });

        reply_with(&client, reply, request.id, result).await?;
    }

    Ok(())
}

/// Handle ingest.template.apply messages
pub async fn handle_template_apply(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.template.apply message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<ApplyTemplateRequest>(&client, &reply, &msg.payload, &state).await?
        else {
            continue;
        };

        let template = match queries::mapping_template::get_template(&state.pool, request.payload.template_id).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", "Mapping template not found");
                send(&client, reply, &error).await?;
                continue;
            }
            Err(e) => {
                error!("Failed to load mapping template: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
                continue;
            }
        };

        let result = state
            .sessions
            .with_session(request.payload.session_id, &auth.user_id, |session| {
                session.apply_template(&template.headers, &template.mapping, &state.fields)?;
                Ok(session.summary())
            });
        if let Err(ref e) = result {
            warn!("Template '{}' not applied: {}", template.name, e);
        }

        reply_with(&client, reply, request.id, result).await?;
    }

    Ok(())
}

/// Handle ingest.validate messages
pub async fn handle_validate(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.validate message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<SessionRequest>(&client, &reply, &msg.payload, &state).await? else {
            continue;
        };

        let result = state
            .sessions
            .with_session(request.payload.session_id, &auth.user_id, |session| {
                session.validate(&state.fields, Utc::now())
            });

        reply_with(&client, reply, request.id, result).await?;
    }

    Ok(())
}

/// Handle ingest.commit messages
pub async fn handle_commit(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.commit message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<SessionRequest>(&client, &reply, &msg.payload, &state).await? else {
            continue;
        };

        let client = client.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let started_at = Utc::now();
            let result = commit_session(
                &state.sessions,
                request.payload.session_id,
                &auth.user_id,
                state.store.as_ref(),
                state.progress.as_ref(),
            )
            .await;

            match result {
                Ok(ref response) => record_commit(&auth.user_id, started_at, response),
                Err(IngestionError::SessionNotFound(_)) => {}
                Err(ref e) => {
                    JOB_HISTORY.record_failed(JOB_INGEST_COMMIT, &auth.user_id, started_at, e.to_string(), None);
                }
            }

            if let Err(e) = reply_with(&client, reply, request.id, result).await {
                error!("Failed to reply to ingest.commit: {}", e);
            }
        });
    }

    Ok(())
}

fn record_commit(user_id: &str, started_at: chrono::DateTime<Utc>, response: &CommitResponse) {
    let details = format!(
        "session {}: {} stored, {} failed",
        response.session_id, response.succeeded, response.failed
    );
    info!("Ingestion commit finished, {}", details);
    if response.failed == 0 {
        JOB_HISTORY.record_completed(JOB_INGEST_COMMIT, user_id, started_at, Some(details));
    } else {
        JOB_HISTORY.record_partial(JOB_INGEST_COMMIT, user_id, started_at, Some(details));
    }
}

/// Handle ingest.errors messages
pub async fn handle_errors(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.errors message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<SessionRequest>(&client, &reply, &msg.payload, &state).await? else {
            continue;
        };

        let result = state
            .sessions
            .with_session(request.payload.session_id, &auth.user_id, |session| Ok(session.error_report()));

        match result {
            Ok(Ok(report)) => {
                send(&client, reply, &SuccessResponse::new(request.id, report)).await?;
            }
            Ok(Err(e)) => {
                error!("Failed to render error report: {}", e);
                let error = ErrorResponse::new(request.id, "INTERNAL_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
            Err(e) => {
                send(&client, reply, &ingestion_error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle ingest.discard messages
pub async fn handle_discard(client: Client, mut subscriber: Subscriber, state: IngestState) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ingest.discard message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) = accept::<SessionRequest>(&client, &reply, &msg.payload, &state).await? else {
            continue;
        };

        let session_id = request.payload.session_id;
        let result = state
            .sessions
            .remove(session_id, &auth.user_id)
            .map(|_| DiscardResponse {
                session_id,
                discarded: true,
            });
        if result.is_ok() {
            debug!("Ingestion session {} discarded", session_id);
        }

        reply_with(&client, reply, request.id, result).await?;
    }

    Ok(())
}
