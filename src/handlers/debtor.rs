//! Debtor message handlers

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{forbidden, parse_authorized, send, validation_error};
use crate::auth::{AuthInfo, Permission};
use crate::db::queries;
use crate::services::store::StoreError;
use crate::services::validator::{validate_patch, validate_row, FieldErrors};
use crate::types::{
    DeleteDebtorResponse, ErrorResponse, IdRequest, ListDebtorsRequest, ListResponse, SuccessResponse,
    UpdateDebtorRequest,
};

/// Reply for a failed store operation
pub(crate) fn store_error_response(request_id: Uuid, err: &StoreError) -> ErrorResponse {
    match err {
        StoreError::Duplicate { field, value } => ErrorResponse::new(request_id, "DUPLICATE", err.to_string())
            .with_details(serde_json::json!({ "field": field, "value": value })),
        StoreError::Database(_) => ErrorResponse::new(request_id, "DATABASE_ERROR", err.to_string()),
    }
}

/// Collectors may touch only a few collection fields
fn fields_denied_to(auth: &AuthInfo, patch: &UpdateDebtorRequest) -> Vec<&'static str> {
    if auth.collector_scope().is_some() {
        patch.fields_beyond_collector_scope()
    } else {
        Vec::new()
    }
}

/// Handle debtor.create messages
pub async fn handle_create(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received debtor.create message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<Map<String, Value>>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::CreateDebtors) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        let input = match validate_row(&request.payload, Utc::now()) {
            Ok(input) => input,
            Err(errors) => {
                debug!("Debtor rejected with {} field errors", errors.len());
                send(&client, reply, &validation_error(request.id, &errors)).await?;
                continue;
            }
        };

        if let Some(ref collector_id) = input.collector_id {
            match queries::user::unknown_collectors(&pool, std::slice::from_ref(collector_id)).await {
                Ok(unknown) if !unknown.is_empty() => {
                    let mut errors = FieldErrors::new();
                    errors.insert("collectorId".to_string(), format!("Unknown collector: {}", collector_id));
                    send(&client, reply, &validation_error(request.id, &errors)).await?;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to check collector: {}", e);
                    let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                    send(&client, reply, &error).await?;
                    continue;
                }
            }
        }

        let id = match queries::debtor::create_debtor(&pool, &input).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to create debtor: {}", e);
                send(&client, reply, &store_error_response(request.id, &e)).await?;
                continue;
            }
        };

        match queries::debtor::get_debtor(&pool, id, None).await {
            Ok(Some(debtor)) => {
                info!("Created debtor {} by {}", id, auth.user_id);
                send(&client, reply, &SuccessResponse::new(request.id, debtor)).await?;
            }
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", format!("Debtor {} not found", id));
                send(&client, reply, &error).await?;
            }
            Err(e) => {
                error!("Failed to load created debtor {}: {}", id, e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle debtor.get messages
pub async fn handle_get(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received debtor.get message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<IdRequest>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::ReadDebtors) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        match queries::debtor::get_debtor(&pool, request.payload.id, auth.collector_scope()).await {
            Ok(Some(debtor)) => {
                send(&client, reply, &SuccessResponse::new(request.id, debtor)).await?;
            }
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", "Debtor not found");
                send(&client, reply, &error).await?;
            }
            Err(e) => {
                error!("Failed to get debtor: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle debtor.list messages
pub async fn handle_list(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received debtor.list message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<ListDebtorsRequest>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::ReadDebtors) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        let list = &request.payload;
        match queries::debtor::list_debtors(&pool, list, auth.collector_scope()).await {
            Ok((items, total)) => {
                let response = SuccessResponse::new(
                    request.id,
                    ListResponse {
                        items,
                        total,
                        limit: list.page_limit(),
                        offset: list.page_offset(),
                    },
                );
                send(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to list debtors: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle debtor.update messages
pub async fn handle_update(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received debtor.update message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<UpdateDebtorRequest>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::UpdateDebtors) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        let denied = fields_denied_to(&auth, &request.payload);
        if !denied.is_empty() {
            let error = ErrorResponse::new(
                request.id,
                "FORBIDDEN",
                format!("Collectors cannot change: {}", denied.join(", ")),
            );
            send(&client, reply, &error).await?;
            continue;
        }

        let mut patch = request.payload.clone();
        patch.email = patch.email.map(|e| e.trim().to_lowercase());

        if let Err(errors) = validate_patch(&patch, Utc::now()) {
            send(&client, reply, &validation_error(request.id, &errors)).await?;
            continue;
        }

        if let Some(ref collector_id) = patch.collector_id {
            match queries::user::unknown_collectors(&pool, std::slice::from_ref(collector_id)).await {
                Ok(unknown) if !unknown.is_empty() => {
                    let mut errors = FieldErrors::new();
                    errors.insert("collectorId".to_string(), format!("Unknown collector: {}", collector_id));
                    send(&client, reply, &validation_error(request.id, &errors)).await?;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to check collector: {}", e);
                    let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                    send(&client, reply, &error).await?;
                    continue;
                }
            }
        }

        match queries::debtor::update_debtor(&pool, &auth.user_id, &patch, auth.collector_scope()).await {
            Ok(Some(debtor)) => {
                debug!("Updated debtor {} ({:?})", debtor.id, patch.changed_fields());
                send(&client, reply, &SuccessResponse::new(request.id, debtor)).await?;
            }
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", "Debtor not found");
                send(&client, reply, &error).await?;
            }
            Err(e) => {
                warn!("Failed to update debtor {}: {}", patch.id, e);
                send(&client, reply, &store_error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle debtor.delete messages
pub async fn handle_delete(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received debtor.delete message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<IdRequest>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::DeleteDebtors) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        let id = request.payload.id;
        match queries::debtor::delete_debtor(&pool, id).await {
            Ok(true) => {
                info!("Deleted debtor {} by {}", id, auth.user_id);
                let response = SuccessResponse::new(request.id, DeleteDebtorResponse { id, deleted: true });
                send(&client, reply, &response).await?;
            }
            Ok(false) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", "Debtor not found");
                send(&client, reply, &error).await?;
            }
            Err(e) => {
                error!("Failed to delete debtor: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn auth(role: Role) -> AuthInfo {
        AuthInfo {
            user_id: "u-1".to_string(),
            email: String::new(),
            role,
        }
    }

    #[test]
    fn test_duplicate_maps_to_duplicate_code_with_details() {
        let err = StoreError::Duplicate {
            field: "nationalId".to_string(),
            value: "3171".to_string(),
        };
        let response = store_error_response(Uuid::nil(), &err);
        assert_eq!(response.error.code, "DUPLICATE");
        assert_eq!(response.error.message, "nationalId '3171' already exists");
        assert_eq!(
            response.error.details,
            Some(serde_json::json!({ "field": "nationalId", "value": "3171" }))
        );
    }

    #[test]
    fn test_database_error_code() {
        let response = store_error_response(Uuid::nil(), &StoreError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(response.error.code, "DATABASE_ERROR");
    }

    #[test]
    fn test_collector_patch_limits() {
        let patch = UpdateDebtorRequest {
            id: 1,
            status: Some("Paid".to_string()),
            outstanding_amount: Some(0.0),
            ..Default::default()
        };
        assert_eq!(fields_denied_to(&auth(Role::Collector), &patch), vec!["outstandingAmount"]);
        assert!(fields_denied_to(&auth(Role::Admin), &patch).is_empty());
    }
}
