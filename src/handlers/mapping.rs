//! Mapping template handlers

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use super::{forbidden, parse_authorized, send, validation_error};
use crate::auth::Permission;
use crate::db::queries;
use crate::services::mapping::{ColumnMapping, MappingError};
use crate::services::validator::FieldErrors;
use crate::types::{
    CreateTemplateRequest, ErrorResponse, FieldDescriptor, ListResponse, ListTemplatesRequest, SuccessResponse,
};

/// Check a template before it is stored: a name, one column per field,
/// columns within the saved header row, known fields only
fn check_template(request: &CreateTemplateRequest, fields: &[FieldDescriptor]) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if request.name.trim().is_empty() {
        errors.insert("name".to_string(), "Required".to_string());
    }
    if request.headers.is_empty() {
        errors.insert("headers".to_string(), "Required".to_string());
    }

    match ColumnMapping::from_pairs(&request.mapping, request.headers.len()) {
        Ok(mapping) => {
            if let Some(unknown) = mapping.unknown_fields(fields).into_iter().next() {
                errors.insert("mapping".to_string(), MappingError::UnknownField(unknown).to_string());
            }
        }
        Err(e) => {
            errors.insert("mapping".to_string(), e.to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Handle mapping.template.create messages
pub async fn handle_template_create(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
    fields: Arc<Vec<FieldDescriptor>>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received mapping.template.create message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<CreateTemplateRequest>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::ManageTemplates) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        if let Err(errors) = check_template(&request.payload, &fields) {
            send(&client, reply, &validation_error(request.id, &errors)).await?;
            continue;
        }

        match queries::mapping_template::create_template(&pool, &auth.user_id, &request.payload).await {
            Ok(template) => {
                info!("Saved mapping template {} '{}'", template.id, template.name);
                send(&client, reply, &SuccessResponse::new(request.id, template)).await?;
            }
            Err(e) => {
                error!("Failed to save mapping template: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle mapping.template.list messages
pub async fn handle_template_list(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received mapping.template.list message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<ListTemplatesRequest>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::ManageTemplates) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        let limit = request.payload.limit.clamp(1, 200);
        let offset = request.payload.offset.max(0);
        match queries::mapping_template::list_templates(&pool, limit, offset).await {
            Ok((items, total)) => {
                let response = SuccessResponse::new(request.id, ListResponse { items, total, limit, offset });
                send(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to list mapping templates: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}
