//! Collector handlers

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, warn};

use super::{forbidden, parse_authorized, send};
use crate::auth::Permission;
use crate::db::queries;
use crate::types::{EmptyPayload, ErrorResponse, SuccessResponse};

/// Handle collector.list messages
pub async fn handle_list(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    jwt_secret: Arc<String>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received collector.list message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, auth)) =
            parse_authorized::<EmptyPayload>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        if !auth.allows(Permission::ListCollectors) {
            send(&client, reply, &forbidden(request.id)).await?;
            continue;
        }

        match queries::user::list_collectors(&pool).await {
            Ok(collectors) => {
                send(&client, reply, &SuccessResponse::new(request.id, collectors)).await?;
            }
            Err(e) => {
                error!("Failed to list collectors: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                send(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}
