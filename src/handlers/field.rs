//! Field catalog handler

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, warn};

use super::{parse_authorized, send};
use crate::types::{EmptyPayload, FieldDescriptor, SuccessResponse};

/// Handle field.list messages
pub async fn handle_list(
    client: Client,
    mut subscriber: Subscriber,
    jwt_secret: Arc<String>,
    fields: Arc<Vec<FieldDescriptor>>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received field.list message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some((request, _auth)) =
            parse_authorized::<EmptyPayload>(&client, &reply, &msg.payload, &jwt_secret).await?
        else {
            continue;
        };

        let response = SuccessResponse::new(request.id, fields.as_ref());
        send(&client, reply, &response).await?;
    }

    Ok(())
}
