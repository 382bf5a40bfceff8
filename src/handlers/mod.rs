//! NATS message handlers

pub mod collector;
pub mod debtor;
pub mod distribution;
pub mod field;
pub mod ingest;
pub mod jobs;
pub mod mapping;
pub mod ping;

use std::sync::Arc;
use anyhow::Result;
use async_nats::{Client, Subject};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, error, warn};
use tokio::select;
use uuid::Uuid;

use crate::auth::{self, AuthInfo};
use crate::config::Config;
use crate::db::queries;
use crate::db::queries::debtor::PgDebtorStore;
use crate::services::field_catalog::descriptors_from_columns;
use crate::services::ingestion::IngestionSessions;
use crate::services::progress::{LogProgressPublisher, NatsProgressPublisher, ProgressPublisher};
use crate::services::store::DebtorStore;
use crate::services::validator::FieldErrors;
use crate::types::{ErrorResponse, Request};

// ==========================================================================
// Shared reply helpers
// ==========================================================================

/// Serialize and publish a reply
pub(crate) async fn send<T: Serialize>(client: &Client, reply: Subject, response: &T) -> Result<()> {
    let _ = client.publish(reply, serde_json::to_vec(response)?.into()).await;
    Ok(())
}

/// Parse the request envelope and verify the caller's token.
/// On failure the error reply has already been sent and `None` is returned.
pub(crate) async fn parse_authorized<T: DeserializeOwned>(
    client: &Client,
    reply: &Subject,
    payload: &[u8],
    jwt_secret: &str,
) -> Result<Option<(Request<T>, AuthInfo)>> {
    let request: Request<T> = match serde_json::from_slice(payload) {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse request: {}", e);
            let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
            send(client, reply.clone(), &error).await?;
            return Ok(None);
        }
    };

    match auth::extract_auth(&request, jwt_secret) {
        Ok(info) => {
            debug!("Request {} from {} ({})", request.id, info.email, info.role.as_str());
            Ok(Some((request, info)))
        }
        Err(e) => {
            warn!("Rejected request {}: {}", request.id, e);
            let error = ErrorResponse::new(request.id, "UNAUTHORIZED", "Authentication required");
            send(client, reply.clone(), &error).await?;
            Ok(None)
        }
    }
}

pub(crate) fn forbidden(request_id: Uuid) -> ErrorResponse {
    ErrorResponse::new(request_id, "FORBIDDEN", "Not allowed for your role")
}

/// VALIDATION_ERROR carrying the per-field messages
pub(crate) fn validation_error(request_id: Uuid, errors: &FieldErrors) -> ErrorResponse {
    ErrorResponse::new(request_id, "VALIDATION_ERROR", "Validation failed")
        .with_details(serde_json::json!({ "fields": errors }))
}

// ==========================================================================
// Startup
// ==========================================================================

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let jwt_secret = Arc::new(config.jwt_secret.clone());

    // Field catalog follows the migrated schema, so it is read once
    let columns = queries::field_catalog::list_catalog_columns(&pool).await?;
    let fields = Arc::new(descriptors_from_columns(&columns));
    info!("Field catalog loaded: {} mappable fields", fields.len());

    let progress: Arc<dyn ProgressPublisher> = if config.progress_enabled {
        Arc::new(NatsProgressPublisher::new(client.clone(), config.progress_subject_prefix.clone()))
    } else {
        info!("Progress publishing disabled, events are logged only");
        Arc::new(LogProgressPublisher)
    };
    let store: Arc<dyn DebtorStore> = Arc::new(PgDebtorStore::new(pool.clone()));
    let sessions = Arc::new(IngestionSessions::new());

    let ingest_state = ingest::IngestState {
        pool: pool.clone(),
        jwt_secret: jwt_secret.clone(),
        sessions,
        store: store.clone(),
        progress: progress.clone(),
        fields: fields.clone(),
        max_rows: config.ingest_max_rows,
    };
    let distribution_state = distribution::DistributionState {
        pool: pool.clone(),
        jwt_secret: jwt_secret.clone(),
        store,
        progress,
        default_failure_policy: config.distribution_failure_policy,
    };

    // Subscribe to all subjects
    let ping_sub = client.subscribe("collecta.ping").await?;
    let field_list_sub = client.subscribe("collecta.field.list").await?;
    let job_history_sub = client.subscribe("collecta.job.history").await?;

    // Debtor subjects
    let debtor_create_sub = client.subscribe("collecta.debtor.create").await?;
    let debtor_get_sub = client.subscribe("collecta.debtor.get").await?;
    let debtor_list_sub = client.subscribe("collecta.debtor.list").await?;
    let debtor_update_sub = client.subscribe("collecta.debtor.update").await?;
    let debtor_delete_sub = client.subscribe("collecta.debtor.delete").await?;
    let collector_list_sub = client.subscribe("collecta.collector.list").await?;

    // Mapping template subjects
    let template_create_sub = client.subscribe("collecta.mapping.template.create").await?;
    let template_list_sub = client.subscribe("collecta.mapping.template.list").await?;

    // Ingestion subjects
    let ingest_upload_sub = client.subscribe("collecta.ingest.upload").await?;
    let ingest_map_sub = client.subscribe("collecta.ingest.map").await?;
    let ingest_options_sub = client.subscribe("collecta.ingest.options").await?;
    let ingest_template_sub = client.subscribe("collecta.ingest.template.apply").await?;
    let ingest_validate_sub = client.subscribe("collecta.ingest.validate").await?;
    let ingest_commit_sub = client.subscribe("collecta.ingest.commit").await?;
    let ingest_errors_sub = client.subscribe("collecta.ingest.errors").await?;
    let ingest_discard_sub = client.subscribe("collecta.ingest.discard").await?;

    // Distribution subjects
    let distribution_run_sub = client.subscribe("collecta.distribution.run").await?;

    info!("Subscribed to NATS subjects");

    // Clone for each handler
    let client_ping = client.clone();
    let client_field_list = client.clone();
    let client_job_history = client.clone();
    let client_debtor_create = client.clone();
    let client_debtor_get = client.clone();
    let client_debtor_list = client.clone();
    let client_debtor_update = client.clone();
    let client_debtor_delete = client.clone();
    let client_collector_list = client.clone();
    let client_template_create = client.clone();
    let client_template_list = client.clone();
    let client_ingest_upload = client.clone();
    let client_ingest_map = client.clone();
    let client_ingest_options = client.clone();
    let client_ingest_template = client.clone();
    let client_ingest_validate = client.clone();
    let client_ingest_commit = client.clone();
    let client_ingest_errors = client.clone();
    let client_ingest_discard = client.clone();
    let client_distribution_run = client.clone();

    let pool_debtor_create = pool.clone();
    let pool_debtor_get = pool.clone();
    let pool_debtor_list = pool.clone();
    let pool_debtor_update = pool.clone();
    let pool_debtor_delete = pool.clone();
    let pool_collector_list = pool.clone();
    let pool_template_create = pool.clone();
    let pool_template_list = pool.clone();

    let secret_field_list = jwt_secret.clone();
    let secret_job_history = jwt_secret.clone();
    let secret_debtor_create = jwt_secret.clone();
    let secret_debtor_get = jwt_secret.clone();
    let secret_debtor_list = jwt_secret.clone();
    let secret_debtor_update = jwt_secret.clone();
    let secret_debtor_delete = jwt_secret.clone();
    let secret_collector_list = jwt_secret.clone();
    let secret_template_create = jwt_secret.clone();
    let secret_template_list = jwt_secret.clone();

    let fields_field_list = fields.clone();
    let fields_template_create = fields.clone();

    let ingest_upload_state = ingest_state.clone();
    let ingest_map_state = ingest_state.clone();
    let ingest_options_state = ingest_state.clone();
    let ingest_template_state = ingest_state.clone();
    let ingest_validate_state = ingest_state.clone();
    let ingest_commit_state = ingest_state.clone();
    let ingest_errors_state = ingest_state.clone();
    let ingest_discard_state = ingest_state;

    // Spawn handlers
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub).await
    });

    let field_list_handle = tokio::spawn(async move {
        field::handle_list(client_field_list, field_list_sub, secret_field_list, fields_field_list).await
    });

    let job_history_handle = tokio::spawn(async move {
        jobs::handle_job_history(client_job_history, job_history_sub, secret_job_history).await
    });

    let debtor_create_handle = tokio::spawn(async move {
        debtor::handle_create(client_debtor_create, debtor_create_sub, pool_debtor_create, secret_debtor_create).await
    });

    let debtor_get_handle = tokio::spawn(async move {
        debtor::handle_get(client_debtor_get, debtor_get_sub, pool_debtor_get, secret_debtor_get).await
    });

    let debtor_list_handle = tokio::spawn(async move {
        debtor::handle_list(client_debtor_list, debtor_list_sub, pool_debtor_list, secret_debtor_list).await
    });

    let debtor_update_handle = tokio::spawn(async move {
        debtor::handle_update(client_debtor_update, debtor_update_sub, pool_debtor_update, secret_debtor_update).await
    });

    let debtor_delete_handle = tokio::spawn(async move {
        debtor::handle_delete(client_debtor_delete, debtor_delete_sub, pool_debtor_delete, secret_debtor_delete).await
    });

    let collector_list_handle = tokio::spawn(async move {
        collector::handle_list(client_collector_list, collector_list_sub, pool_collector_list, secret_collector_list).await
    });

    let template_create_handle = tokio::spawn(async move {
        mapping::handle_template_create(
            client_template_create,
            template_create_sub,
            pool_template_create,
            secret_template_create,
            fields_template_create,
        )
        .await
    });

    let template_list_handle = tokio::spawn(async move {
        mapping::handle_template_list(client_template_list, template_list_sub, pool_template_list, secret_template_list).await
    });

    let ingest_upload_handle = tokio::spawn(async move {
        ingest::handle_upload(client_ingest_upload, ingest_upload_sub, ingest_upload_state).await
    });

    let ingest_map_handle = tokio::spawn(async move {
        ingest::handle_map(client_ingest_map, ingest_map_sub, ingest_map_state).await
    });

    let ingest_options_handle = tokio::spawn(async move {
        ingest::handle_options(client_ingest_options, ingest_options_sub, ingest_options_state).await
    });

    let ingest_template_handle = tokio::spawn(async move {
        ingest::handle_template_apply(client_ingest_template, ingest_template_sub, ingest_template_state).await
    });

    let ingest_validate_handle = tokio::spawn(async move {
        ingest::handle_validate(client_ingest_validate, ingest_validate_sub, ingest_validate_state).await
    });

    let ingest_commit_handle = tokio::spawn(async move {
        ingest::handle_commit(client_ingest_commit, ingest_commit_sub, ingest_commit_state).await
    });

    let ingest_errors_handle = tokio::spawn(async move {
        ingest::handle_errors(client_ingest_errors, ingest_errors_sub, ingest_errors_state).await
    });

    let ingest_discard_handle = tokio::spawn(async move {
        ingest::handle_discard(client_ingest_discard, ingest_discard_sub, ingest_discard_state).await
    });

    let distribution_run_handle = tokio::spawn(async move {
        distribution::handle_run(client_distribution_run, distribution_run_sub, distribution_state).await
    });

    info!("All handlers started");

    // Wait for any handler to finish (which would indicate an error)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = field_list_handle => {
            error!("Field list handler finished: {:?}", result);
        }
        result = job_history_handle => {
            error!("Job history handler finished: {:?}", result);
        }
        result = debtor_create_handle => {
            error!("Debtor create handler finished: {:?}", result);
        }
        result = debtor_get_handle => {
            error!("Debtor get handler finished: {:?}", result);
        }
        result = debtor_list_handle => {
            error!("Debtor list handler finished: {:?}", result);
        }
        result = debtor_update_handle => {
            error!("Debtor update handler finished: {:?}", result);
        }
        result = debtor_delete_handle => {
            error!("Debtor delete handler finished: {:?}", result);
        }
        result = collector_list_handle => {
            error!("Collector list handler finished: {:?}", result);
        }
        result = template_create_handle => {
            error!("Template create handler finished: {:?}", result);
        }
        result = template_list_handle => {
            error!("Template list handler finished: {:?}", result);
        }
        result = ingest_upload_handle => {
            error!("Ingest upload handler finished: {:?}", result);
        }
        result = ingest_map_handle => {
            error!("Ingest map handler finished: {:?}", result);
        }
        result = ingest_options_handle => {
            error!("Ingest options handler finished: {:?}", result);
        }
        result = ingest_template_handle => {
            error!("Ingest template handler finished: {:?}", result);
        }
        result = ingest_validate_handle => {
            error!("Ingest validate handler finished: {:?}", result);
        }
        result = ingest_commit_handle => {
            error!("Ingest commit handler finished: {:?}", result);
        }
        result = ingest_errors_handle => {
            error!("Ingest errors handler finished: {:?}", result);
        }
        result = ingest_discard_handle => {
            error!("Ingest discard handler finished: {:?}", result);
        }
        result = distribution_run_handle => {
            error!("Distribution run handler finished: {:?}", result);
        }
    }

    Ok(())
}
