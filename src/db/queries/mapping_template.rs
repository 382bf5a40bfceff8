//! Mapping template database queries

use anyhow::Result;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::types::{CreateTemplateRequest, MappingTemplate};

/// Save a mapping template
pub async fn create_template(pool: &PgPool, created_by: &str, request: &CreateTemplateRequest) -> Result<MappingTemplate> {
    let template = sqlx::query_as::<_, MappingTemplate>(
        r#"
        INSERT INTO mapping_templates (name, headers, mapping, created_by, created_at)
        VALUES ($1, $2, $3, $4, NOW())
        RETURNING id, name, headers, mapping, created_by, created_at
        "#,
    )
    .bind(request.name.trim())
    .bind(Json(&request.headers))
    .bind(Json(&request.mapping))
    .bind(created_by)
    .fetch_one(pool)
    .await?;

    Ok(template)
}

/// Get a template by ID
pub async fn get_template(pool: &PgPool, id: i64) -> Result<Option<MappingTemplate>> {
    let template = sqlx::query_as::<_, MappingTemplate>(
        r#"
        SELECT id, name, headers, mapping, created_by, created_at
        FROM mapping_templates
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(template)
}

/// List templates, newest first
pub async fn list_templates(pool: &PgPool, limit: i64, offset: i64) -> Result<(Vec<MappingTemplate>, i64)> {
    let templates = sqlx::query_as::<_, MappingTemplate>(
        r#"
        SELECT id, name, headers, mapping, created_by, created_at
        FROM mapping_templates
        ORDER BY created_at DESC, id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM mapping_templates")
        .fetch_one(pool)
        .await?;

    Ok((templates, total))
}
