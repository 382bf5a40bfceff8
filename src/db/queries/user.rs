//! User database queries

use anyhow::Result;
use sqlx::PgPool;

use crate::types::{CollectorSummary, Role, User};

/// Create or refresh a user record from identity-provider data
pub async fn upsert_user(pool: &PgPool, user_id: &str, email: &str, role: Role) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, role, created_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, role = EXCLUDED.role
        RETURNING id, email, display_name, role, created_at
        "#,
    )
    .bind(user_id)
    .bind(email)
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;

    Ok(user)
}

/// Collectors with their assigned debtor count
pub async fn list_collectors(pool: &PgPool) -> Result<Vec<CollectorSummary>> {
    let collectors = sqlx::query_as::<_, CollectorSummary>(
        r#"
        SELECT u.id, u.email, u.display_name, COUNT(d.id) AS assigned_count
        FROM users u
        LEFT JOIN debtors d ON d.collector_id = u.id
        WHERE u.role = 'collector'
        GROUP BY u.id, u.email, u.display_name
        ORDER BY u.email
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(collectors)
}

/// Ids from `ids` that are not users with the collector role, in input order
pub async fn unknown_collectors(pool: &PgPool, ids: &[String]) -> Result<Vec<String>> {
    let found: Vec<String> = sqlx::query_scalar::<_, String>(
        "SELECT id FROM users WHERE role = 'collector' AND id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(missing_from(ids, &found))
}

fn missing_from(requested: &[String], found: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|id| !found.contains(id))
        .cloned()
        .collect()
}
