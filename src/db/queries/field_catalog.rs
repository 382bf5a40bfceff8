//! Schema introspection for the field catalog

use anyhow::Result;
use sqlx::PgPool;

use crate::services::field_catalog::catalog_tables;
use crate::types::ColumnInfo;

/// Columns of the catalog tables in table then ordinal order
pub async fn list_catalog_columns(pool: &PgPool) -> Result<Vec<ColumnInfo>> {
    let tables: Vec<String> = catalog_tables().into_iter().map(String::from).collect();

    let columns = sqlx::query_as::<_, ColumnInfo>(
        r#"
        SELECT
            table_name::text AS table_name,
            column_name::text AS column_name,
            data_type::text AS data_type
        FROM information_schema.columns
        WHERE table_schema = current_schema()
          AND table_name::text = ANY($1)
        ORDER BY array_position($1, table_name::text), ordinal_position
        "#,
    )
    .bind(&tables)
    .fetch_all(pool)
    .await?;

    Ok(columns)
}
