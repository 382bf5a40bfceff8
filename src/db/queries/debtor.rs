//! Debtor database queries

use anyhow::Result;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::services::store::{DebtorStore, StoreError};
use crate::types::{BankAccount, Debtor, DebtorFilter, DebtorInput, ListDebtorsRequest, Relation, UpdateDebtorRequest};

const DEBTOR_COLUMNS: &str = r#"
    id,
    first_name, last_name, national_id, date_of_birth, sex, religion, marital_status,
    email, mobile_phones, home_phone, address, city, postal_code,
    company_name, job_title, office_address, office_phone,
    product_name, loan_account_number,
    principal_amount, outstanding_amount, last_payment_amount, last_payment_date,
    total_paid, installment_amount, tenor_months, days_past_due,
    status, forecast, next_follow_up_date, size, notes, collector_id,
    created_at, updated_at
"#;

// ============================================================================
// Filtering
// ============================================================================

/// WHERE conditions with positional text parameters
#[derive(Debug, Default)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<String>,
}

impl Conditions {
    /// Add a condition taking one parameter; `build` receives its placeholder index
    fn bind(&mut self, value: String, build: impl FnOnce(usize) -> String) {
        self.params.push(value);
        self.clauses.push(build(self.params.len()));
    }

    fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            "TRUE".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    fn next_index(&self) -> usize {
        self.params.len() + 1
    }
}

/// Conditions for a debtor filter. `collector_scope` restricts the result
/// to one collector's debtors regardless of the filter.
fn filter_conditions(filter: &DebtorFilter, collector_scope: Option<&str>) -> Conditions {
    let mut conditions = Conditions::default();

    if let Some(ref product) = filter.product_name {
        conditions.bind(product.clone(), |i| format!("product_name = ${}", i));
    }
    if let Some(ref status) = filter.status {
        conditions.bind(status.clone(), |i| format!("status = ${}", i));
    }
    if let Some(ref city) = filter.city {
        conditions.bind(city.clone(), |i| format!("city ILIKE ${}", i));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.bind(format!("%{}%", search), |i| {
            format!(
                "(first_name ILIKE ${i} OR last_name ILIKE ${i} OR national_id ILIKE ${i} \
                 OR email ILIKE ${i} OR loan_account_number ILIKE ${i})",
                i = i
            )
        });
    }
    if let Some(ref collector) = filter.collector_id {
        conditions.bind(collector.clone(), |i| format!("collector_id = ${}", i));
    }
    if filter.unassigned_only {
        conditions.raw("collector_id IS NULL");
    }
    if let Some(collector) = collector_scope {
        conditions.bind(collector.to_string(), |i| format!("collector_id = ${}", i));
    }

    conditions
}

/// Whitelisted ORDER BY column for a wire sort field
fn sort_column(sort_by: Option<&str>) -> &'static str {
    match sort_by {
        Some("firstName") => "first_name",
        Some("outstandingAmount") => "outstanding_amount",
        Some("daysPastDue") => "days_past_due",
        Some("nextFollowUpDate") => "next_follow_up_date",
        _ => "id",
    }
}

fn sort_direction(sort_order: Option<&str>) -> &'static str {
    match sort_order {
        Some(s) if s.eq_ignore_ascii_case("desc") => "DESC",
        _ => "ASC",
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Map a unique violation on the debtor table to the offending field
fn unique_violation(err: sqlx::Error, national_id: Option<&str>, email: Option<&str>) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            let duplicate = match db_err.constraint() {
                Some("debtors_national_id_key") => Some(("nationalId", national_id)),
                Some("debtors_email_key") => Some(("email", email)),
                _ => None,
            };
            if let Some((field, value)) = duplicate {
                return StoreError::Duplicate {
                    field: field.to_string(),
                    value: value.unwrap_or_default().to_string(),
                };
            }
        }
    }
    StoreError::Database(err)
}

/// Insert a debtor with its relations and bank accounts in one transaction
pub async fn create_debtor(pool: &PgPool, input: &DebtorInput) -> Result<i64, StoreError> {
    let mut tx = pool.begin().await?;

    let id = insert_debtor(&mut tx, input)
        .await
        .map_err(|e| unique_violation(e, input.national_id.as_deref(), input.email.as_deref()))?;

    for relation in &input.relations {
        sqlx::query(
            "INSERT INTO relations (debtor_id, name, relationship, phone, address) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&relation.name)
        .bind(&relation.relationship)
        .bind(&relation.phone)
        .bind(&relation.address)
        .execute(&mut *tx)
        .await?;
    }

    for account in &input.bank_accounts {
        sqlx::query(
            "INSERT INTO bank_accounts (debtor_id, bank_name, account_number, account_holder) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(&account.bank_name)
        .bind(&account.account_number)
        .bind(&account.account_holder)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

async fn insert_debtor(tx: &mut Transaction<'_, Postgres>, input: &DebtorInput) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO debtors (
            first_name, last_name, national_id, date_of_birth, sex, religion, marital_status,
            email, mobile_phones, home_phone, address, city, postal_code,
            company_name, job_title, office_address, office_phone,
            product_name, loan_account_number,
            principal_amount, outstanding_amount, last_payment_amount, last_payment_date,
            total_paid, installment_amount, tenor_months, days_past_due,
            status, forecast, next_follow_up_date, size, notes, collector_id,
            created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7,
            $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17,
            $18, $19,
            $20, $21, $22, $23,
            $24, $25, $26, $27,
            $28, $29, $30, $31, $32, $33,
            NOW(), NOW()
        )
        RETURNING id
        "#,
    )
    .bind(&input.first_name)
    .bind(&input.last_name)
    .bind(&input.national_id)
    .bind(input.date_of_birth)
    .bind(&input.sex)
    .bind(&input.religion)
    .bind(&input.marital_status)
    .bind(&input.email)
    .bind(Json(&input.mobile_phones))
    .bind(&input.home_phone)
    .bind(&input.address)
    .bind(&input.city)
    .bind(&input.postal_code)
    .bind(&input.company_name)
    .bind(&input.job_title)
    .bind(&input.office_address)
    .bind(&input.office_phone)
    .bind(&input.product_name)
    .bind(&input.loan_account_number)
    .bind(input.principal_amount)
    .bind(input.outstanding_amount)
    .bind(input.last_payment_amount)
    .bind(input.last_payment_date)
    .bind(input.total_paid)
    .bind(input.installment_amount)
    .bind(input.tenor_months)
    .bind(input.days_past_due)
    .bind(&input.status)
    .bind(&input.forecast)
    .bind(input.next_follow_up_date)
    .bind(&input.size)
    .bind(&input.notes)
    .bind(&input.collector_id)
    .fetch_one(&mut **tx)
    .await
}

/// Get a debtor with relations and bank accounts
pub async fn get_debtor(pool: &PgPool, id: i64, collector_scope: Option<&str>) -> Result<Option<Debtor>> {
    let query = format!(
        "SELECT {} FROM debtors WHERE id = $1 AND ($2::text IS NULL OR collector_id = $2)",
        DEBTOR_COLUMNS
    );
    let debtor = sqlx::query_as::<_, Debtor>(&query)
        .bind(id)
        .bind(collector_scope)
        .fetch_optional(pool)
        .await?;

    match debtor {
        Some(mut debtor) => {
            load_children(pool, &mut debtor).await?;
            Ok(Some(debtor))
        }
        None => Ok(None),
    }
}

async fn load_children(pool: &PgPool, debtor: &mut Debtor) -> Result<(), sqlx::Error> {
    debtor.relations = sqlx::query_as::<_, Relation>(
        r#"
        SELECT id, name, relationship, phone, address
        FROM relations
        WHERE debtor_id = $1
        ORDER BY id
        "#,
    )
    .bind(debtor.id)
    .fetch_all(pool)
    .await?;

    debtor.bank_accounts = sqlx::query_as::<_, BankAccount>(
        r#"
        SELECT id, bank_name, account_number, account_holder
        FROM bank_accounts
        WHERE debtor_id = $1
        ORDER BY id
        "#,
    )
    .bind(debtor.id)
    .fetch_all(pool)
    .await?;

    Ok(())
}

/// List debtors with filters, sorting and pagination. Child rows are not loaded.
pub async fn list_debtors(
    pool: &PgPool,
    request: &ListDebtorsRequest,
    collector_scope: Option<&str>,
) -> Result<(Vec<Debtor>, i64)> {
    let conditions = filter_conditions(&request.filter, collector_scope);
    let where_clause = conditions.where_clause();
    let limit_idx = conditions.next_index();

    let query = format!(
        r#"
        SELECT {}
        FROM debtors
        WHERE {}
        ORDER BY {} {} NULLS LAST, id ASC
        LIMIT ${} OFFSET ${}
        "#,
        DEBTOR_COLUMNS,
        where_clause,
        sort_column(request.sort_by.as_deref()),
        sort_direction(request.sort_order.as_deref()),
        limit_idx,
        limit_idx + 1
    );
    let count_query = format!("SELECT COUNT(*) FROM debtors WHERE {}", where_clause);

    let mut query_builder = sqlx::query_as::<_, Debtor>(&query);
    let mut count_builder = sqlx::query_scalar::<_, i64>(&count_query);
    for param in &conditions.params {
        query_builder = query_builder.bind(param);
        count_builder = count_builder.bind(param);
    }
    query_builder = query_builder.bind(request.page_limit()).bind(request.page_offset());

    let debtors = query_builder.fetch_all(pool).await?;
    let total = count_builder.fetch_one(pool).await?;

    Ok((debtors, total))
}

/// Ids of unassigned debtors matching the filter, ordered by id
pub async fn unassigned_debtor_ids(pool: &PgPool, filter: &DebtorFilter) -> Result<Vec<i64>> {
    let filter = DebtorFilter {
        collector_id: None,
        unassigned_only: true,
        ..filter.clone()
    };
    let conditions = filter_conditions(&filter, None);
    let query = format!("SELECT id FROM debtors WHERE {} ORDER BY id", conditions.where_clause());

    let mut query_builder = sqlx::query_scalar::<_, i64>(&query);
    for param in &conditions.params {
        query_builder = query_builder.bind(param);
    }

    Ok(query_builder.fetch_all(pool).await?)
}

/// Apply a partial update and record it in the audit log.
/// Returns `None` when the debtor does not exist or is outside `collector_scope`.
pub async fn update_debtor(
    pool: &PgPool,
    actor_id: &str,
    patch: &UpdateDebtorRequest,
    collector_scope: Option<&str>,
) -> Result<Option<Debtor>, StoreError> {
    let mut tx = pool.begin().await?;

    let query = format!(
        r#"
        UPDATE debtors
        SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            national_id = COALESCE($4, national_id),
            date_of_birth = COALESCE($5, date_of_birth),
            sex = COALESCE($6, sex),
            religion = COALESCE($7, religion),
            marital_status = COALESCE($8, marital_status),
            email = COALESCE($9, email),
            mobile_phones = COALESCE($10, mobile_phones),
            home_phone = COALESCE($11, home_phone),
            address = COALESCE($12, address),
            city = COALESCE($13, city),
            postal_code = COALESCE($14, postal_code),
            company_name = COALESCE($15, company_name),
            job_title = COALESCE($16, job_title),
            office_address = COALESCE($17, office_address),
            office_phone = COALESCE($18, office_phone),
            product_name = COALESCE($19, product_name),
            loan_account_number = COALESCE($20, loan_account_number),
            principal_amount = COALESCE($21, principal_amount),
            outstanding_amount = COALESCE($22, outstanding_amount),
            last_payment_amount = COALESCE($23, last_payment_amount),
            last_payment_date = COALESCE($24, last_payment_date),
            total_paid = COALESCE($25, total_paid),
            installment_amount = COALESCE($26, installment_amount),
            tenor_months = COALESCE($27, tenor_months),
            days_past_due = COALESCE($28, days_past_due),
            status = COALESCE($29, status),
            forecast = COALESCE($30, forecast),
            next_follow_up_date = COALESCE($31, next_follow_up_date),
            size = COALESCE($32, size),
            notes = COALESCE($33, notes),
            collector_id = COALESCE($34, collector_id),
            updated_at = NOW()
        WHERE id = $1 AND ($35::text IS NULL OR collector_id = $35)
        RETURNING {}
        "#,
        DEBTOR_COLUMNS
    );

    let updated = sqlx::query_as::<_, Debtor>(&query)
        .bind(patch.id)
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.national_id)
        .bind(patch.date_of_birth)
        .bind(&patch.sex)
        .bind(&patch.religion)
        .bind(&patch.marital_status)
        .bind(&patch.email)
        .bind(patch.mobile_phones.as_ref().map(Json))
        .bind(&patch.home_phone)
        .bind(&patch.address)
        .bind(&patch.city)
        .bind(&patch.postal_code)
        .bind(&patch.company_name)
        .bind(&patch.job_title)
        .bind(&patch.office_address)
        .bind(&patch.office_phone)
        .bind(&patch.product_name)
        .bind(&patch.loan_account_number)
        .bind(patch.principal_amount)
        .bind(patch.outstanding_amount)
        .bind(patch.last_payment_amount)
        .bind(patch.last_payment_date)
        .bind(patch.total_paid)
        .bind(patch.installment_amount)
        .bind(patch.tenor_months)
        .bind(patch.days_past_due)
        .bind(&patch.status)
        .bind(&patch.forecast)
        .bind(patch.next_follow_up_date)
        .bind(&patch.size)
        .bind(&patch.notes)
        .bind(&patch.collector_id)
        .bind(collector_scope)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, patch.national_id.as_deref(), patch.email.as_deref()))?;

    let Some(mut debtor) = updated else {
        return Ok(None);
    };

    sqlx::query("INSERT INTO audit_logs (debtor_id, actor_id, action, changes) VALUES ($1, $2, 'update', $3)")
        .bind(debtor.id)
        .bind(actor_id)
        .bind(Json(audit_changes(patch)))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    load_children(pool, &mut debtor).await?;
    Ok(Some(debtor))
}

/// Changed fields of a patch as a JSON object (wire names, no nulls)
fn audit_changes(patch: &UpdateDebtorRequest) -> serde_json::Value {
    let mut changes = match serde_json::to_value(patch) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    changes.remove("id");
    changes.retain(|_, v| !v.is_null());
    serde_json::Value::Object(changes)
}

/// Delete a debtor (children cascade)
pub async fn delete_debtor(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM debtors WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Set one collector on many debtors in a single statement
pub async fn assign_collector(pool: &PgPool, debtor_ids: &[i64], collector_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE debtors SET collector_id = $1, updated_at = NOW() WHERE id = ANY($2)")
        .bind(collector_id)
        .bind(debtor_ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL-backed record store
#[derive(Clone)]
pub struct PgDebtorStore {
    pool: PgPool,
}

impl PgDebtorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DebtorStore for PgDebtorStore {
    async fn create_debtor(&self, input: &DebtorInput) -> Result<i64, StoreError> {
        create_debtor(&self.pool, input).await
    }

    async fn assign_collector(&self, debtor_ids: &[i64], collector_id: &str) -> Result<u64, StoreError> {
        Ok(assign_collector(&self.pool, debtor_ids, collector_id).await?)
    }
}
