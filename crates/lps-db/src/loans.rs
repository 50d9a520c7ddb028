//! Loan application store: CRUD, status transitions with history, statistics.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use lps_schemas::LoanStatus;

const LOAN_COLUMNS: &str = "id, country_code, document_type, document_number, document_hash, \
     full_name, amount_requested, monthly_income, currency, status, risk_score, \
     requires_review, banking_info, extra_data, created_at, updated_at, processed_at";

#[derive(Debug, Clone)]
pub struct LoanRow {
    pub id: Uuid,
    pub country_code: String,
    pub document_type: String,
    /// Encrypted at rest.
    pub document_number: String,
    pub document_hash: String,
    /// Encrypted at rest.
    pub full_name: String,
    pub amount_requested: Decimal,
    pub monthly_income: Decimal,
    pub currency: String,
    pub status: LoanStatus,
    pub risk_score: Option<i32>,
    pub requires_review: bool,
    pub banking_info: Option<Value>,
    pub extra_data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

fn loan_from_row(row: &PgRow) -> Result<LoanRow> {
    Ok(LoanRow {
        id: row.try_get("id")?,
        country_code: row.try_get("country_code")?,
        document_type: row.try_get("document_type")?,
        document_number: row.try_get("document_number")?,
        document_hash: row.try_get("document_hash")?,
        full_name: row.try_get("full_name")?,
        amount_requested: row.try_get("amount_requested")?,
        monthly_income: row.try_get("monthly_income")?,
        currency: row.try_get("currency")?,
        status: LoanStatus::parse(&row.try_get::<String, _>("status")?)?,
        risk_score: row.try_get("risk_score")?,
        requires_review: row.try_get("requires_review")?,
        banking_info: row.try_get("banking_info")?,
        extra_data: row.try_get("extra_data")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct NewLoan {
    pub country_code: String,
    pub document_type: String,
    /// Already encrypted by the caller.
    pub document_number: String,
    pub document_hash: String,
    /// Already encrypted by the caller.
    pub full_name: String,
    pub amount_requested: Decimal,
    pub monthly_income: Decimal,
    pub currency: String,
    pub risk_score: Option<i32>,
    pub requires_review: bool,
    pub banking_info: Option<Value>,
    pub extra_data: Value,
}

/// Insert a new application plus its initial PENDING history row in one
/// transaction.
pub async fn create_loan(pool: &PgPool, new: &NewLoan) -> Result<LoanRow> {
    let mut tx = pool.begin().await.context("create_loan begin failed")?;

    let row = sqlx::query(&format!(
        r#"
        insert into loan_applications (
          country_code, document_type, document_number, document_hash, full_name,
          amount_requested, monthly_income, currency, status, risk_score,
          requires_review, banking_info, extra_data
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9, $10, $11, $12
        )
        returning {LOAN_COLUMNS}
        "#
    ))
    .bind(&new.country_code)
    .bind(&new.document_type)
    .bind(&new.document_number)
    .bind(&new.document_hash)
    .bind(&new.full_name)
    .bind(new.amount_requested)
    .bind(new.monthly_income)
    .bind(&new.currency)
    .bind(new.risk_score)
    .bind(new.requires_review)
    .bind(&new.banking_info)
    .bind(&new.extra_data)
    .fetch_one(&mut *tx)
    .await
    .context("create_loan insert failed")?;

    let loan = loan_from_row(&row)?;

    sqlx::query(
        r#"
        insert into loan_status_history (loan_id, previous_status, new_status, reason)
        values ($1, null, $2, 'Application created')
        "#,
    )
    .bind(loan.id)
    .bind(LoanStatus::Pending.as_str())
    .execute(&mut *tx)
    .await
    .context("create_loan initial history insert failed")?;

    tx.commit().await.context("create_loan commit failed")?;
    Ok(loan)
}

pub async fn fetch_loan(pool: &PgPool, loan_id: Uuid) -> Result<Option<LoanRow>> {
    let row = sqlx::query(&format!(
        "select {LOAN_COLUMNS} from loan_applications where id = $1"
    ))
    .bind(loan_id)
    .fetch_optional(pool)
    .await
    .context("fetch_loan failed")?;

    row.as_ref().map(loan_from_row).transpose()
}

/// Most recent application for a document hash; ties broken by id so the
/// result is deterministic.
pub async fn find_by_document_hash(
    pool: &PgPool,
    document_hash: &str,
    country_code: Option<&str>,
) -> Result<Option<LoanRow>> {
    let row = sqlx::query(&format!(
        r#"
        select {LOAN_COLUMNS}
        from loan_applications
        where document_hash = $1
          and ($2::varchar is null or country_code = $2)
        order by created_at desc, id desc
        limit 1
        "#
    ))
    .bind(document_hash)
    .bind(country_code)
    .fetch_optional(pool)
    .await
    .context("find_by_document_hash failed")?;

    row.as_ref().map(loan_from_row).transpose()
}

#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub country_code: Option<String>,
    pub status: Option<LoanStatus>,
    pub statuses: Option<Vec<LoanStatus>>,
    pub requires_review: Option<bool>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Substring match over the document hash.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum LoanOrder {
    #[default]
    CreatedAtDesc,
    CreatedAtAsc,
    AmountDesc,
    RiskScoreDesc,
}

impl LoanOrder {
    fn sql(&self) -> &'static str {
        match self {
            LoanOrder::CreatedAtDesc => "created_at desc",
            LoanOrder::CreatedAtAsc => "created_at asc",
            LoanOrder::AmountDesc => "amount_requested desc",
            LoanOrder::RiskScoreDesc => "risk_score desc nulls last",
        }
    }
}

fn push_filter_conditions<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a LoanFilter) {
    qb.push(" where true");
    if let Some(cc) = &filter.country_code {
        qb.push(" and country_code = ").push_bind(cc.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" and status = ").push_bind(status.as_str());
    } else if let Some(statuses) = &filter.statuses {
        qb.push(" and status = any(");
        qb.push_bind(statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        qb.push(")");
    }
    if let Some(rr) = filter.requires_review {
        qb.push(" and requires_review = ").push_bind(rr);
    }
    if let Some(min) = filter.min_amount {
        qb.push(" and amount_requested >= ").push_bind(min);
    }
    if let Some(max) = filter.max_amount {
        qb.push(" and amount_requested <= ").push_bind(max);
    }
    if let Some(from) = filter.date_from {
        qb.push(" and created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" and created_at <= ").push_bind(to);
    }
    if let Some(search) = &filter.search {
        qb.push(" and document_hash ilike ")
            .push_bind(format!("%{search}%"));
    }
}

pub async fn list_loans(
    pool: &PgPool,
    filter: &LoanFilter,
    skip: i64,
    limit: i64,
    order: LoanOrder,
) -> Result<Vec<LoanRow>> {
    let mut qb = QueryBuilder::new(format!("select {LOAN_COLUMNS} from loan_applications"));
    push_filter_conditions(&mut qb, filter);
    qb.push(format!(" order by {}", order.sql()));
    qb.push(" offset ").push_bind(skip);
    qb.push(" limit ").push_bind(limit);

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("list_loans failed")?;

    rows.iter().map(loan_from_row).collect()
}

pub async fn count_loans(pool: &PgPool, filter: &LoanFilter) -> Result<i64> {
    let mut qb = QueryBuilder::new("select count(*)::bigint from loan_applications");
    push_filter_conditions(&mut qb, filter);

    let row = qb
        .build()
        .fetch_one(pool)
        .await
        .context("count_loans failed")?;
    Ok(row.try_get::<i64, _>(0)?)
}

/// Apply a status change and append the matching history row in one
/// transaction. The row lock taken by `for update` serialises concurrent
/// transitions on the same loan. `processed_at` is stamped when the new
/// status is APPROVED, REJECTED, or DISBURSED.
///
/// Returns `None` when the loan does not exist. Graph validity is the
/// caller's concern (`lps-service`).
pub async fn update_status(
    pool: &PgPool,
    loan_id: Uuid,
    new_status: LoanStatus,
    changed_by: Option<Uuid>,
    reason: Option<&str>,
    extra_data: Option<&Value>,
) -> Result<Option<LoanRow>> {
    let mut tx = pool.begin().await.context("update_status begin failed")?;

    let current: Option<(String,)> = sqlx::query_as(
        "select status from loan_applications where id = $1 for update",
    )
    .bind(loan_id)
    .fetch_optional(&mut *tx)
    .await
    .context("update_status load failed")?;

    let Some((old_status,)) = current else {
        return Ok(None);
    };

    let stamp_processed = matches!(
        new_status,
        LoanStatus::Approved | LoanStatus::Rejected | LoanStatus::Disbursed
    );

    let row = sqlx::query(&format!(
        r#"
        update loan_applications
           set status = $2,
               processed_at = case when $3 then now() else processed_at end
         where id = $1
        returning {LOAN_COLUMNS}
        "#
    ))
    .bind(loan_id)
    .bind(new_status.as_str())
    .bind(stamp_processed)
    .fetch_one(&mut *tx)
    .await
    .context("update_status update failed")?;

    sqlx::query(
        r#"
        insert into loan_status_history
            (loan_id, previous_status, new_status, changed_by, reason, extra_data)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(loan_id)
    .bind(&old_status)
    .bind(new_status.as_str())
    .bind(changed_by)
    .bind(reason)
    .bind(extra_data)
    .execute(&mut *tx)
    .await
    .context("update_status history insert failed")?;

    tx.commit().await.context("update_status commit failed")?;
    Ok(Some(loan_from_row(&row)?))
}

/// Overwrite the risk score (inbound `risk_assessment` webhook path).
pub async fn update_risk_score(pool: &PgPool, loan_id: Uuid, risk_score: i32) -> Result<bool> {
    let result = sqlx::query("update loan_applications set risk_score = $2 where id = $1")
        .bind(loan_id)
        .bind(risk_score)
        .execute(pool)
        .await
        .context("update_risk_score failed")?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone)]
pub struct StatusHistoryRow {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub changed_by: Option<Uuid>,
    pub reason: Option<String>,
    pub extra_data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Full transition trail, oldest first.
pub async fn status_history(pool: &PgPool, loan_id: Uuid) -> Result<Vec<StatusHistoryRow>> {
    let rows = sqlx::query(
        r#"
        select id, loan_id, previous_status, new_status, changed_by, reason,
               extra_data, created_at
        from loan_status_history
        where loan_id = $1
        order by created_at asc, id asc
        "#,
    )
    .bind(loan_id)
    .fetch_all(pool)
    .await
    .context("status_history failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StatusHistoryRow {
            id: row.try_get("id")?,
            loan_id: row.try_get("loan_id")?,
            previous_status: row.try_get("previous_status")?,
            new_status: row.try_get("new_status")?,
            changed_by: row.try_get("changed_by")?,
            reason: row.try_get("reason")?,
            extra_data: row.try_get("extra_data")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoanStatistics {
    pub total_loans: i64,
    pub by_status: Map<String, Value>,
    pub by_country: Map<String, Value>,
    pub total_amount_requested: f64,
    pub average_amount: f64,
    pub average_risk_score: Option<f64>,
    pub pending_review_count: i64,
}

/// Aggregates computed in the database: counts per status and country,
/// amount totals/averages, average risk score ignoring nulls, and the count
/// of active applications flagged for review.
pub async fn loan_statistics(pool: &PgPool, country_code: Option<&str>) -> Result<LoanStatistics> {
    let totals = sqlx::query(
        r#"
        select
            count(*)::bigint                                   as total_loans,
            coalesce(sum(amount_requested), 0)::float8         as total_amount,
            coalesce(avg(amount_requested), 0)::float8         as average_amount,
            avg(risk_score)::float8                            as average_risk_score,
            count(*) filter (
                where requires_review and status in ('PENDING', 'IN_REVIEW')
            )::bigint                                          as pending_review_count
        from loan_applications
        where ($1::varchar is null or country_code = $1)
        "#,
    )
    .bind(country_code)
    .fetch_one(pool)
    .await
    .context("loan_statistics totals failed")?;

    let status_rows = sqlx::query(
        r#"
        select status, count(*)::bigint as count
        from loan_applications
        where ($1::varchar is null or country_code = $1)
        group by status
        "#,
    )
    .bind(country_code)
    .fetch_all(pool)
    .await
    .context("loan_statistics status counts failed")?;

    let mut by_status = Map::new();
    for st in LoanStatus::ALL {
        by_status.insert(st.as_str().to_string(), Value::from(0));
    }
    for row in &status_rows {
        let status: String = row.try_get("status")?;
        let count: i64 = row.try_get("count")?;
        by_status.insert(status, Value::from(count));
    }

    let country_rows = sqlx::query(
        r#"
        select country_code, count(*)::bigint as count
        from loan_applications
        where ($1::varchar is null or country_code = $1)
        group by country_code
        "#,
    )
    .bind(country_code)
    .fetch_all(pool)
    .await
    .context("loan_statistics country counts failed")?;

    let mut by_country = Map::new();
    for row in &country_rows {
        let cc: String = row.try_get("country_code")?;
        let count: i64 = row.try_get("count")?;
        by_country.insert(cc, Value::from(count));
    }

    Ok(LoanStatistics {
        total_loans: totals.try_get("total_loans")?,
        by_status,
        by_country,
        total_amount_requested: totals.try_get("total_amount")?,
        average_amount: totals.try_get("average_amount")?,
        average_risk_score: totals.try_get("average_risk_score")?,
        pending_review_count: totals.try_get("pending_review_count")?,
    })
}
