//! Submission Attempt Repository (提交审计日志)

use super::RepoResult;
use shared::models::SubmissionAttempt;
use sqlx::SqlitePool;

pub async fn insert(
    pool: &SqlitePool,
    invoice_id: i64,
    attempt: i64,
    outcome: &str,
    http_status: Option<u16>,
    detail: Option<&str>,
) -> RepoResult<i64> {
    let now = shared::util::now_millis();
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO submission_attempt (invoice_id, attempt, outcome, http_status, detail, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
    )
    .bind(invoice_id)
    .bind(attempt)
    .bind(outcome)
    .bind(http_status.map(i64::from))
    .bind(detail)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn list_for_invoice(
    pool: &SqlitePool,
    invoice_id: i64,
) -> RepoResult<Vec<SubmissionAttempt>> {
    let rows = sqlx::query_as::<_, SubmissionAttempt>(
        "SELECT id, invoice_id, attempt, outcome, http_status, detail, created_at FROM submission_attempt WHERE invoice_id = ? ORDER BY id",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
