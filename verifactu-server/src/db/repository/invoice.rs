//! Invoice Record Repository
//!
//! Chained columns are written once by [`insert`]; afterwards only the
//! submission columns move, always through a conditional update.

use super::RepoResult;
use shared::models::{InvoiceRecord, StatusSummary, SubmissionStatus};
use sqlx::{SqliteConnection, SqlitePool};

const SELECT_COLUMNS: &str = "SELECT id, org_id, chain_index, issuer_tax_id, issuer_name, series, number, issue_date, invoice_type, tax_amount, total_amount, recipient_tax_id, recipient_name, description, generated_at, previous_hash, current_hash, qr_payload, signature, signature_fingerprint, submission_status, attempts, authority_csv, rejection_code, rejection_reason, submitted_at, resolved_at, created_at FROM invoice_record";

pub async fn insert(conn: &mut SqliteConnection, r: &InvoiceRecord) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO invoice_record (id, org_id, chain_index, issuer_tax_id, issuer_name, series, number, issue_date, invoice_type, tax_amount, total_amount, recipient_tax_id, recipient_name, description, generated_at, previous_hash, current_hash, qr_payload, signature, signature_fingerprint, submission_status, attempts, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, 0, ?22)",
    )
    .bind(r.id)
    .bind(&r.org_id)
    .bind(r.chain_index)
    .bind(&r.issuer_tax_id)
    .bind(&r.issuer_name)
    .bind(&r.series)
    .bind(&r.number)
    .bind(&r.issue_date)
    .bind(r.invoice_type)
    .bind(&r.tax_amount)
    .bind(&r.total_amount)
    .bind(&r.recipient_tax_id)
    .bind(&r.recipient_name)
    .bind(&r.description)
    .bind(&r.generated_at)
    .bind(&r.previous_hash)
    .bind(&r.current_hash)
    .bind(&r.qr_payload)
    .bind(&r.signature)
    .bind(&r.signature_fingerprint)
    .bind(r.submission_status)
    .bind(r.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> RepoResult<Option<InvoiceRecord>> {
    let record = sqlx::query_as::<_, InvoiceRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// Lookup by (org, series, number) inside the finalization transaction
pub async fn exists_number(
    conn: &mut SqliteConnection,
    org_id: &str,
    series: &str,
    number: &str,
) -> RepoResult<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM invoice_record WHERE org_id = ? AND series = ? AND number = ?",
    )
    .bind(org_id)
    .bind(series)
    .bind(number)
    .fetch_optional(conn)
    .await?;
    Ok(found.is_some())
}

/// Full chain of one organization in chain order
pub async fn list_chain(pool: &SqlitePool, org_id: &str) -> RepoResult<Vec<InvoiceRecord>> {
    let records = sqlx::query_as::<_, InvoiceRecord>(&format!(
        "{SELECT_COLUMNS} WHERE org_id = ? ORDER BY chain_index"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Records waiting for (re)submission, oldest first
/// `max_attempts` 之后的记录不再自动重发，需人工处理
pub async fn list_needing_submission(
    pool: &SqlitePool,
    limit: i64,
    max_attempts: i64,
) -> RepoResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM invoice_record WHERE submission_status IN ('pending', 'error') AND attempts < ? ORDER BY created_at, id LIMIT ?",
    )
    .bind(max_attempts)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// `pending | error → submitted`
///
/// Returns `false` when the record is already in flight or terminal.
pub async fn mark_submitted(pool: &SqlitePool, id: i64) -> RepoResult<bool> {
    let now = shared::util::now_millis();
    let rows = sqlx::query(
        "UPDATE invoice_record SET submission_status = 'submitted', submitted_at = ?1 WHERE id = ?2 AND submission_status IN ('pending', 'error')",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(rows.rows_affected() == 1)
}

pub async fn increment_attempts(pool: &SqlitePool, id: i64) -> RepoResult<()> {
    sqlx::query("UPDATE invoice_record SET attempts = attempts + 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// `submitted → accepted`
pub async fn resolve_accepted(pool: &SqlitePool, id: i64, csv: Option<&str>) -> RepoResult<bool> {
    let now = shared::util::now_millis();
    let rows = sqlx::query(
        "UPDATE invoice_record SET submission_status = 'accepted', authority_csv = ?1, rejection_code = NULL, rejection_reason = NULL, resolved_at = ?2 WHERE id = ?3 AND submission_status = 'submitted'",
    )
    .bind(csv)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(rows.rows_affected() == 1)
}

/// `submitted → rejected`
/// 状态查询确认已登记: `pending | error → accepted`
pub async fn reconcile_accepted(pool: &SqlitePool, id: i64, csv: Option<&str>) -> RepoResult<bool> {
    let now = shared::util::now_millis();
    let rows = sqlx::query(
        "UPDATE invoice_record SET submission_status = 'accepted', authority_csv = COALESCE(?1, authority_csv), rejection_code = NULL, rejection_reason = NULL, resolved_at = ?2 WHERE id = ?3 AND submission_status IN ('pending', 'error')",
    )
    .bind(csv)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(rows.rows_affected() == 1)
}

/// Records that hit the attempt cap without reaching a terminal state
pub async fn count_exhausted(pool: &SqlitePool, max_attempts: i64) -> RepoResult<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM invoice_record WHERE submission_status IN ('pending', 'error') AND attempts >= ?",
    )
    .bind(max_attempts)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn resolve_rejected(
    pool: &SqlitePool,
    id: i64,
    code: &str,
    reason: &str,
) -> RepoResult<bool> {
    let now = shared::util::now_millis();
    let rows = sqlx::query(
        "UPDATE invoice_record SET submission_status = 'rejected', rejection_code = ?1, rejection_reason = ?2, resolved_at = ?3 WHERE id = ?4 AND submission_status = 'submitted'",
    )
    .bind(code)
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(rows.rows_affected() == 1)
}

/// `submitted → error` (retries exhausted, picked up again by the sweep)
pub async fn resolve_error(pool: &SqlitePool, id: i64) -> RepoResult<bool> {
    let now = shared::util::now_millis();
    let rows = sqlx::query(
        "UPDATE invoice_record SET submission_status = 'error', resolved_at = ?1 WHERE id = ?2 AND submission_status = 'submitted'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(rows.rows_affected() == 1)
}

/// Records left `submitted` by a crash go back to `error`
pub async fn reset_in_flight(pool: &SqlitePool) -> RepoResult<u64> {
    let rows = sqlx::query(
        "UPDATE invoice_record SET submission_status = 'error' WHERE submission_status = 'submitted'",
    )
    .execute(pool)
    .await?;
    Ok(rows.rows_affected())
}

pub async fn status_summary(pool: &SqlitePool, org_id: &str) -> RepoResult<StatusSummary> {
    let rows = sqlx::query_as::<_, (SubmissionStatus, i64)>(
        "SELECT submission_status, COUNT(*) FROM invoice_record WHERE org_id = ? GROUP BY submission_status",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    let mut summary = StatusSummary::default();
    for (status, count) in rows {
        summary.add(status, count);
    }
    Ok(summary)
}
