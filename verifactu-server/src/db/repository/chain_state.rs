//! Chain State Repository (每个组织的链尾)

use super::RepoResult;
use shared::models::ChainState;
use sqlx::{SqliteConnection, SqlitePool};

const SELECT_COLUMNS: &str = "SELECT org_id, tail_hash, tail_invoice_id, length, updated_at FROM chain_state";

pub async fn get(pool: &SqlitePool, org_id: &str) -> RepoResult<Option<ChainState>> {
    let state = sqlx::query_as::<_, ChainState>(&format!("{SELECT_COLUMNS} WHERE org_id = ?"))
        .bind(org_id)
        .fetch_optional(pool)
        .await?;
    Ok(state)
}

/// Tail read inside the finalization transaction
///
/// A no-op write first upgrades the transaction to a writer (waits on
/// `busy_timeout`), so the tail cannot go stale between read and CAS.
pub async fn get_for_update(
    conn: &mut SqliteConnection,
    org_id: &str,
) -> RepoResult<Option<ChainState>> {
    sqlx::query("UPDATE chain_state SET org_id = org_id WHERE org_id = ?")
        .bind(org_id)
        .execute(&mut *conn)
        .await?;

    let state = sqlx::query_as::<_, ChainState>(&format!("{SELECT_COLUMNS} WHERE org_id = ?"))
        .bind(org_id)
        .fetch_optional(conn)
        .await?;
    Ok(state)
}

/// Compare-and-swap the tail
///
/// `expected_tail = None` claims the genesis slot (no row yet).
/// Returns `false` when another writer moved the tail first.
pub async fn compare_and_swap(
    conn: &mut SqliteConnection,
    org_id: &str,
    expected_tail: Option<&str>,
    new_tail: &str,
    tail_invoice_id: i64,
) -> RepoResult<bool> {
    let now = shared::util::now_millis();
    let rows = match expected_tail {
        None => {
            sqlx::query(
                "INSERT INTO chain_state (org_id, tail_hash, tail_invoice_id, length, updated_at) VALUES (?1, ?2, ?3, 1, ?4) ON CONFLICT(org_id) DO NOTHING",
            )
            .bind(org_id)
            .bind(new_tail)
            .bind(tail_invoice_id)
            .bind(now)
            .execute(conn)
            .await?
        }
        Some(expected) => {
            sqlx::query(
                "UPDATE chain_state SET tail_hash = ?1, tail_invoice_id = ?2, length = length + 1, updated_at = ?3 WHERE org_id = ?4 AND tail_hash = ?5",
            )
            .bind(new_tail)
            .bind(tail_invoice_id)
            .bind(now)
            .bind(org_id)
            .bind(expected)
            .execute(conn)
            .await?
        }
    };
    Ok(rows.rows_affected() == 1)
}

/// All organizations that have at least one chained record
pub async fn list_orgs(pool: &SqlitePool) -> RepoResult<Vec<String>> {
    let orgs = sqlx::query_scalar::<_, String>("SELECT org_id FROM chain_state ORDER BY org_id")
        .fetch_all(pool)
        .await?;
    Ok(orgs)
}
