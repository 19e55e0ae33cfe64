//! 组织级串行化 + 链尾 CAS
//!
//! 同一组织的 "读链尾 → 计算哈希 → 持久化" 必须串行:
//! 进程内用 per-org `Mutex`，数据库层用 `chain_state.tail_hash` 上的
//! compare-and-swap 和 `UNIQUE(org_id, previous_hash)` 兜底。

use super::hash::{GENESIS_HASH, hashes_equal, verify_chain};
use crate::db::repository::{RepoError, chain_state, invoice};
use crate::error::{InputField, VerifactuError, VerifactuResult};
use dashmap::DashMap;
use shared::models::{BreakKind, ChainBreak, ChainState, ChainVerification, InvoiceRecord};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-organization chain writer
pub struct ChainBuilder {
    pool: SqlitePool,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChainBuilder {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: DashMap::new(),
        }
    }

    fn org_lock(&self, org_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(org_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Take the organization lock and open the append transaction
    ///
    /// Dropping the returned [`ChainAppend`] without [`ChainAppend::commit`]
    /// rolls everything back and releases the lock.
    pub async fn begin(&self, org_id: &str) -> VerifactuResult<ChainAppend> {
        let guard = self.org_lock(org_id).lock_owned().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VerifactuError::Database(e.to_string()))?;
        let tail = chain_state::get_for_update(&mut *tx, org_id).await?;

        Ok(ChainAppend {
            org_id: org_id.to_string(),
            tail,
            tx,
            _guard: guard,
        })
    }

    /// Verify the stored chain of one organization
    ///
    /// Besides the record walk, the persisted tail must point at the last
    /// record, which catches deletion of trailing records.
    pub async fn verify_org(&self, org_id: &str) -> VerifactuResult<ChainVerification> {
        let records = invoice::list_chain(&self.pool, org_id).await?;
        let mut report = verify_chain(&records);

        if report.valid {
            let state = chain_state::get(&self.pool, org_id).await?;
            let last_hash = records.last().map(|r| r.current_hash.as_str());
            let tail_ok = match &state {
                None => records.is_empty(),
                Some(state) => {
                    last_hash.is_some_and(|h| hashes_equal(h, &state.tail_hash))
                        && state.length == records.len() as i64
                }
            };
            if !tail_ok {
                report = ChainVerification::broken(
                    records.len(),
                    ChainBreak {
                        index: records.len(),
                        invoice_id: state
                            .as_ref()
                            .and_then(|s| s.tail_invoice_id)
                            .unwrap_or_default(),
                        kind: BreakKind::LinkMismatch,
                        expected: state
                            .map(|s| s.tail_hash)
                            .unwrap_or_else(|| GENESIS_HASH.to_string()),
                        actual: last_hash.unwrap_or(GENESIS_HASH).to_string(),
                    },
                );
            }
        }

        match &report.first_break {
            None => tracing::info!(
                target: "chain",
                org_id = %org_id,
                length = report.length,
                "Chain verified"
            ),
            Some(b) => tracing::warn!(
                target: "chain",
                org_id = %org_id,
                index = b.index,
                invoice_id = b.invoice_id,
                kind = ?b.kind,
                "Chain integrity broken"
            ),
        }
        Ok(report)
    }
}

/// Open append on one organization's chain (lock held)
pub struct ChainAppend {
    org_id: String,
    tail: Option<ChainState>,
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl ChainAppend {
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Hash the new record links to; `None` at genesis
    pub fn previous_hash(&self) -> Option<&str> {
        self.tail.as_ref().map(|t| t.tail_hash.as_str())
    }

    /// 0-based position of the record being appended
    pub fn next_index(&self) -> i64 {
        self.tail.as_ref().map(|t| t.length).unwrap_or(0)
    }

    /// Whether (series, number) is already chained for this organization
    pub async fn number_taken(&mut self, series: &str, number: &str) -> VerifactuResult<bool> {
        Ok(invoice::exists_number(&mut *self.tx, &self.org_id, series, number).await?)
    }

    /// Persist the record and advance the tail atomically
    pub async fn commit(mut self, record: &InvoiceRecord) -> VerifactuResult<()> {
        if record.previous_hash.as_deref() != self.previous_hash()
            || record.chain_index != self.next_index()
        {
            return Err(VerifactuError::ChainConflict(format!(
                "record {} does not extend the tail of {}",
                record.id, self.org_id
            )));
        }

        invoice::insert(&mut *self.tx, record)
            .await
            .map_err(|e| match e {
                RepoError::Duplicate(msg) if msg.contains("invoice_record.number") => {
                    VerifactuError::invalid(
                        InputField::DuplicateNumber,
                        format!("{} already chained", record.invoice_number()),
                    )
                }
                RepoError::Duplicate(msg) => VerifactuError::ChainConflict(msg),
                other => other.into(),
            })?;

        let expected_tail = self.tail.as_ref().map(|t| t.tail_hash.clone());
        let swapped = chain_state::compare_and_swap(
            &mut *self.tx,
            &self.org_id,
            expected_tail.as_deref(),
            &record.current_hash,
            record.id,
        )
        .await?;
        if !swapped {
            // tx dropped here → rollback
            return Err(VerifactuError::ChainConflict(format!(
                "tail of {} moved during append",
                self.org_id
            )));
        }

        self.tx
            .commit()
            .await
            .map_err(|e| VerifactuError::Database(e.to_string()))?;

        tracing::info!(
            target: "chain",
            org_id = %record.org_id,
            invoice_id = record.id,
            index = record.chain_index,
            hash = %record.current_hash,
            previous = record.previous_hash.as_deref().unwrap_or(GENESIS_HASH),
            "Record chained"
        );
        Ok(())
    }
}
