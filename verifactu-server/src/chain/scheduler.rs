//! 哈希链定时校验
//!
//! 注册为 `TaskKind::Periodic`。启动时校验一次，之后按间隔校验所有组织；
//! 断链只记录到 `chain` 日志目标供审计，不做修复。

use super::builder::ChainBuilder;
use crate::db::repository::chain_state;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ChainVerifyScheduler {
    pool: SqlitePool,
    chain: Arc<ChainBuilder>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ChainVerifyScheduler {
    pub fn new(
        pool: SqlitePool,
        chain: Arc<ChainBuilder>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            chain,
            interval: interval.max(Duration::from_secs(60)),
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Chain verify scheduler started");

        // first tick fires immediately
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let broken = self.verify_all().await;
                    if broken > 0 {
                        tracing::error!(target: "chain", broken, "Broken invoice chains detected");
                    }
                }
            }
        }

        tracing::info!("Chain verify scheduler stopped");
    }

    /// Verify every known organization, returns the number of broken chains
    pub async fn verify_all(&self) -> usize {
        let orgs = match chain_state::list_orgs(&self.pool).await {
            Ok(orgs) => orgs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list organizations for chain verification");
                return 0;
            }
        };

        let mut broken = 0;
        for org_id in orgs {
            match self.chain.verify_org(&org_id).await {
                Ok(report) if !report.valid => broken += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(org_id = %org_id, error = %e, "Chain verification failed"),
            }
        }
        broken
    }
}
