use crate::chain::{ChainBuilder, ChainVerifyScheduler};
use crate::core::Config;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::db::DbService;
use crate::db::repository::invoice;
use crate::invoicing::InvoiceService;
use crate::signing::CertificateStore;
use crate::submission::{
    AeatHttpClient, AuthorityClient, SubmissionQueue, SubmissionService, SubmissionWorker,
};
use crate::utils::AppError;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// 服务器状态 - 持有所有服务的共享引用
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | pool | SQLite 连接池 |
/// | chain | 组织级哈希链写入器 |
/// | certs | 组织签名证书缓存 |
/// | invoices | 定稿流程 |
/// | submissions | AEAT 提交 |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub pool: SqlitePool,
    pub chain: Arc<ChainBuilder>,
    pub certs: Arc<CertificateStore>,
    pub invoices: InvoiceService,
    pub submissions: SubmissionService,
    /// 发送端常驻，关闭自动提交时 worker 仍按周期重扫
    queue: SubmissionQueue,
    /// 提交队列接收端，由 [`start_background_tasks`](Self::start_background_tasks) 取走
    submission_rx: Arc<Mutex<Option<mpsc::Receiver<i64>>>>,
}

impl ServerState {
    /// 初始化服务器状态
    ///
    /// 1. 工作目录结构
    /// 2. 数据库 (work_dir/database/verifactu.db)
    /// 3. AEAT 客户端与各服务
    pub async fn initialize(config: &Config) -> Result<Self, AppError> {
        config
            .ensure_work_dir_structure()
            .map_err(|e| AppError::internal(format!("Failed to create work directory: {e}")))?;

        let db_path = config.database_path();
        let db = DbService::new(&db_path.to_string_lossy()).await?;

        let client = AeatHttpClient::new(config.aeat_endpoint.clone(), config.submission_timeout())
            .map_err(|e| AppError::internal(e.to_string()))?;
        tracing::info!(
            endpoint = %client.endpoint(),
            env = config.verifactu_env.as_str(),
            "AEAT client ready"
        );

        Self::build(config.clone(), db.pool, Arc::new(client))
    }

    /// Assemble services around an existing pool and authority client
    pub fn build(
        config: Config,
        pool: SqlitePool,
        client: Arc<dyn AuthorityClient>,
    ) -> Result<Self, AppError> {
        let qr_base_url = Url::parse(&config.qr_base_url).map_err(|e| {
            AppError::with_message(
                shared::error::ErrorCode::ConfigError,
                format!("Invalid QR_BASE_URL '{}': {e}", config.qr_base_url),
            )
        })?;

        let certs = Arc::new(
            CertificateStore::new(config.certs_dir(), config.p12_password.clone())
                .with_p12_chain_verification(config.verify_p12_chain),
        );
        let chain = Arc::new(ChainBuilder::new(pool.clone()));
        let submissions = SubmissionService::new(
            pool.clone(),
            client,
            certs.clone(),
            config.software.clone(),
        )
        .with_sweep_attempt_cap(config.submission_max_attempts);

        let (queue, rx) = SubmissionQueue::channel();
        let mut invoices = InvoiceService::new(
            pool.clone(),
            chain.clone(),
            certs.clone(),
            qr_base_url,
            config.signing_required,
        );
        if config.auto_submit {
            invoices = invoices.with_auto_submit(queue.clone());
        }

        Ok(Self {
            config,
            pool,
            chain,
            certs,
            invoices,
            submissions,
            queue,
            submission_rx: Arc::new(Mutex::new(Some(rx))),
        })
    }

    /// Hand a record to the background worker
    pub fn enqueue_submission(&self, invoice_id: i64) {
        self.queue.enqueue(invoice_id);
    }

    /// 启动后台任务
    ///
    /// - 崩溃遗留的 `submitted` 记录回到 `error`
    /// - 提交队列 worker
    /// - 哈希链定时校验
    /// - 日志清理
    pub async fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        match invoice::reset_in_flight(&self.pool).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(count = n, "Interrupted submissions reset to error"),
            Err(e) => tracing::error!(error = %e, "Failed to reset interrupted submissions"),
        }

        let rx = self
            .submission_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(rx) = rx {
            let worker = SubmissionWorker::new(
                self.submissions.clone(),
                Duration::from_secs(self.config.submission_sweep_secs),
            );
            let shutdown = tasks.shutdown_token();
            tasks.spawn("submission_worker", TaskKind::Worker, worker.run(rx, shutdown));
        }

        if self.config.chain_verify_interval_secs > 0 {
            let scheduler = ChainVerifyScheduler::new(
                self.pool.clone(),
                self.chain.clone(),
                Duration::from_secs(self.config.chain_verify_interval_secs),
                tasks.shutdown_token(),
            );
            tasks.spawn("chain_verify", TaskKind::Periodic, scheduler.run());
        }

        let log_dir = self.config.log_dir();
        let shutdown = tasks.shutdown_token();
        tasks.spawn("log_cleanup", TaskKind::Periodic, async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = crate::utils::logger::cleanup_old_logs(&log_dir) {
                            tracing::error!(error = %e, "Failed to cleanup old logs");
                        }
                    }
                }
            }
        });

        tasks.log_summary();
        tasks
    }
}
