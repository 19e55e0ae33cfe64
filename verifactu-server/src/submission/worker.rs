//! Submission Worker - 后台提交队列
//!
//! 定稿后通过 mpsc 通道投递发票 ID；另有定时重扫处理
//! `pending` / `error` 的积压记录 (独立任务，不阻塞通道与关闭信号)。
//! 收到取消信号后通知重扫任务，宽限期后仍未结束则中止。

use super::service::SubmissionService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Queue capacity; producers never block finalization on a full queue
const QUEUE_CAPACITY: usize = 1024;
/// Concurrent submissions in flight
const SUBMIT_CONCURRENCY: usize = 4;
/// Records per sweep
const SWEEP_BATCH: i64 = 100;
/// Time a running sweep gets to wind down after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Producer side, held by the finalization pipeline
#[derive(Clone)]
pub struct SubmissionQueue {
    tx: mpsc::Sender<i64>,
}

impl SubmissionQueue {
    pub fn channel() -> (Self, mpsc::Receiver<i64>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Fire-and-forget; a dropped id is picked up by the next sweep
    pub fn enqueue(&self, invoice_id: i64) {
        if let Err(e) = self.tx.try_send(invoice_id) {
            tracing::warn!(invoice_id, error = %e, "Submission queue full, deferring to sweep");
        }
    }
}

pub struct SubmissionWorker {
    service: SubmissionService,
    sweep_interval: Duration,
    semaphore: Arc<Semaphore>,
}

impl SubmissionWorker {
    pub fn new(service: SubmissionService, sweep_interval: Duration) -> Self {
        Self {
            service,
            sweep_interval: sweep_interval.max(Duration::from_secs(1)),
            semaphore: Arc::new(Semaphore::new(SUBMIT_CONCURRENCY)),
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<i64>, shutdown: CancellationToken) {
        tracing::info!(
            sweep_secs = self.sweep_interval.as_secs(),
            concurrency = SUBMIT_CONCURRENCY,
            "SubmissionWorker started"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        let mut running: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("SubmissionWorker received shutdown signal");
                    break;
                }
                id = rx.recv() => {
                    let Some(invoice_id) = id else {
                        tracing::info!("Submission channel closed, shutting down SubmissionWorker");
                        break;
                    };
                    let semaphore = self.semaphore.clone();
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return;
                        };
                        if let Err(e) = service.submit(invoice_id).await {
                            tracing::warn!(invoice_id, error = %e, "Queued submission failed");
                        }
                    });
                }
                _ = sweep.tick() => {
                    if running.as_ref().is_some_and(|h| !h.is_finished()) {
                        tracing::debug!("Previous submission sweep still running, skipping tick");
                        continue;
                    }
                    running = Some(self.spawn_sweep(shutdown.child_token()));
                }
            }
        }

        if let Some(handle) = running {
            Self::wind_down(handle, &shutdown).await;
        }
        tracing::info!("SubmissionWorker stopped");
    }

    fn spawn_sweep(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let service = self.service.clone();
        tokio::spawn(async move {
            match service.sweep(SWEEP_BATCH, &cancel).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(accepted = n, "Submission sweep finished"),
                Err(e) => tracing::error!(error = %e, "Submission sweep failed"),
            }
        })
    }

    /// Abort a sweep that outlives the grace period; without shutdown, abort at once
    async fn wind_down(mut handle: JoinHandle<()>, shutdown: &CancellationToken) {
        if handle.is_finished() {
            return;
        }
        if !shutdown.is_cancelled() {
            handle.abort();
            return;
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            tracing::warn!("Submission sweep did not stop in time, aborting");
            handle.abort();
        }
    }
}
