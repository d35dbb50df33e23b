//! 有界并发的传输执行池

use crate::storage::{ObjectStore, SourceNode, SourceTree, StorageError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 传输结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    Uploaded,
    Skipped,
    Failed,
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOutcome::Uploaded => write!(f, "uploaded"),
            TransferOutcome::Skipped => write!(f, "skipped"),
            TransferOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// 一次传输任务
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub node: SourceNode,
    pub key: String,
    pub overwrite: bool,
}

/// 传输池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 最大并发传输数
    pub max_workers: usize,
    /// 最大尝试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

/// 已提交任务的句柄
pub struct TransferHandle {
    pub key: String,
    join: JoinHandle<TransferOutcome>,
}

impl TransferHandle {
    /// 等待任务结束；任务本身异常退出时记为失败
    pub async fn outcome(self) -> TransferOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("传输任务异常退出 '{}': {}", self.key, e);
                TransferOutcome::Failed
            }
        }
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    submitted: AtomicU64,
}

/// 传输执行池
pub struct TransferWorkerPool {
    source: Arc<dyn SourceTree>,
    dest: Arc<dyn ObjectStore>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    stats: Arc<PoolStats>,
}

impl TransferWorkerPool {
    pub fn new(source: Arc<dyn SourceTree>, dest: Arc<dyn ObjectStore>, config: PoolConfig) -> Self {
        let workers = config.max_workers.max(1);
        Self {
            source,
            dest,
            semaphore: Arc::new(Semaphore::new(workers)),
            config,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// 提交任务，不等待空闲槽位
    pub fn submit(&self, task: TransferTask) -> TransferHandle {
        let key = task.key.clone();
        let semaphore = self.semaphore.clone();
        let source = self.source.clone();
        let dest = self.dest.clone();
        let stats = self.stats.clone();
        let config = self.config.clone();

        stats.submitted.fetch_add(1, Ordering::Relaxed);

        let join = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    error!("获取传输槽位失败 '{}': {}", task.key, e);
                    return TransferOutcome::Failed;
                }
            };

            let active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
            stats.peak.fetch_max(active, Ordering::SeqCst);
            let _active = scopeguard::guard(stats, |s| {
                s.active.fetch_sub(1, Ordering::SeqCst);
            });

            Self::run(&task, source.as_ref(), dest.as_ref(), &config).await
        });

        TransferHandle { key, join }
    }

    /// 带重试的传输
    async fn run(
        task: &TransferTask,
        source: &dyn SourceTree,
        dest: &dyn ObjectStore,
        config: &PoolConfig,
    ) -> TransferOutcome {
        let attempts = config.max_retries.max(1);

        for attempt in 0..attempts {
            debug!(
                "开始传输 {} -> {} (第 {}/{} 次, overwrite={})",
                task.node.name,
                task.key,
                attempt + 1,
                attempts,
                task.overwrite
            );

            match Self::transfer_once(task, source, dest).await {
                Ok(bytes) => {
                    let action = if task.overwrite { "已覆盖" } else { "已上传" };
                    info!("{}: {} ({} 字节)", action, task.key, bytes);
                    return TransferOutcome::Uploaded;
                }
                Err(StorageError::AlreadyExists(_)) => {
                    info!("目标 '{}' 已存在且不允许覆盖，跳过", task.key);
                    return TransferOutcome::Skipped;
                }
                Err(e) if !e.is_retryable() => {
                    error!("传输 '{}' 失败且不可重试 (第 {} 次): {}", task.key, attempt + 1, e);
                    return TransferOutcome::Failed;
                }
                Err(e) => {
                    error!("第 {} 次传输 '{}' 失败: {}", attempt + 1, task.key, e);
                }
            }

            if attempt + 1 < attempts {
                // 指数退避
                let delay = config.retry_base_delay_ms.saturating_mul(1u64 << attempt.min(32));
                info!("{}ms 后重试 '{}'", delay, task.key);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            } else {
                error!("'{}' 的所有重试均已失败", task.key);
            }
        }

        TransferOutcome::Failed
    }

    async fn transfer_once(
        task: &TransferTask,
        source: &dyn SourceTree,
        dest: &dyn ObjectStore,
    ) -> Result<u64, StorageError> {
        let stream = source.open_read(&task.node).await?;
        dest.put(&task.key, stream, task.overwrite).await
    }

    /// 同时运行的任务数峰值
    pub fn peak_concurrency(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// 已提交的任务数
    pub fn submitted(&self) -> u64 {
        self.stats.submitted.load(Ordering::Relaxed)
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers.max(1)
    }
}
