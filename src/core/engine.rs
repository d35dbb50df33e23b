//! 镜像引擎 - 一次完整运行：连通性检查、遍历、等待、汇总

use crate::core::aggregator::{ResultAggregator, RunCounters};
use crate::core::pool::{PoolConfig, TransferWorkerPool};
use crate::core::router::PatternRouter;
use crate::core::walker::TreeWalker;
use crate::storage::{ObjectStore, SourceTree};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// 运行报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// 命中规则并被处理的文件数（不超过预算）
    pub files_considered: u64,
    pub tasks_submitted: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub peak_concurrency: usize,
}

impl RunReport {
    pub fn total(&self) -> u64 {
        self.uploaded + self.skipped + self.failed
    }
}

/// 镜像引擎
pub struct MirrorEngine {
    source: Arc<dyn SourceTree>,
    dest: Arc<dyn ObjectStore>,
    router: PatternRouter,
    max_files: u64,
    pool_config: PoolConfig,
}

impl MirrorEngine {
    pub fn new(
        source: Arc<dyn SourceTree>,
        dest: Arc<dyn ObjectStore>,
        router: PatternRouter,
        max_files: u64,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            source,
            dest,
            router,
            max_files,
            pool_config,
        }
    }

    /// 执行一次镜像
    ///
    /// 只有目标不可达或源根目录不可用才返回错误，单个文件的失败计入报告。
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();

        info!(
            "开始镜像任务 {}: {} -> {} (最多 {} 个文件, {} 个并发)",
            run_id,
            self.source.name(),
            self.dest.name(),
            self.max_files,
            self.pool_config.max_workers
        );

        if self.router.is_empty() {
            warn!("没有可用的路由规则，不会上传任何文件");
        }

        self.dest
            .check()
            .await
            .with_context(|| format!("目标存储不可用: {}", self.dest.name()))?;

        let root = self
            .source
            .root()
            .await
            .with_context(|| format!("无法获取源根目录: {}", self.source.name()))?;

        let pool = TransferWorkerPool::new(
            self.source.clone(),
            self.dest.clone(),
            self.pool_config.clone(),
        );
        let counters = Arc::new(RunCounters::default());

        let mut walker = TreeWalker::new(
            self.source.as_ref(),
            self.dest.as_ref(),
            &self.router,
            &pool,
            counters.clone(),
        );
        let files_considered = walker.walk(&root, self.max_files).await;
        let handles = walker.into_handles();

        info!(
            "遍历完成: 处理了 {} 个文件, 提交了 {} 个传输任务",
            files_considered,
            handles.len()
        );

        let summary = ResultAggregator::new(counters).collect(handles).await;

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        info!("Files uploaded: {}", summary.uploaded);
        info!("Files skipped: {}", summary.skipped);
        info!("Files failed: {}", summary.failed);
        info!(
            "Total files processed (uploaded/skipped/failed): {}/{}/{}",
            summary.uploaded, summary.skipped, summary.failed
        );

        Ok(RunReport {
            run_id,
            started_at,
            finished_at,
            duration_ms,
            files_considered,
            tasks_submitted: summary.tasks_submitted,
            uploaded: summary.uploaded,
            skipped: summary.skipped,
            failed: summary.failed,
            peak_concurrency: pool.peak_concurrency(),
        })
    }
}
