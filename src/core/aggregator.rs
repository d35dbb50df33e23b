use crate::core::pool::{TransferHandle, TransferOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 单次运行内共享的计数器
#[derive(Debug, Default)]
pub struct RunCounters {
    pre_skipped: AtomicU64,
    pre_failed: AtomicU64,
}

impl RunCounters {
    pub fn add_pre_skipped(&self) {
        self.pre_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_pre_failed(&self) {
        self.pre_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pre_skipped(&self) -> u64 {
        self.pre_skipped.load(Ordering::SeqCst)
    }

    pub fn pre_failed(&self) -> u64 {
        self.pre_failed.load(Ordering::SeqCst)
    }
}

/// 最终计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub uploaded: u64,
    /// 预先跳过 + 传输时跳过
    pub skipped: u64,
    /// 预先放弃 + 传输失败
    pub failed: u64,
    pub pre_skipped: u64,
    pub pre_failed: u64,
    pub tasks_submitted: u64,
}

impl RunSummary {
    /// 参与统计的文件总数
    pub fn total(&self) -> u64 {
        self.uploaded + self.skipped + self.failed
    }
}

/// 汇总所有任务的最终结果
pub struct ResultAggregator {
    counters: Arc<RunCounters>,
}

impl ResultAggregator {
    pub fn new(counters: Arc<RunCounters>) -> Self {
        Self { counters }
    }

    /// 等待全部任务结束后汇总
    pub async fn collect(&self, handles: Vec<TransferHandle>) -> RunSummary {
        let tasks_submitted = handles.len() as u64;
        debug!("等待 {} 个传输任务完成", tasks_submitted);

        let outcomes =
            futures::future::join_all(handles.into_iter().map(TransferHandle::outcome)).await;

        let mut summary = RunSummary {
            pre_skipped: self.counters.pre_skipped(),
            pre_failed: self.counters.pre_failed(),
            tasks_submitted,
            ..Default::default()
        };
        summary.skipped = summary.pre_skipped;
        summary.failed = summary.pre_failed;

        for outcome in outcomes {
            match outcome {
                TransferOutcome::Uploaded => summary.uploaded += 1,
                TransferOutcome::Skipped => summary.skipped += 1,
                TransferOutcome::Failed => summary.failed += 1,
            }
        }

        info!("所有上传任务已完成");
        summary
    }
}
