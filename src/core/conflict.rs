//! 基于修改时间的覆盖判定

use crate::storage::{ObjectStore, SourceTime, StorageError};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// 目标端状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationState {
    NotExists,
    Exists(DateTime<Utc>),
    /// 对象存在但拿不到修改时间
    MetadataUnavailable(String),
    /// 存在性检查失败
    CheckFailed(String),
    /// 目标端明确拒绝该 key 的写入
    Rejected(String),
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 源文件不比目标新
    NotNewer,
    /// 源文件没有可用的修改时间
    UnknownSourceTime,
    /// 目标对象元数据不可用
    UnknownDestinationTime,
}

/// 同步决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    Transfer { overwrite: bool },
    Skip(SkipReason),
    Abort(String),
}

/// 冲突解决器
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// 检查目标对象的存在性和修改时间
    pub async fn inspect(&self, store: &dyn ObjectStore, key: &str) -> DestinationState {
        let exists = match store.exists(key).await {
            Ok(exists) => exists,
            Err(StorageError::Unsupported(msg)) => {
                error!("目标 '{}' 不支持写入: {}", key, msg);
                return DestinationState::Rejected(msg);
            }
            Err(e) => {
                error!("检查目标 '{}' 是否存在失败: {}", key, e);
                return DestinationState::CheckFailed(e.to_string());
            }
        };

        if !exists {
            return DestinationState::NotExists;
        }

        match store.metadata(key).await {
            Ok(meta) => match meta.last_modified {
                Some(t) => {
                    debug!("目标 '{}' 最后修改于 {} UTC", key, t);
                    DestinationState::Exists(t)
                }
                None => {
                    error!("目标 '{}' 没有修改时间", key);
                    DestinationState::MetadataUnavailable("missing last_modified".to_string())
                }
            },
            Err(e) => {
                error!("获取目标 '{}' 元数据失败: {}", key, e);
                DestinationState::MetadataUnavailable(e.to_string())
            }
        }
    }

    /// 根据源修改时间和目标探测结果做出决策
    pub fn decide(
        &self,
        name: &str,
        source_modified: Option<&SourceTime>,
        state: &DestinationState,
    ) -> SyncDecision {
        let dest_time = match state {
            DestinationState::NotExists => {
                info!("目标不存在，准备上传: {}", name);
                return SyncDecision::Transfer { overwrite: false };
            }
            DestinationState::CheckFailed(msg) => {
                warn!("无法确认目标是否存在，按不存在处理: {} ({})", name, msg);
                return SyncDecision::Transfer { overwrite: false };
            }
            DestinationState::Rejected(msg) => {
                return SyncDecision::Abort(msg.clone());
            }
            DestinationState::MetadataUnavailable(_) => {
                warn!("目标元数据不可用，为避免误覆盖跳过: {}", name);
                return SyncDecision::Skip(SkipReason::UnknownDestinationTime);
            }
            DestinationState::Exists(t) => *t,
        };

        let source_time = match source_modified {
            Some(t) => match t.to_utc() {
                Some(utc) => utc,
                None => {
                    error!("无法解析源文件修改时间 {:?}: {}", t, name);
                    warn!("无法判断源文件是否更新，跳过: {}", name);
                    return SyncDecision::Skip(SkipReason::UnknownSourceTime);
                }
            },
            None => {
                warn!("源文件没有修改时间，无法判断是否需要覆盖，跳过: {}", name);
                return SyncDecision::Skip(SkipReason::UnknownSourceTime);
            }
        };

        if source_time > dest_time {
            info!("源文件比目标新，将覆盖: {} ({} > {})", name, source_time, dest_time);
            SyncDecision::Transfer { overwrite: true }
        } else {
            info!("源文件不比目标新，跳过: {}", name);
            SyncDecision::Skip(SkipReason::NotNewer)
        }
    }
}
