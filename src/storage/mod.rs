pub mod blob;
pub mod graph;
pub mod local;
pub mod memory;
pub mod webdav;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub use blob::BlobStore;
pub use graph::GraphDriveTree;
pub use local::LocalTree;
pub use memory::{MemoryStore, MemoryTree};
pub use webdav::WebDavTree;

use crate::config::{DestConfig, SourceConfig};

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// Azure 对 SFTP 创建的 blob 拒绝覆盖时返回的错误码
const AZURE_SFTP_UNSUPPORTED: &str = "BlobOperationNotSupportedForBlobCreatedBySftp";

/// 存储错误分类
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("对象不存在: {0}")]
    NotFound(String),
    #[error("对象已存在: {0}")]
    AlreadyExists(String),
    #[error("操作不受支持: {0}")]
    Unsupported(String),
    #[error("权限不足: {0}")]
    PermissionDenied(String),
    #[error("请求无效: {0}")]
    Invalid(String),
    #[error("临时错误: {0}")]
    Transient(String),
}

impl StorageError {
    /// 只有临时错误值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<opendal::Error> for StorageError {
    fn from(e: opendal::Error) -> Self {
        let message = e.to_string();
        if message.contains(AZURE_SFTP_UNSUPPORTED) {
            return StorageError::Unsupported(message);
        }
        match e.kind() {
            opendal::ErrorKind::NotFound => StorageError::NotFound(message),
            opendal::ErrorKind::AlreadyExists | opendal::ErrorKind::ConditionNotMatch => {
                StorageError::AlreadyExists(message)
            }
            opendal::ErrorKind::Unsupported => StorageError::Unsupported(message),
            opendal::ErrorKind::PermissionDenied => StorageError::PermissionDenied(message),
            _ => StorageError::Transient(message),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        let message = e.to_string();
        match e.status() {
            Some(status) => StorageError::from_status(status, message),
            None => StorageError::Transient(message),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        let message = e.to_string();
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(message),
            std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(message),
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(message),
            std::io::ErrorKind::Unsupported => StorageError::Unsupported(message),
            _ => StorageError::Transient(message),
        }
    }
}

impl StorageError {
    /// 按 HTTP 状态码分类，408/429 和 5xx 视为临时错误，其余 4xx 不重试
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            401 | 403 => StorageError::PermissionDenied(message),
            404 | 410 => StorageError::NotFound(message),
            409 | 412 => StorageError::AlreadyExists(message),
            405 | 501 => StorageError::Unsupported(message),
            408 | 429 => StorageError::Transient(message),
            400..=499 => StorageError::Invalid(message),
            _ => StorageError::Transient(message),
        }
    }
}

/// 字节流（源文件内容）
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

/// 源端给出的修改时间
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTime {
    /// 带时区
    Aware(DateTime<FixedOffset>),
    /// 不带时区，按 UTC 处理
    Naive(NaiveDateTime),
    /// 无法识别的原始文本
    Text(String),
}

impl SourceTime {
    /// 解析源端时间文本
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(text) {
            return SourceTime::Aware(t);
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(text, fmt) {
                return SourceTime::Naive(t);
            }
        }
        SourceTime::Text(text.to_string())
    }

    /// 转换为 UTC；无法识别时返回 None
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            SourceTime::Aware(t) => Some(t.with_timezone(&Utc)),
            SourceTime::Naive(t) => Some(t.and_utc()),
            SourceTime::Text(_) => None,
        }
    }
}

impl From<DateTime<Utc>> for SourceTime {
    fn from(t: DateTime<Utc>) -> Self {
        SourceTime::Aware(t.fixed_offset())
    }
}

/// 源树中的一个条目
#[derive(Debug, Clone)]
pub struct SourceNode {
    /// 源端定位符（条目 ID 或相对路径），只对产生它的 SourceTree 有意义
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    /// 子条目数量；None 表示后端无法提供
    pub child_count: Option<u64>,
    pub last_modified: Option<SourceTime>,
}

impl SourceNode {
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// 目标对象元数据
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// 层级结构的源端
#[async_trait]
pub trait SourceTree: Send + Sync {
    /// 解析配置的根文件夹
    async fn root(&self) -> Result<SourceNode, StorageError>;

    /// 列出文件夹的直接子条目，保持后端返回的顺序
    async fn children(&self, node: &SourceNode) -> Result<Vec<SourceNode>, StorageError>;

    /// 打开文件内容流
    async fn open_read(&self, node: &SourceNode) -> Result<ByteStream, StorageError>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 扁平 key 结构的目标端
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 检查对象是否存在
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// 获取对象元数据
    async fn metadata(&self, key: &str) -> Result<ObjectMeta, StorageError>;

    /// 流式写入对象，返回写入的字节数。overwrite=false 时对象已存在返回 AlreadyExists
    async fn put(&self, key: &str, stream: ByteStream, overwrite: bool) -> Result<u64, StorageError>;

    /// 检测目标端是否可访问
    async fn check(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建源端实例
pub async fn create_source(config: &SourceConfig) -> anyhow::Result<Arc<dyn SourceTree>> {
    match config {
        SourceConfig::Graph {
            base_url,
            site_url,
            folder_path,
            access_token,
        } => {
            tracing::info!("初始化 Graph 源: site={}, folder={}", site_url, folder_path);
            let tree = GraphDriveTree::connect(base_url, site_url, folder_path, access_token).await?;
            Ok(Arc::new(tree) as Arc<dyn SourceTree>)
        }
        SourceConfig::Local { path, folder_path } => {
            tracing::info!("初始化本地源: {}, folder={}", path, folder_path);
            Ok(Arc::new(LocalTree::new(path, folder_path)?) as Arc<dyn SourceTree>)
        }
        SourceConfig::WebDav {
            endpoint,
            username,
            password,
            folder_path,
        } => {
            tracing::info!("初始化 WebDAV 源: endpoint={}, folder={}", endpoint, folder_path);
            Ok(Arc::new(WebDavTree::new(endpoint, username, password, folder_path)?)
                as Arc<dyn SourceTree>)
        }
    }
}

/// 根据配置创建目标端实例
pub fn create_store(config: &DestConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config {
        DestConfig::AzBlob {
            account_name,
            container,
            account_key,
            endpoint,
        } => {
            tracing::info!("初始化 Azure Blob 存储: account={}, container={}", account_name, container);
            Ok(Arc::new(BlobStore::azblob(
                account_name,
                container,
                account_key.as_deref(),
                endpoint.as_deref(),
            )?) as Arc<dyn ObjectStore>)
        }
        DestConfig::S3 {
            bucket,
            region,
            access_key,
            secret_key,
            endpoint,
        } => {
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(BlobStore::s3(
                bucket,
                region,
                access_key,
                secret_key,
                endpoint.as_deref(),
            )?) as Arc<dyn ObjectStore>)
        }
        DestConfig::Fs { path } => {
            tracing::info!("初始化本地目标存储: {}", path);
            Ok(Arc::new(BlobStore::fs(path)?) as Arc<dyn ObjectStore>)
        }
    }
}
