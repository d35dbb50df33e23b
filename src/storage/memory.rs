//! 内存实现的源树和对象存储，用于测试和演练

use super::{ByteStream, NodeKind, ObjectMeta, ObjectStore, SourceNode, SourceTime, SourceTree, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct MemEntry {
    name: String,
    kind: NodeKind,
    children: Vec<String>,
    /// 覆盖自动计算的子条目数量
    reported_count: Option<Option<u64>>,
    content: Bytes,
    last_modified: Option<SourceTime>,
}

/// 内存源树，条目 ID 即相对路径（根为 ""）
pub struct MemoryTree {
    entries: HashMap<String, MemEntry>,
    failing_folders: HashSet<String>,
    root_unavailable: bool,
    read_failures: Mutex<HashMap<String, VecDeque<StorageError>>>,
    reads: AtomicU64,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(String::new(), Self::folder_entry(""));
        Self {
            entries,
            failing_folders: HashSet::new(),
            root_unavailable: false,
            read_failures: Mutex::new(HashMap::new()),
            reads: AtomicU64::new(0),
        }
    }

    fn folder_entry(name: &str) -> MemEntry {
        MemEntry {
            name: name.to_string(),
            kind: NodeKind::Folder,
            children: Vec::new(),
            reported_count: None,
            content: Bytes::new(),
            last_modified: None,
        }
    }

    fn split(path: &str) -> (&str, &str) {
        path.rsplit_once('/').unwrap_or(("", path))
    }

    /// 添加文件夹（自动创建上级文件夹）
    pub fn folder(&mut self, path: &str) -> &mut Self {
        let path = path.trim_matches('/');
        if path.is_empty() || self.entries.contains_key(path) {
            return self;
        }
        let (parent, name) = Self::split(path);
        self.folder(parent);
        self.entries.insert(path.to_string(), Self::folder_entry(name));
        if let Some(p) = self.entries.get_mut(parent) {
            p.children.push(path.to_string());
        }
        self
    }

    /// 添加文件（自动创建上级文件夹）
    pub fn file(
        &mut self,
        path: &str,
        content: impl Into<Bytes>,
        last_modified: Option<SourceTime>,
    ) -> &mut Self {
        let path = path.trim_matches('/');
        let (parent, name) = Self::split(path);
        self.folder(parent);
        let is_new = self
            .entries
            .insert(
                path.to_string(),
                MemEntry {
                    name: name.to_string(),
                    kind: NodeKind::File,
                    children: Vec::new(),
                    reported_count: None,
                    content: content.into(),
                    last_modified,
                },
            )
            .is_none();
        if is_new {
            if let Some(p) = self.entries.get_mut(parent) {
                p.children.push(path.to_string());
            }
        }
        self
    }

    /// 指定文件夹上报的子条目数量（None 表示后端不提供）
    pub fn report_child_count(&mut self, path: &str, count: Option<u64>) -> &mut Self {
        if let Some(e) = self.entries.get_mut(path.trim_matches('/')) {
            e.reported_count = Some(count);
        }
        self
    }

    /// 列出该文件夹时返回临时错误
    pub fn fail_children(&mut self, path: &str) -> &mut Self {
        self.failing_folders.insert(path.trim_matches('/').to_string());
        self
    }

    /// 获取根目录时返回错误
    pub fn fail_root(&mut self) -> &mut Self {
        self.root_unavailable = true;
        self
    }

    /// 依次让后续读取失败
    pub fn fail_reads(&mut self, path: &str, errors: Vec<StorageError>) -> &mut Self {
        if let Ok(mut failures) = self.read_failures.lock() {
            failures
                .entry(path.trim_matches('/').to_string())
                .or_default()
                .extend(errors);
        }
        self
    }

    /// 已打开的读取流数量
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn node(&self, id: &str) -> Option<SourceNode> {
        let e = self.entries.get(id)?;
        let child_count = match (e.kind, &e.reported_count) {
            (NodeKind::File, _) => None,
            (NodeKind::Folder, Some(reported)) => *reported,
            (NodeKind::Folder, None) => Some(e.children.len() as u64),
        };
        Some(SourceNode {
            id: id.to_string(),
            name: e.name.clone(),
            kind: e.kind,
            child_count,
            last_modified: e.last_modified.clone(),
        })
    }
}

#[async_trait]
impl SourceTree for MemoryTree {
    async fn root(&self) -> Result<SourceNode, StorageError> {
        if self.root_unavailable {
            return Err(StorageError::PermissionDenied("root".to_string()));
        }
        self.node("")
            .ok_or_else(|| StorageError::NotFound("root".to_string()))
    }

    async fn children(&self, node: &SourceNode) -> Result<Vec<SourceNode>, StorageError> {
        if self.failing_folders.contains(&node.id) {
            return Err(StorageError::Transient(format!("列出 {} 失败", node.id)));
        }
        let entry = self
            .entries
            .get(&node.id)
            .ok_or_else(|| StorageError::NotFound(node.id.clone()))?;
        Ok(entry.children.iter().filter_map(|id| self.node(id)).collect())
    }

    async fn open_read(&self, node: &SourceNode) -> Result<ByteStream, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .read_failures
            .lock()
            .ok()
            .and_then(|mut f| f.get_mut(&node.id).and_then(|q| q.pop_front()));
        if let Some(err) = scripted {
            return Err(err);
        }
        let entry = self
            .entries
            .get(&node.id)
            .filter(|e| e.kind == NodeKind::File)
            .ok_or_else(|| StorageError::NotFound(node.id.clone()))?;
        let data = entry.content.clone();
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub last_modified: DateTime<Utc>,
}

/// 内存对象存储
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    put_failures: Mutex<VecDeque<StorageError>>,
    exists_errors: Mutex<HashSet<String>>,
    metadata_errors: Mutex<HashMap<String, StorageError>>,
    put_delay: Option<Duration>,
    writes: AtomicU64,
    puts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次写入前等待一段时间（用于观察并发）
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    /// 预置对象
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                key.to_string(),
                StoredObject {
                    data: data.into(),
                    last_modified,
                },
            );
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// 依次让后续 put 调用失败
    pub fn fail_puts(&self, errors: Vec<StorageError>) {
        if let Ok(mut failures) = self.put_failures.lock() {
            failures.extend(errors);
        }
    }

    /// 对该 key 的存在性检查返回错误
    pub fn fail_exists(&self, key: &str) {
        if let Ok(mut keys) = self.exists_errors.lock() {
            keys.insert(key.to_string());
        }
    }

    /// 对该 key 的元数据查询返回错误
    pub fn fail_metadata(&self, key: &str, error: StorageError) {
        if let Ok(mut errors) = self.metadata_errors.lock() {
            errors.insert(key.to_string(), error);
        }
    }

    /// 成功写入的次数
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// put 调用次数（含失败）
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn lock_error() -> StorageError {
        StorageError::Transient("内存存储锁已损坏".to_string())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        if self
            .exists_errors
            .lock()
            .map_err(|_| Self::lock_error())?
            .contains(key)
        {
            return Err(StorageError::Transient(format!("检查 {} 失败", key)));
        }
        Ok(self
            .objects
            .lock()
            .map_err(|_| Self::lock_error())?
            .contains_key(key))
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        if let Some(err) = self
            .metadata_errors
            .lock()
            .map_err(|_| Self::lock_error())?
            .get(key)
        {
            return Err(err.clone());
        }
        let objects = self.objects.lock().map_err(|_| Self::lock_error())?;
        let obj = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: obj.data.len() as u64,
            last_modified: Some(obj.last_modified),
        })
    }

    async fn put(&self, key: &str, stream: ByteStream, overwrite: bool) -> Result<u64, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .put_failures
            .lock()
            .map_err(|_| Self::lock_error())?
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        let chunks: Vec<Bytes> = stream.try_collect().await?;
        let data = Bytes::from(chunks.concat());
        let size = data.len() as u64;

        let mut objects = self.objects.lock().map_err(|_| Self::lock_error())?;
        if !overwrite && objects.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(size)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tree_keeps_insertion_order_and_counts() {
        let mut tree = MemoryTree::new();
        tree.file("A/z.pdf", "z", None)
            .file("A/a.pdf", "a", None)
            .folder("B");

        let root = tree.root().await.unwrap();
        assert_eq!(root.child_count, Some(2));
        let children = tree.children(&root).await.unwrap();
        assert_eq!(children[0].name, "A");
        assert_eq!(children[1].child_count, Some(0));

        let files = tree.children(&children[0]).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["z.pdf", "a.pdf"]);
    }

    #[tokio::test]
    async fn test_store_refuses_existing_without_overwrite() {
        let store = MemoryStore::new();
        store.insert("r/a.pdf", "old", Utc::now());
        let stream: ByteStream = Box::pin(futures::stream::once(async { Ok(Bytes::from("new")) }));
        let err = store.put("r/a.pdf", stream, false).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(store.get("r/a.pdf").unwrap().data, Bytes::from("old"));
    }
}
