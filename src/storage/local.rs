use super::{ByteStream, NodeKind, SourceNode, SourceTime, SourceTree, StorageError};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;
use tokio_util::io::ReaderStream;

/// 本地目录作为源树
pub struct LocalTree {
    base_path: PathBuf,
    root: String,
    name: String,
}

impl LocalTree {
    pub fn new(path: &str, folder_path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.is_dir() {
            anyhow::bail!("本地源路径不存在或不是文件夹: {}", path);
        }
        let root = Self::normalize_path(folder_path.trim_matches(|c| c == '/' || c == '\\'));
        let name = format!("local:{}", path);
        Ok(Self {
            base_path,
            root,
            name,
        })
    }

    fn resolve_path(&self, id: &str) -> PathBuf {
        if id.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(id)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn join_id(parent: &str, name: &str) -> String {
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent, name)
        }
    }

    async fn count_entries(path: &Path) -> Result<u64, StorageError> {
        let entries = ReadDirStream::new(fs::read_dir(path).await?);
        Ok(entries.try_fold(0u64, |n, _| async move { Ok(n + 1) }).await?)
    }

    async fn node_for(&self, id: String, name: String) -> Result<SourceNode, StorageError> {
        let full_path = self.resolve_path(&id);
        let metadata = fs::metadata(&full_path).await?;

        let last_modified = metadata
            .modified()
            .ok()
            .map(|t| SourceTime::from(DateTime::<Utc>::from(t)));

        let (kind, child_count) = if metadata.is_dir() {
            let count = match Self::count_entries(&full_path).await {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!("无法统计文件夹 {} 的子条目: {}", id, e);
                    None
                }
            };
            (NodeKind::Folder, count)
        } else {
            (NodeKind::File, None)
        };

        Ok(SourceNode {
            id,
            name,
            kind,
            child_count,
            last_modified,
        })
    }
}

#[async_trait]
impl SourceTree for LocalTree {
    async fn root(&self) -> Result<SourceNode, StorageError> {
        let name = self
            .root
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or(".")
            .to_string();
        let node = self.node_for(self.root.clone(), name).await?;
        if !node.is_folder() {
            return Err(StorageError::NotFound(format!("{} 不是文件夹", self.root)));
        }
        Ok(node)
    }

    async fn children(&self, node: &SourceNode) -> Result<Vec<SourceNode>, StorageError> {
        let dir = self.resolve_path(&node.id);
        let mut entries = ReadDirStream::new(fs::read_dir(&dir).await?);

        let mut names = Vec::new();
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            } else {
                tracing::warn!("跳过非 UTF-8 文件名: {:?}", entry.path());
            }
        }
        // read_dir 的顺序不确定，按名称排序保证每次遍历一致
        names.sort();

        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let id = Self::join_id(&node.id, &name);
            match self.node_for(id.clone(), name).await {
                Ok(child) => children.push(child),
                Err(e) => tracing::error!("读取条目 {} 失败，已跳过: {}", id, e),
            }
        }
        Ok(children)
    }

    async fn open_read(&self, node: &SourceNode) -> Result<ByteStream, StorageError> {
        let file = fs::File::open(self.resolve_path(&node.id)).await?;
        Ok(Box::pin(ReaderStream::new(file).map_err(StorageError::from)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/A")).unwrap();
        std::fs::create_dir_all(dir.path().join("docs/B")).unwrap();
        std::fs::write(dir.path().join("docs/A/report_2024.pdf"), b"pdf").unwrap();
        std::fs::write(dir.path().join("docs/A/notes.txt"), b"txt").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_children_sorted_with_counts() {
        let dir = fixture();
        let tree = LocalTree::new(dir.path().to_str().unwrap(), "docs").unwrap();

        let root = tree.root().await.unwrap();
        assert_eq!(root.name, "docs");
        assert_eq!(root.child_count, Some(2));

        let children = tree.children(&root).await.unwrap();
        let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(children[0].child_count, Some(2));
        assert_eq!(children[1].child_count, Some(0));

        let files = tree.children(&children[0]).await.unwrap();
        assert_eq!(files[0].name, "notes.txt");
        assert_eq!(files[0].id, "docs/A/notes.txt");
        assert!(files[0].is_file());
        assert!(files[0].last_modified.as_ref().and_then(|t| t.to_utc()).is_some());
    }

    #[tokio::test]
    async fn test_open_read_streams_content() {
        let dir = fixture();
        let tree = LocalTree::new(dir.path().to_str().unwrap(), "docs").unwrap();
        let root = tree.root().await.unwrap();
        let a = tree.children(&root).await.unwrap().remove(0);
        let report = tree
            .children(&a)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.name == "report_2024.pdf")
            .unwrap();

        let chunks: Vec<_> = tree.open_read(&report).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"pdf");
    }

    #[tokio::test]
    async fn test_children_of_missing_folder_is_not_found() {
        let dir = fixture();
        let tree = LocalTree::new(dir.path().to_str().unwrap(), "").unwrap();
        let ghost = SourceNode {
            id: "nope".to_string(),
            name: "nope".to_string(),
            kind: NodeKind::Folder,
            child_count: Some(1),
            last_modified: None,
        };
        assert!(matches!(
            tree.children(&ghost).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_does_not_hide_siblings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.pdf"), b"a").unwrap();
        std::fs::write(dir.path().join("docs/b.pdf"), b"b").unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("docs/zz_link")).unwrap();

        let tree = LocalTree::new(dir.path().to_str().unwrap(), "docs").unwrap();
        let root = tree.root().await.unwrap();
        assert_eq!(root.child_count, Some(3));

        let names: Vec<_> = tree
            .children(&root)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }
}
