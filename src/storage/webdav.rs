use super::{ByteStream, NodeKind, SourceNode, SourceTime, SourceTree, StorageError, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

/// WebDAV 作为源树
pub struct WebDavTree {
    operator: Operator,
    root: String,
    name: String,
}

impl WebDavTree {
    pub fn new(endpoint: &str, username: &str, password: &str, folder_path: &str) -> Result<Self> {
        use opendal::services::Webdav;

        let builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let root = Self::dir_path(folder_path);
        let name = format!(
            "webdav://{}/{}",
            endpoint.trim_end_matches('/'),
            root.trim_end_matches('/')
        );

        Ok(Self::with_operator(operator, root, name))
    }

    fn with_operator(operator: Operator, root: String, name: String) -> Self {
        Self {
            operator,
            root,
            name,
        }
    }

    /// 目录路径统一为 "a/b/" 形式，根目录为 "/"
    fn dir_path(path: &str) -> String {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", trimmed)
        }
    }

    fn node_name(path: &str) -> String {
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl SourceTree for WebDavTree {
    async fn root(&self) -> Result<SourceNode, StorageError> {
        let meta = self.operator.stat(&self.root).await?;
        if !meta.is_dir() {
            return Err(StorageError::NotFound(format!("{} 不是文件夹", self.root)));
        }
        Ok(SourceNode {
            id: self.root.clone(),
            name: Self::node_name(&self.root),
            kind: NodeKind::Folder,
            child_count: None,
            last_modified: meta.last_modified().map(SourceTime::from),
        })
    }

    async fn children(&self, node: &SourceNode) -> Result<Vec<SourceNode>, StorageError> {
        let entries = self
            .operator
            .list_with(&node.id)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        let children = entries
            .into_iter()
            // 部分服务器会把目录本身也列出来
            .filter(|entry| entry.path().trim_matches('/') != node.id.trim_matches('/'))
            .map(|entry| {
                let meta = entry.metadata();
                SourceNode {
                    id: entry.path().to_string(),
                    name: Self::node_name(entry.path()),
                    kind: if meta.is_dir() {
                        NodeKind::Folder
                    } else {
                        NodeKind::File
                    },
                    // WebDAV 的 PROPFIND 不提供子条目数量
                    child_count: None,
                    last_modified: meta.last_modified().map(SourceTime::from),
                }
            })
            .collect();

        Ok(children)
    }

    async fn open_read(&self, node: &SourceNode) -> Result<ByteStream, StorageError> {
        let stream = self
            .operator
            .reader(&node.id)
            .await?
            .into_bytes_stream(..)
            .await?;
        Ok(Box::pin(stream.map_err(StorageError::from)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_path() {
        assert_eq!(WebDavTree::dir_path(""), "/");
        assert_eq!(WebDavTree::dir_path("/"), "/");
        assert_eq!(WebDavTree::dir_path("/Shared/Reports"), "Shared/Reports/");
        assert_eq!(WebDavTree::dir_path("Shared/"), "Shared/");
    }

    #[test]
    fn test_node_name() {
        assert_eq!(WebDavTree::node_name("Shared/Reports/"), "Reports");
        assert_eq!(WebDavTree::node_name("Shared/a.pdf"), "a.pdf");
        assert_eq!(WebDavTree::node_name("/"), "");
    }

    #[tokio::test]
    async fn test_lists_and_streams_through_operator() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Shared/Reports")).unwrap();
        let content = vec![7u8; 3 * 1024 * 1024];
        std::fs::write(dir.path().join("Shared/big.pdf"), &content).unwrap();

        let operator = Operator::new(opendal::services::Fs::default().root(dir.path().to_str().unwrap()))
            .unwrap()
            .finish();
        let tree = WebDavTree::with_operator(operator, WebDavTree::dir_path("Shared"), "test".into());

        let root = tree.root().await.unwrap();
        let mut children = tree.children(&root).await.unwrap();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Reports", "big.pdf"]);
        assert!(children[0].is_folder());
        assert_eq!(children[0].child_count, None);

        let chunks: Vec<bytes::Bytes> = tree.open_read(&children[1]).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), content);
    }
}
