use crate::core::aggregator::RunCounters;
use crate::core::conflict::{ConflictResolver, SyncDecision};
use crate::core::pool::{TransferHandle, TransferTask, TransferWorkerPool};
use crate::core::router::{destination_key, PatternRouter};
use crate::storage::{NodeKind, ObjectStore, SourceNode, SourceTree};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 深度优先遍历源树，在共享预算内调度传输
pub struct TreeWalker<'a> {
    tree: &'a dyn SourceTree,
    store: &'a dyn ObjectStore,
    router: &'a PatternRouter,
    resolver: ConflictResolver,
    pool: &'a TransferWorkerPool,
    counters: Arc<RunCounters>,
    handles: Vec<TransferHandle>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(
        tree: &'a dyn SourceTree,
        store: &'a dyn ObjectStore,
        router: &'a PatternRouter,
        pool: &'a TransferWorkerPool,
        counters: Arc<RunCounters>,
    ) -> Self {
        Self {
            tree,
            store,
            router,
            resolver: ConflictResolver::new(),
            pool,
            counters,
            handles: Vec::new(),
        }
    }

    /// 遍历 `node`，返回本子树内处理（调度或跳过）的文件数，不会超过 `budget`
    pub fn walk<'b>(&'b mut self, node: &'b SourceNode, budget: u64) -> BoxFuture<'b, u64>
    where
        'a: 'b,
    {
        async move {
            if budget == 0 {
                return 0;
            }

            info!("进入文件夹: {}", node.name);

            let children = match self.tree.children(node).await {
                Ok(children) => children,
                Err(e) => {
                    error!("获取文件夹 {} 的子条目失败: {}", node.name, e);
                    return 0;
                }
            };
            debug!("从文件夹 {} 获取到 {} 个条目", node.name, children.len());

            let mut processed = 0u64;

            for child in &children {
                if processed >= budget {
                    debug!("已达到最大文件数限制");
                    break;
                }

                info!(
                    "发现条目: {} | 文件: {}, 文件夹: {}, 子条目数: {:?}",
                    child.name,
                    child.is_file(),
                    child.is_folder(),
                    child.child_count
                );

                match child.kind {
                    NodeKind::Folder if child.child_count != Some(0) => {
                        info!("发现子文件夹: {}", child.name);
                        processed += self.walk(child, budget - processed).await;
                    }
                    NodeKind::Folder => {
                        info!("空文件夹，跳过: {}", child.name);
                    }
                    NodeKind::File => {
                        processed += self.consider_file(child).await;
                    }
                }
            }

            processed
        }
        .boxed()
    }

    /// 处理单个文件；命中规则返回 1（消耗预算），否则返回 0
    async fn consider_file(&mut self, file: &SourceNode) -> u64 {
        let router = self.router;
        let Some(target) = router.route(&file.name) else {
            debug!("没有匹配的规则，忽略: {}", file.name);
            return 0;
        };
        let key = destination_key(target, &file.name);

        let state = self.resolver.inspect(self.store, &key).await;

        match self
            .resolver
            .decide(&file.name, file.last_modified.as_ref(), &state)
        {
            SyncDecision::Skip(reason) => {
                debug!("预先跳过 {} ({:?})", file.name, reason);
                self.counters.add_pre_skipped();
            }
            SyncDecision::Abort(msg) => {
                error!("目标 '{}' 无法写入，放弃 {}: {}", key, file.name, msg);
                self.counters.add_pre_failed();
            }
            SyncDecision::Transfer { overwrite } => {
                let handle = self.pool.submit(TransferTask {
                    node: file.clone(),
                    key,
                    overwrite,
                });
                self.handles.push(handle);
                debug!("已调度传输: {}", file.name);
            }
        }

        1
    }

    /// 已提交的任务句柄
    pub fn into_handles(self) -> Vec<TransferHandle> {
        self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::{PoolConfig, TransferOutcome};
    use crate::core::router::RoutingRule;
    use crate::storage::{MemoryStore, MemoryTree, SourceTime};
    use chrono::{TimeZone, Utc};

    fn pdf_router() -> PatternRouter {
        PatternRouter::new(vec![RoutingRule::new(r".*\.pdf", "out").unwrap()])
    }

    async fn walk_once(
        tree: Arc<MemoryTree>,
        store: Arc<MemoryStore>,
        router: &PatternRouter,
        budget: u64,
    ) -> (u64, Vec<TransferHandle>, Arc<RunCounters>) {
        let pool = TransferWorkerPool::new(tree.clone(), store.clone(), PoolConfig::default());
        let counters = Arc::new(RunCounters::default());
        let root = tree.root().await.unwrap();
        let mut walker = TreeWalker::new(tree.as_ref(), store.as_ref(), router, &pool, counters.clone());
        let processed = walker.walk(&root, budget).await;
        (processed, walker.into_handles(), counters)
    }

    #[tokio::test]
    async fn test_scenario_report_routed_notes_ignored() {
        let mut tree = MemoryTree::new();
        tree.file("A/report_2024.pdf", "pdf", Some(SourceTime::from(Utc::now())))
            .file("A/notes.txt", "txt", None)
            .folder("B")
            .report_child_count("B", Some(0))
            .fail_children("B");
        let tree = Arc::new(tree);
        let store = Arc::new(MemoryStore::new());
        let router = PatternRouter::new(vec![RoutingRule::new(r"report_.*\.pdf", "reports").unwrap()]);

        let (processed, handles, counters) = walk_once(tree, store.clone(), &router, 10).await;

        // B 上报 0 个子条目，不会被列出（列出会失败）
        assert_eq!(processed, 1);
        assert_eq!(counters.pre_skipped(), 0);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].key, "reports/report_2024.pdf");
        for h in handles {
            assert_eq!(h.outcome().await, TransferOutcome::Uploaded);
        }
        assert_eq!(store.keys(), vec!["reports/report_2024.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_budget_shared_across_subtrees() {
        let mut tree = MemoryTree::new();
        for folder in ["A", "B", "C"] {
            for i in 0..4 {
                tree.file(&format!("{}/f{}.pdf", folder, i), "x", None);
            }
        }
        let tree = Arc::new(tree);
        let store = Arc::new(MemoryStore::new());

        let (processed, handles, _) = walk_once(tree, store, &pdf_router(), 6).await;

        assert_eq!(processed, 6);
        let keys: Vec<_> = handles.iter().map(|h| h.key.clone()).collect();
        assert_eq!(
            keys,
            vec!["out/f0.pdf", "out/f1.pdf", "out/f2.pdf", "out/f3.pdf", "out/f0.pdf", "out/f1.pdf"]
        );
    }

    #[tokio::test]
    async fn test_ignored_files_do_not_consume_budget() {
        let mut tree = MemoryTree::new();
        for i in 0..5 {
            tree.file(&format!("n{}.txt", i), "x", None);
        }
        tree.file("a.pdf", "x", None).file("b.pdf", "x", None);
        let tree = Arc::new(tree);
        let store = Arc::new(MemoryStore::new());

        let (processed, handles, _) = walk_once(tree, store, &pdf_router(), 2).await;

        assert_eq!(processed, 2);
        assert_eq!(handles.len(), 2);
    }

    #[tokio::test]
    async fn test_skips_consume_budget() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut tree = MemoryTree::new();
        tree.file("a.pdf", "x", Some(SourceTime::from(t)))
            .file("b.pdf", "x", Some(SourceTime::from(t)))
            .file("c.pdf", "x", Some(SourceTime::from(t)));
        let tree = Arc::new(tree);
        let store = Arc::new(MemoryStore::new());
        store.insert("out/a.pdf", "x", t);

        let (processed, handles, counters) = walk_once(tree, store, &pdf_router(), 2).await;

        assert_eq!(processed, 2);
        assert_eq!(counters.pre_skipped(), 1);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].key, "out/b.pdf");
    }

    #[tokio::test]
    async fn test_enumeration_failure_contributes_zero() {
        let mut tree = MemoryTree::new();
        tree.file("A/a.pdf", "x", None)
            .fail_children("A")
            .file("B/b.pdf", "x", None);
        let tree = Arc::new(tree);
        let store = Arc::new(MemoryStore::new());

        let (processed, handles, _) = walk_once(tree, store, &pdf_router(), 10).await;

        assert_eq!(processed, 1);
        assert_eq!(handles[0].key, "out/b.pdf");
    }

    #[tokio::test]
    async fn test_unknown_child_count_is_entered() {
        let mut tree = MemoryTree::new();
        tree.file("A/a.pdf", "x", None).report_child_count("A", None);
        let tree = Arc::new(tree);
        let store = Arc::new(MemoryStore::new());

        let (processed, _, _) = walk_once(tree, store, &pdf_router(), 10).await;
        assert_eq!(processed, 1);
    }

    #[tokio::test]
    async fn test_zero_budget_touches_nothing() {
        let mut tree = MemoryTree::new();
        tree.fail_children("").file("a.pdf", "x", None);
        let tree = Arc::new(tree);
        let store = Arc::new(MemoryStore::new());

        let (processed, handles, _) = walk_once(tree, store, &pdf_router(), 0).await;
        assert_eq!(processed, 0);
        assert!(handles.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_destination_counts_as_failed_without_task() {
        use crate::storage::{ByteStream, ObjectMeta, StorageError};
        use async_trait::async_trait;

        struct ReadOnlyStore;

        #[async_trait]
        impl ObjectStore for ReadOnlyStore {
            async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
                Err(StorageError::Unsupported("read-only".into()))
            }
            async fn metadata(&self, key: &str) -> Result<ObjectMeta, StorageError> {
                Err(StorageError::NotFound(key.into()))
            }
            async fn put(
                &self,
                _key: &str,
                _stream: ByteStream,
                _overwrite: bool,
            ) -> Result<u64, StorageError> {
                Err(StorageError::Unsupported("read-only".into()))
            }
            fn name(&self) -> &str {
                "read-only"
            }
        }

        let mut tree = MemoryTree::new();
        tree.file("a.pdf", "x", None);
        let tree = Arc::new(tree);
        let store = Arc::new(ReadOnlyStore);
        let pool = TransferWorkerPool::new(tree.clone(), store.clone(), PoolConfig::default());
        let counters = Arc::new(RunCounters::default());
        let router = pdf_router();
        let root = tree.root().await.unwrap();

        let mut walker = TreeWalker::new(tree.as_ref(), store.as_ref(), &router, &pool, counters.clone());
        let processed = walker.walk(&root, 10).await;

        assert_eq!(processed, 1);
        assert_eq!(counters.pre_failed(), 1);
        assert!(walker.into_handles().is_empty());
    }
}
