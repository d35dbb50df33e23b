use super::{ByteStream, ObjectMeta, ObjectStore, StorageError, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use opendal::{layers::TimeoutLayer, Builder, Operator};
use std::time::Duration;

/// 基于 opendal 的对象存储（Azure Blob / S3 / 本地目录）
pub struct BlobStore {
    operator: Operator,
    name: String,
}

impl BlobStore {
    pub fn azblob(
        account_name: &str,
        container: &str,
        account_key: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::Azblob;

        let endpoint = endpoint
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", account_name));

        let mut builder = Azblob::default()
            .container(container)
            .endpoint(&endpoint)
            .account_name(account_name);

        if let Some(key) = account_key {
            builder = builder.account_key(key);
        }

        let name = format!("azblob://{}/{}", account_name, container);
        Self::with_builder(builder, name)
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        Self::with_builder(builder, format!("s3://{}", bucket))
    }

    pub fn fs(path: &str) -> Result<Self> {
        use opendal::services::Fs;

        std::fs::create_dir_all(path)?;
        let builder = Fs::default().root(path);
        Self::with_builder(builder, format!("fs:{}", path))
    }

    fn with_builder<B: Builder>(builder: B, name: String) -> Result<Self> {
        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self { operator, name })
    }
}

#[async_trait]
impl ObjectStore for BlobStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.operator.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        let meta = self.operator.stat(key).await?;
        Ok(ObjectMeta {
            size: meta.content_length(),
            last_modified: meta.last_modified(),
        })
    }

    async fn put(
        &self,
        key: &str,
        mut stream: ByteStream,
        overwrite: bool,
    ) -> Result<u64, StorageError> {
        // 不允许覆盖时先确认目标不存在（可能有其他写入方并发写入）
        if !overwrite && self.exists(key).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        let mut writer = self.operator.writer(key).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    abort_writer(&mut writer, key).await;
                    return Err(e);
                }
            };
            written += chunk.len() as u64;
            if let Err(e) = writer.write(chunk).await {
                abort_writer(&mut writer, key).await;
                return Err(e.into());
            }
        }

        writer.close().await?;
        Ok(written)
    }

    async fn check(&self) -> Result<(), StorageError> {
        self.operator.check().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 中止未完成的写入；中止失败只记录日志，调用方返回原始错误
async fn abort_writer(writer: &mut opendal::Writer, key: &str) {
    if let Err(e) = writer.abort().await {
        tracing::warn!("中止写入 '{}' 失败: {}", key, e);
    }
}
