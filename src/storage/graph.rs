//! Microsoft Graph 网盘（SharePoint / OneDrive）作为源树

use super::{ByteStream, NodeKind, SourceNode, SourceTime, SourceTree, StorageError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// 建立连接超时（秒）
const CONNECT_TIMEOUT_SECS: u64 = 30;
/// 两次读取之间的最长间隔（秒），下载大文件不受总时长限制
const READ_TIMEOUT_SECS: u64 = 30;
/// JSON 请求的总超时（秒）
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderFacet {
    child_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: Option<String>,
    file: Option<serde_json::Value>,
    folder: Option<FolderFacet>,
    last_modified_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemPage {
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

impl DriveItem {
    /// 既不是文件也不是文件夹的条目（如 OneNote 包）返回 None
    fn into_node(self) -> Option<SourceNode> {
        let kind = if self.file.is_some() {
            NodeKind::File
        } else if self.folder.is_some() {
            NodeKind::Folder
        } else {
            return None;
        };
        Some(SourceNode {
            name: self.name.unwrap_or_else(|| "(No Name)".to_string()),
            child_count: self.folder.map(|f| f.child_count.unwrap_or(0)),
            last_modified: self.last_modified_date_time.as_deref().map(SourceTime::parse),
            id: self.id,
            kind,
        })
    }
}

pub struct GraphDriveTree {
    client: Client,
    base_url: String,
    drive_id: String,
    folder_path: String,
    name: String,
}

impl GraphDriveTree {
    /// 通过站点 URL 定位默认文档库
    pub async fn connect(
        base_url: &str,
        site_url: &str,
        folder_path: &str,
        access_token: &str,
    ) -> Result<Self> {
        let client = build_client(
            access_token,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )?;
        Self::connect_with(client, base_url, site_url, folder_path).await
    }

    async fn connect_with(
        client: Client,
        base_url: &str,
        site_url: &str,
        folder_path: &str,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let (host, site_path) = split_site_url(site_url)?;

        let site: IdOnly = get_json(&client, &format!("{}/sites/{}:/{}", base_url, host, site_path))
            .await
            .with_context(|| format!("访问站点失败: {}", site_url))?;
        let drive: IdOnly = get_json(&client, &format!("{}/sites/{}/drive", base_url, site.id))
            .await
            .with_context(|| format!("获取站点文档库失败: {}", site_url))?;

        tracing::info!("已连接 Graph 文档库: site={}, drive={}", site.id, drive.id);

        Ok(Self {
            client,
            base_url,
            name: format!("graph:{}", site_url.trim_end_matches('/')),
            drive_id: drive.id,
            folder_path: folder_path.trim_matches('/').to_string(),
        })
    }

    fn item_url(&self, item_id: &str) -> String {
        format!("{}/drives/{}/items/{}", self.base_url, self.drive_id, item_id)
    }
}

fn build_client(access_token: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", access_token))
        .context("访问令牌包含非法字符")?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    Ok(Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()?)
}

/// 拆分站点 URL 为 (主机名, 站点路径)
fn split_site_url(site_url: &str) -> Result<(String, String)> {
    let without_scheme = site_url
        .strip_prefix("https://")
        .or_else(|| site_url.strip_prefix("http://"))
        .unwrap_or(site_url);
    let (host, path) = without_scheme
        .split_once('/')
        .unwrap_or((without_scheme, ""));
    if host.is_empty() {
        anyhow::bail!("无效的站点 URL: {}", site_url);
    }
    Ok((host.to_string(), path.trim_matches('/').to_string()))
}

/// 对路径逐段编码，保留分隔符
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, StorageError> {
    let resp = client
        .get(url)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StorageError::from_status(
            status,
            format!("GET {} -> {}: {}", url, status, body),
        ));
    }
    Ok(resp.json::<T>().await?)
}

#[async_trait]
impl SourceTree for GraphDriveTree {
    async fn root(&self) -> Result<SourceNode, StorageError> {
        let url = if self.folder_path.is_empty() {
            format!("{}/drives/{}/root", self.base_url, self.drive_id)
        } else {
            format!(
                "{}/drives/{}/root:/{}",
                self.base_url,
                self.drive_id,
                encode_path(&self.folder_path)
            )
        };
        let item: DriveItem = get_json(&self.client, &url).await?;
        match item.into_node() {
            Some(node) if node.is_folder() => Ok(node),
            _ => Err(StorageError::NotFound(format!("{} 不是文件夹", self.folder_path))),
        }
    }

    async fn children(&self, node: &SourceNode) -> Result<Vec<SourceNode>, StorageError> {
        let mut next = Some(format!("{}/children", self.item_url(&node.id)));
        let mut children = Vec::new();

        while let Some(url) = next.take() {
            let page: ItemPage = get_json(&self.client, &url).await?;
            for item in page.value {
                let label = item.name.clone().unwrap_or_default();
                match item.into_node() {
                    Some(child) => children.push(child),
                    None => tracing::info!("条目既不是文件也不是文件夹，跳过: {}", label),
                }
            }
            next = page.next_link;
        }

        Ok(children)
    }

    async fn open_read(&self, node: &SourceNode) -> Result<ByteStream, StorageError> {
        // /content 会重定向到预签名下载地址，跨域重定向时 reqwest 不会携带令牌
        let url = format!("{}/content", self.item_url(&node.id));
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::from_status(
                status,
                format!("下载 {} 失败: {}", node.name, status),
            ));
        }
        Ok(Box::pin(resp.bytes_stream().map_err(StorageError::from)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
