//! 运行配置 - 命令行参数与环境变量

use crate::core::pool::PoolConfig;
use crate::core::router::PatternRouter;
use crate::logging::LogConfig;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    Graph,
    Local,
    Webdav,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DestKind {
    Azblob,
    S3,
    Fs,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "blobmirror")]
#[command(about = "Mirror pattern-matched files from a remote drive into an object store")]
pub struct Cli {
    /// Source tree kind
    #[arg(long, env = "SOURCE_KIND", value_enum, default_value = "graph")]
    pub source_kind: SourceKind,

    /// SharePoint site URL (https://host/sites/name)
    #[arg(long, env = "SITE_URL")]
    pub site_url: Option<String>,

    /// Folder inside the source to mirror
    #[arg(long, env = "FOLDER_PATH")]
    pub folder_path: Option<String>,

    /// Bearer token for Microsoft Graph
    #[arg(long, env = "GRAPH_ACCESS_TOKEN", hide_env_values = true)]
    pub graph_access_token: Option<String>,

    #[arg(long, env = "GRAPH_BASE_URL", default_value = DEFAULT_GRAPH_BASE_URL)]
    pub graph_base_url: String,

    /// Local source directory
    #[arg(long, env = "SOURCE_PATH")]
    pub source_path: Option<String>,

    #[arg(long, env = "WEBDAV_ENDPOINT")]
    pub webdav_endpoint: Option<String>,

    #[arg(long, env = "WEBDAV_USERNAME")]
    pub webdav_username: Option<String>,

    #[arg(long, env = "WEBDAV_PASSWORD", hide_env_values = true)]
    pub webdav_password: Option<String>,

    /// Destination store kind
    #[arg(long, env = "DEST_KIND", value_enum, default_value = "azblob")]
    pub dest_kind: DestKind,

    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_NAME")]
    pub azure_account_name: Option<String>,

    #[arg(long, env = "AZURE_BLOB_CONTAINER_NAME")]
    pub azure_container: Option<String>,

    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_KEY", hide_env_values = true)]
    pub azure_account_key: Option<String>,

    #[arg(long, env = "AZURE_BLOB_ENDPOINT")]
    pub azure_endpoint: Option<String>,

    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "S3_REGION")]
    pub s3_region: Option<String>,

    #[arg(long, env = "S3_ACCESS_KEY")]
    pub s3_access_key: Option<String>,

    #[arg(long, env = "S3_SECRET_KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Destination directory for the fs store
    #[arg(long, env = "DEST_PATH")]
    pub dest_path: Option<String>,

    /// JSON list of {"pattern": ..., "target_folder": ...}
    #[arg(long, env = "FILENAME_PATTERNS")]
    pub filename_patterns: Option<String>,

    /// Maximum number of matched files handled per run
    #[arg(long, env = "MAX_FILES", default_value = "10")]
    pub max_files: u64,

    #[arg(long, env = "MAX_WORKERS", default_value = "5")]
    pub max_workers: usize,

    /// Attempts per transfer (including the first)
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Backoff base in milliseconds, doubled after every failed attempt
    #[arg(long, env = "BACKOFF_BASE_MS", default_value = "1000")]
    pub backoff_base_ms: u64,

    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Console log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_MAX_SIZE_MB", default_value = "5")]
    pub log_max_size_mb: u32,

    #[arg(long, env = "LOG_BACKUPS", default_value = "5")]
    pub log_backups: u32,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

/// 源配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Graph {
        base_url: String,
        site_url: String,
        folder_path: String,
        access_token: String,
    },
    Local {
        path: String,
        folder_path: String,
    },
    WebDav {
        endpoint: String,
        username: String,
        password: String,
        folder_path: String,
    },
}

/// 目标配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestConfig {
    AzBlob {
        account_name: String,
        container: String,
        account_key: Option<String>,
        endpoint: Option<String>,
    },
    S3 {
        bucket: String,
        region: String,
        access_key: String,
        secret_key: String,
        endpoint: Option<String>,
    },
    Fs {
        path: String,
    },
}

/// 校验后的运行配置
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub source: SourceConfig,
    pub dest: DestConfig,
    pub router: PatternRouter,
    pub max_files: u64,
    pub pool: PoolConfig,
    pub json: bool,
}

/// 收集缺失的必填项，最后一次性报告
struct Required {
    missing: Vec<&'static str>,
}

impl Required {
    fn new() -> Self {
        Self { missing: Vec::new() }
    }

    fn take(&mut self, value: &Option<String>, name: &'static str) -> String {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => {
                self.missing.push(name);
                String::new()
            }
        }
    }

    fn finish(self) -> Result<()> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            bail!("missing required configuration: {}", self.missing.join(", "))
        }
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Cli {
    /// 日志配置不依赖其他校验，可以先于完整配置初始化
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            max_size_mb: self.log_max_size_mb,
            backups: self.log_backups,
            dir: self.log_dir.clone(),
        }
    }
}

impl MirrorConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mut required = Required::new();

        let source = match cli.source_kind {
            SourceKind::Graph => SourceConfig::Graph {
                base_url: cli.graph_base_url.trim_end_matches('/').to_string(),
                site_url: required.take(&cli.site_url, "SITE_URL"),
                folder_path: required.take(&cli.folder_path, "FOLDER_PATH"),
                access_token: required.take(&cli.graph_access_token, "GRAPH_ACCESS_TOKEN"),
            },
            SourceKind::Local => SourceConfig::Local {
                path: required.take(&cli.source_path, "SOURCE_PATH"),
                folder_path: optional(&cli.folder_path).unwrap_or_default(),
            },
            SourceKind::Webdav => SourceConfig::WebDav {
                endpoint: required.take(&cli.webdav_endpoint, "WEBDAV_ENDPOINT"),
                username: required.take(&cli.webdav_username, "WEBDAV_USERNAME"),
                password: required.take(&cli.webdav_password, "WEBDAV_PASSWORD"),
                folder_path: required.take(&cli.folder_path, "FOLDER_PATH"),
            },
        };

        let dest = match cli.dest_kind {
            DestKind::Azblob => DestConfig::AzBlob {
                account_name: required.take(&cli.azure_account_name, "AZURE_STORAGE_ACCOUNT_NAME"),
                container: required.take(&cli.azure_container, "AZURE_BLOB_CONTAINER_NAME"),
                account_key: optional(&cli.azure_account_key),
                endpoint: optional(&cli.azure_endpoint),
            },
            DestKind::S3 => DestConfig::S3 {
                bucket: required.take(&cli.s3_bucket, "S3_BUCKET"),
                region: required.take(&cli.s3_region, "S3_REGION"),
                access_key: required.take(&cli.s3_access_key, "S3_ACCESS_KEY"),
                secret_key: required.take(&cli.s3_secret_key, "S3_SECRET_KEY"),
                endpoint: optional(&cli.s3_endpoint),
            },
            DestKind::Fs => DestConfig::Fs {
                path: required.take(&cli.dest_path, "DEST_PATH"),
            },
        };

        let patterns = required.take(&cli.filename_patterns, "FILENAME_PATTERNS");

        required.finish()?;

        if cli.max_workers == 0 {
            bail!("MAX_WORKERS must be at least 1");
        }
        if cli.max_retries == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }

        let router = PatternRouter::from_json(&patterns)
            .context("FILENAME_PATTERNS is not a valid JSON list")?;
        info!("已加载 {} 条文件名规则", router.len());

        Ok(Self {
            source,
            dest,
            router,
            max_files: cli.max_files,
            pool: PoolConfig {
                max_workers: cli.max_workers,
                max_retries: cli.max_retries,
                retry_base_delay_ms: cli.backoff_base_ms,
            },
            json: cli.json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF_RULES: &str = r#"[{"pattern": ".*\\.pdf", "target_folder": "pdfs"}]"#;

    fn parse(args: &[&str]) -> Result<MirrorConfig> {
        let mut argv = vec!["blobmirror"];
        argv.extend_from_slice(args);
        MirrorConfig::from_cli(Cli::try_parse_from(argv)?)
    }

    fn local_to_fs(extra: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = [
            "--source-kind",
            "local",
            "--source-path",
            "/data",
            "--dest-kind",
            "fs",
            "--dest-path",
            "/mirror",
            "--filename-patterns",
            PDF_RULES,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }

    fn parse_owned(args: Vec<String>) -> Result<MirrorConfig> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        parse(&refs)
    }

    #[test]
    fn test_local_to_fs() {
        let cfg = parse_owned(local_to_fs(&["--folder-path", "docs", "--max-files", "3"])).unwrap();

        assert_eq!(
            cfg.source,
            SourceConfig::Local {
                path: "/data".into(),
                folder_path: "docs".into()
            }
        );
        assert_eq!(cfg.dest, DestConfig::Fs { path: "/mirror".into() });
        assert_eq!(cfg.router.route("a.pdf"), Some("pdfs"));
        assert_eq!(cfg.max_files, 3);
        assert_eq!(cfg.pool.max_workers, 5);
        assert_eq!(cfg.pool.max_retries, 3);
    }

    #[test]
    fn test_local_folder_path_is_optional() {
        let cfg = parse_owned(local_to_fs(&[])).unwrap();
        assert_eq!(
            cfg.source,
            SourceConfig::Local {
                path: "/data".into(),
                folder_path: String::new()
            }
        );
    }

    #[test]
    fn test_missing_values_reported_together() {
        let err = parse(&[
            "--source-kind",
            "graph",
            "--site-url",
            "https://contoso.sharepoint.com/sites/x",
            "--dest-kind",
            "azblob",
        ])
        .unwrap_err()
        .to_string();

        assert!(err.contains("GRAPH_ACCESS_TOKEN"));
        assert!(err.contains("FOLDER_PATH"));
        assert!(err.contains("FILENAME_PATTERNS"));
        assert!(err.contains("AZURE_STORAGE_ACCOUNT_NAME"));
        assert!(err.contains("AZURE_BLOB_CONTAINER_NAME"));
        assert!(!err.contains("SITE_URL"));
    }

    #[test]
    fn test_webdav_requires_folder_path() {
        let err = parse(&[
            "--source-kind",
            "webdav",
            "--webdav-endpoint",
            "https://dav.example.com",
            "--webdav-username",
            "u",
            "--webdav-password",
            "p",
            "--dest-kind",
            "fs",
            "--dest-path",
            "/mirror",
            "--filename-patterns",
            PDF_RULES,
        ])
        .unwrap_err()
        .to_string();
        assert!(err.contains("FOLDER_PATH"));
    }

    #[test]
    fn test_malformed_patterns_are_fatal() {
        let mut args = local_to_fs(&[]);
        let idx = args.iter().position(|a| a == PDF_RULES).unwrap();
        args[idx] = "{not json".to_string();
        assert!(parse_owned(args).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(parse_owned(local_to_fs(&["--max-workers", "0"])).is_err());
    }

    #[test]
    fn test_blank_optional_values_are_none() {
        let cfg = parse(&[
            "--source-kind",
            "local",
            "--source-path",
            "/data",
            "--dest-kind",
            "azblob",
            "--azure-account-name",
            "acct",
            "--azure-container",
            "mirror",
            "--azure-account-key",
            "  ",
            "--filename-patterns",
            PDF_RULES,
        ])
        .unwrap();
        assert_eq!(
            cfg.dest,
            DestConfig::AzBlob {
                account_name: "acct".into(),
                container: "mirror".into(),
                account_key: None,
                endpoint: None,
            }
        );
    }
}
