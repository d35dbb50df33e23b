//! 日志模块 - 控制台输出 + 按大小轮转的日志文件

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_NAME: &str = "mirror.log";

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 控制台日志级别: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// 单个日志文件最大大小（MB）
    pub max_size_mb: u32,
    /// 保留的备份文件数
    pub backups: u32,
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            max_size_mb: 5, // 默认 5MB
            backups: 5,
            dir: PathBuf::from("logs"),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，保留 `mirror.log.1 .. mirror.log.N` 备份
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    backups: u32,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32, backups: u32) -> io::Result<Self> {
        Self::with_max_bytes(log_dir, (max_size_mb as u64) * 1024 * 1024, backups)
    }

    pub fn with_max_bytes(log_dir: &Path, max_size: u64, backups: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let mut writer = Self {
            file_path: log_dir.join(LOG_FILE_NAME),
            max_size,
            backups,
            written: 0,
            writer: None,
        };

        // 现有文件已超过限制则先轮转
        let existing = fs::metadata(&writer.file_path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            writer.rotate()?;
        } else {
            writer.written = existing;
        }
        writer.writer = Some(writer.open_file()?);

        Ok(writer)
    }

    fn open_file(&self) -> io::Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        Ok(BufWriter::new(file))
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.file_path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// 轮转日志文件: mirror.log -> .1 -> .2 ...，超出数量的最旧备份被删除
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }

        if self.backups == 0 {
            if self.file_path.exists() {
                fs::remove_file(&self.file_path)?;
            }
        } else {
            let oldest = self.backup_path(self.backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.backups).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            if self.file_path.exists() {
                fs::rename(&self.file_path, self.backup_path(1))?;
            }
        }

        self.written = 0;
        Ok(())
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        if self.writer.is_none() {
            self.writer = Some(self.open_file()?);
        }

        match self.writer.as_mut() {
            Some(writer) => {
                let n = writer.write(buf)?;
                writer.flush()?;
                self.written += n as u64;
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "Writer not available")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// 初始化全局日志：控制台按配置级别，文件记录 DEBUG 及以上
///
/// 返回的 guard 必须持有到进程结束，否则缓冲的文件日志会丢失。
pub fn init_logging(config: &LogConfig) -> Result<WorkerGuard> {
    let file_writer = SizeRotatingWriter::new(&config.dir, config.max_size_mb, config.backups)
        .with_context(|| format!("无法创建日志文件: {}", config.dir.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);

    let console_level = config.tracing_level();
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.as_str()))
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    let file_filter = EnvFilter::new("debug")
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("opendal=info".parse()?);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(console_filter);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已被初始化")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotates_into_numbered_backups() {
        let dir = TempDir::new().unwrap();
        let mut writer = SizeRotatingWriter::with_max_bytes(dir.path(), 10, 2).unwrap();

        writer.write_all(b"first-line").unwrap();
        writer.write_all(b"second-line").unwrap();
        writer.write_all(b"third-line").unwrap();
        writer.write_all(b"fourth").unwrap();
        writer.flush().unwrap();

        let log = dir.path().join("mirror.log");
        assert_eq!(fs::read_to_string(&log).unwrap(), "fourth");
        assert_eq!(
            fs::read_to_string(dir.path().join("mirror.log.1")).unwrap(),
            "third-line"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("mirror.log.2")).unwrap(),
            "second-line"
        );
        assert!(!dir.path().join("mirror.log.3").exists());
    }

    #[test]
    fn test_appends_to_existing_small_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mirror.log"), "old;").unwrap();

        let mut writer = SizeRotatingWriter::with_max_bytes(dir.path(), 100, 5).unwrap();
        writer.write_all(b"new").unwrap();
        writer.flush().unwrap();

        assert_eq!(
            fs::read_to_string(writer.file_path()).unwrap(),
            "old;new"
        );
    }

    #[test]
    fn test_oversized_existing_file_rotated_on_open() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mirror.log"), "x".repeat(50)).unwrap();

        let _writer = SizeRotatingWriter::with_max_bytes(dir.path(), 10, 5).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("mirror.log.1")).unwrap().len(), 50);
        assert_eq!(fs::read_to_string(dir.path().join("mirror.log")).unwrap(), "");
    }

    #[test]
    fn test_level_parsing() {
        let mut cfg = LogConfig::default();
        assert_eq!(cfg.tracing_level(), tracing::Level::INFO);
        cfg.level = "DEBUG".into();
        assert_eq!(cfg.tracing_level(), tracing::Level::DEBUG);
        cfg.level = "nonsense".into();
        assert_eq!(cfg.tracing_level(), tracing::Level::INFO);
    }
}
