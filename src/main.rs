use blobmirror_lib::config::{Cli, MirrorConfig};
use blobmirror_lib::core::MirrorEngine;
use blobmirror_lib::logging::init_logging;
use blobmirror_lib::storage::{create_source, create_store};
use clap::Parser;
use std::process::ExitCode;

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = MirrorConfig::from_cli(cli)?;
    let source = create_source(&config.source).await?;
    let dest = create_store(&config.dest)?;

    let engine = MirrorEngine::new(source, dest, config.router, config.max_files, config.pool);
    let report = engine.run().await?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "uploaded: {}, skipped: {}, failed: {} ({} ms)",
            report.uploaded, report.skipped, report.failed, report.duration_ms
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // guard 需要一直持有，直到日志全部写入
    let _guard = match init_logging(&cli.log_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("日志初始化失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("镜像任务失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
