//! 日志系统配置模块
//! 支持结构化日志、日志级别配置和按天轮转的文件日志

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "ironwallet.log";

/// 初始化日志系统
///
/// 开启文件日志时返回后台写线程的 guard，调用方必须持有到进程结束，
/// 否则缓冲区中的日志会丢失。
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    // 设置日志级别过滤器
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // 根据配置选择日志格式
    if config.format == "json" {
        init_json_logging(filter, config)
    } else {
        init_text_logging(filter, config)
    }
}

fn log_dir(config: &LoggingConfig) -> Result<PathBuf> {
    let dir = config
        .log_file_path
        .as_ref()
        .and_then(|p| Path::new(p).parent())
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("./logs"))
        .to_path_buf();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {:?}", dir))?;
    Ok(dir)
}

/// 初始化JSON格式日志（结构化日志）
fn init_json_logging(filter: EnvFilter, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    if config.enable_file_logging {
        let stdout_layer = fmt::layer().json().with_timer(ChronoUtc::rfc_3339());
        let file_appender = rolling::daily(log_dir(config)?, LOG_FILE_PREFIX);
        let (writer, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_timer(ChronoUtc::rfc_3339());

        Registry::default()
            .with(filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        Ok(Some(guard))
    } else {
        let stdout_layer = fmt::layer().json().with_timer(ChronoUtc::rfc_3339());
        Registry::default()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        Ok(None)
    }
}

/// 初始化文本格式日志
fn init_text_logging(filter: EnvFilter, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    if config.enable_file_logging {
        let stdout_layer = fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true);
        let file_appender = rolling::daily(log_dir(config)?, LOG_FILE_PREFIX);
        let (writer, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false);

        Registry::default()
            .with(filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        Ok(Some(guard))
    } else {
        let stdout_layer = fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true);
        Registry::default()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        Ok(None)
    }
}
