//! 日志初始化
//!
//! 根据配置安装 tracing 订阅器，`RUST_LOG` 优先于配置文件中的级别

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// 构建日志过滤器
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid log level directive: {}", config.level)),
    }
}

/// 安装全局日志订阅器
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::debug!("Logging initialised at level {} ({:?})", config.level, config.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_from_config() {
        let config = LoggingConfig {
            level: "clinic_workflow=debug,info".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(build_filter(&config).is_ok());
    }
}
