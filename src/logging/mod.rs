//! Логирование на базе `tracing`: фильтр уровня, вывод в консоль и
//! (опционально) в файл с ротацией.

pub mod config;
mod filters;
pub mod handle;
mod macros;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig, Rotation};
pub use handle::LoggingHandle;
pub(crate) use macros::log_by_status;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::LoggingError;

/// Инициализация глобального subscriber'а с конфигурацией.
///
/// Повторный вызов в том же процессе возвращает
/// `LoggingError::AlreadyInitialized`.
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config)?;
    let mut layers = Vec::new();

    if config.console.enabled {
        layers.push(sinks::console::layer(&config.console));
    }

    let file_guard = if config.file.enabled {
        let (file_layer, guard) = sinks::file::layer(&config.log_dir, &config.file);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_dir = %config.log_dir.display(),
        console_enabled = config.console.enabled,
        file_enabled = config.file.enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;

    use super::*;

    /// Тест проверяет файловый вывод и отказ повторной инициализации.
    ///
    /// Глобальный subscriber ставится один раз на процесс, поэтому оба
    /// сценария в одном тесте.
    #[test]
    #[serial]
    fn test_init_logging_file_sink_and_reinit() {
        env::remove_var("RUST_LOG");
        env::remove_var("RELAY_LOG_DIR");
        let tmp = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: tmp.path().to_path_buf(),
            console: ConsoleConfig {
                enabled: false,
                ..Default::default()
            },
            file: FileConfig {
                enabled: true,
                rotation: Rotation::Never,
                ..Default::default()
            },
            ..Default::default()
        };

        let handle = init_logging(cfg.clone()).unwrap();
        assert!(handle.has_file_sink());
        tracing::warn!("written to the log file");
        handle.shutdown();

        let content = std::fs::read_to_string(tmp.path().join("relay.log")).unwrap();
        assert!(content.contains("written to the log file"));

        assert!(matches!(
            init_logging(cfg),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
