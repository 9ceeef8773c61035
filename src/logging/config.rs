use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoggingError;

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::InvalidDirective {
                directive: other.to_string(),
                reason: "expected pretty, compact or json".to_string(),
            }),
        }
    }
}

/// Период ротации файла журнала.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Вывод в консоль.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Pretty,
            with_ansi: true,
        }
    }
}

/// Вывод в файл через неблокирующий writer `tracing-appender`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub filename: String,
    pub rotation: Rotation,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: LogFormat::Json,
            filename: "relay.log".to_string(),
            rotation: Rotation::Daily,
        }
    }
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error.
    pub level: String,
    /// Дополнительные директивы `EnvFilter` (например `pubsub_relay::transport=trace`).
    pub directives: Vec<String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Применяет переопределения из `RELAY_LOG_LEVEL`, `RELAY_LOG_FORMAT`,
    /// `RELAY_LOG_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("RELAY_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("RELAY_LOG_FORMAT") {
            if let Ok(format) = format.parse() {
                self.console.format = format;
            }
        }
        if let Ok(dir) = env::var("RELAY_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
            self.file.enabled = true;
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
            _ => Err(LoggingError::InvalidLevel(self.level.clone())),
        }
    }

    /// Директива фильтра: базовый уровень плюс дополнительные директивы.
    pub fn build_filter_directive(&self) -> String {
        std::iter::once(self.level.to_ascii_lowercase())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет сборку директивы фильтра.
    #[test]
    fn test_build_filter_directive() {
        let cfg = LoggingConfig {
            level: "WARN".to_string(),
            directives: vec!["pubsub_relay::correlation=trace".to_string()],
            ..Default::default()
        };
        assert_eq!(
            cfg.build_filter_directive(),
            "warn,pubsub_relay::correlation=trace"
        );
    }

    /// Тест проверяет отказ на неизвестном уровне.
    #[test]
    fn test_invalid_level() {
        let cfg = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(LoggingError::InvalidLevel(_))));
        assert!(LoggingConfig::default().validate().is_ok());
    }

    /// Тест проверяет разбор формата.
    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    /// Тест проверяет создание каталога журнала для файлового вывода.
    #[test]
    fn test_ensure_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: tmp.path().join("nested"),
            file: FileConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.ensure_log_dir().unwrap();
        assert!(tmp.path().join("nested").is_dir());
    }
}
