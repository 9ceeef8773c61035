use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Префикс переменных окружения (`RELAY_HOST`, `RELAY_SOURCE_ID`, ...).
pub const ENV_PREFIX: &str = "RELAY";

/// Куда отвечающая сторона публикует ответ на запрос.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPolicy {
    /// Ответ идёт в канал запроса.
    SameChannel,
    /// Ответ идёт в канал `{prefix}{source_id запрашивающего}`, имя которого
    /// передаётся в конверте запроса.
    Dedicated { prefix: String },
}

impl ReplyPolicy {
    /// Выделенный канал ответов для процесса `source_id`, если он нужен.
    pub fn reply_channel(
        &self,
        source_id: &str,
    ) -> Option<String> {
        match self {
            ReplyPolicy::SameChannel => None,
            ReplyPolicy::Dedicated { prefix } => Some(format!("{prefix}{source_id}")),
        }
    }
}

/// Настройки менеджера и подключения к брокеру.
///
/// Загружаются слоями: значения по умолчанию, необязательный файл,
/// переменные окружения с префиксом `RELAY_`. Длительности задаются в
/// миллисекундах.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Пустая строка равнозначна отсутствию пароля.
    pub password: Option<String>,
    /// Идентичность процесса в конвертах.
    pub source_id: String,
    pub ping_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub min_idle: usize,
    pub pool_size: usize,
    /// Таймаут для `send_timed_request_default`.
    pub request_timeout_ms: u64,
    /// Ёмкость буфера каждой подписки.
    pub channel_capacity: usize,
    /// Префикс выделенного канала ответов; при `None` ответы идут в канал запроса.
    pub reply_channel_prefix: Option<String>,
    /// Логировать каждый отправленный и полученный конверт.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            source_id: String::new(),
            ping_interval_ms: 50,
            connect_timeout_ms: 20_000,
            command_timeout_ms: 25_000_000,
            min_idle: 4,
            pool_size: 32,
            request_timeout_ms: 5_000,
            channel_capacity: 1024,
            reply_channel_prefix: None,
            debug: false,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Настройки по умолчанию для процесса `source_id`.
    pub fn for_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Параметры подключения в форме исходного конструктора.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        let password = password.into();
        Self {
            host: host.into(),
            port,
            password: (!password.is_empty()).then_some(password),
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Загружает настройки из окружения.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(None)
    }

    /// Загружает настройки: значения по умолчанию, затем файл `path` (если
    /// указан), затем переменные окружения `RELAY_*`.
    pub fn load_from(path: Option<&Path>) -> Result<Self, SettingsError> {
        let settings = Self::read(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Как [`Settings::load_from`], но без проверки: вызывающий код может
    /// дополнить значения (например, флагами командной строки) и проверить
    /// их сам.
    pub fn read(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let cfg = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Проверяет согласованность значений.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.source_id.trim().is_empty() {
            return Err(SettingsError::EmptySourceId);
        }
        if self.host.trim().is_empty() {
            return Err(SettingsError::EmptyHost);
        }
        if self.port == 0 {
            return Err(SettingsError::InvalidPort);
        }
        if self.pool_size == 0 {
            return Err(SettingsError::EmptyPool);
        }
        if self.min_idle > self.pool_size {
            return Err(SettingsError::MinIdleExceedsPool {
                min_idle: self.min_idle,
                pool_size: self.pool_size,
            });
        }
        if self.channel_capacity == 0 {
            return Err(SettingsError::ZeroCapacity);
        }
        for (name, value) in [
            ("ping_interval_ms", self.ping_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("command_timeout_ms", self.command_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reply_policy(&self) -> ReplyPolicy {
        match self.reply_channel_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => ReplyPolicy::Dedicated {
                prefix: prefix.to_string(),
            },
            _ => ReplyPolicy::SameChannel,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for key in [
            "RELAY_HOST",
            "RELAY_PORT",
            "RELAY_SOURCE_ID",
            "RELAY_POOL_SIZE",
            "RELAY_DEBUG",
        ] {
            env::remove_var(key);
        }
    }

    /// Тест проверяет значения по умолчанию подключения.
    #[test]
    fn test_defaults() {
        let s = Settings::for_source("node-a");
        assert_eq!(s.address(), "127.0.0.1:6379");
        assert_eq!(s.ping_interval(), Duration::from_millis(50));
        assert_eq!(s.connect_timeout(), Duration::from_secs(20));
        assert_eq!(s.command_timeout(), Duration::from_millis(25_000_000));
        assert_eq!((s.min_idle, s.pool_size), (4, 32));
        assert_eq!(s.reply_policy(), ReplyPolicy::SameChannel);
        assert!(s.validate().is_ok());
    }

    /// Тест проверяет, что пустой пароль считается отсутствующим.
    #[test]
    fn test_empty_password() {
        let s = Settings::new("localhost", 6380, "", "node-a");
        assert!(s.password.is_none());
        assert!(s.password().is_none());

        let s = Settings::new("localhost", 6380, "pw", "node-a");
        assert_eq!(s.password(), Some("pw"));
    }

    /// Тест проверяет отказы валидации.
    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            Settings::default().validate(),
            Err(SettingsError::EmptySourceId)
        ));

        let s = Settings {
            min_idle: 8,
            pool_size: 4,
            ..Settings::for_source("n")
        };
        assert!(matches!(
            s.validate(),
            Err(SettingsError::MinIdleExceedsPool { min_idle: 8, pool_size: 4 })
        ));

        let s = Settings {
            request_timeout_ms: 0,
            ..Settings::for_source("n")
        };
        assert!(matches!(
            s.validate(),
            Err(SettingsError::ZeroDuration("request_timeout_ms"))
        ));
    }

    /// Тест проверяет выделенный канал ответов.
    #[test]
    fn test_dedicated_reply_policy() {
        let s = Settings {
            reply_channel_prefix: Some("relay:reply:".to_string()),
            ..Settings::for_source("node-b")
        };
        let policy = s.reply_policy();
        assert_eq!(
            policy.reply_channel("node-b").as_deref(),
            Some("relay:reply:node-b")
        );
        assert_eq!(ReplyPolicy::SameChannel.reply_channel("node-b"), None);
    }

    /// Тест проверяет загрузку из переменных окружения.
    #[test]
    #[serial]
    fn test_load_from_env() {
        clear_env();
        env::set_var("RELAY_SOURCE_ID", "env-node");
        env::set_var("RELAY_PORT", "6390");
        env::set_var("RELAY_DEBUG", "true");

        let s = Settings::load().unwrap();
        assert_eq!(s.source_id, "env-node");
        assert_eq!(s.port, 6390);
        assert!(s.debug);
        assert_eq!(s.host, "127.0.0.1");

        clear_env();
    }

    /// Тест проверяет, что окружение перекрывает файл.
    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "source_id = \"file-node\"\nhost = \"broker.local\"\npool_size = 8\nmin_idle = 2").unwrap();

        env::set_var("RELAY_POOL_SIZE", "16");
        let s = Settings::load_from(Some(file.path())).unwrap();
        assert_eq!(s.source_id, "file-node");
        assert_eq!(s.host, "broker.local");
        assert_eq!(s.pool_size, 16);
        assert_eq!(s.min_idle, 2);

        clear_env();
    }

    /// Тест проверяет, что загрузка без source id отклоняется.
    #[test]
    #[serial]
    fn test_load_without_source_id_fails() {
        clear_env();
        assert!(matches!(
            Settings::load(),
            Err(SettingsError::EmptySourceId)
        ));

        let mut s = Settings::read(None).unwrap();
        s.source_id = "late-node".to_string();
        assert!(s.validate().is_ok());
    }
}
