use thiserror::Error;

/// Ошибки загрузки и проверки настроек менеджера.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("source_id must not be empty")]
    EmptySourceId,

    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must be non-zero")]
    InvalidPort,

    #[error("pool_size must be at least 1")]
    EmptyPool,

    #[error("min_idle ({min_idle}) exceeds pool_size ({pool_size})")]
    MinIdleExceedsPool { min_idle: usize, pool_size: usize },

    #[error("channel_capacity must be at least 1")]
    ZeroCapacity,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}
