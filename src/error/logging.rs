use thiserror::Error;

/// Ошибки инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Unknown log level '{0}'")]
    InvalidLevel(String),

    #[error("Invalid log filter directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("Log directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}
