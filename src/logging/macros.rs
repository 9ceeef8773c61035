/// Логирует событие на уровне, который задаёт код статуса ошибки
/// ([`relay_error::StatusCode::log_level`]).
///
/// ```ignore
/// log_by_status!(err.status_code(), error = %err, "listener failed");
/// ```
macro_rules! log_by_status {
    ($status:expr, $($arg:tt)+) => {
        match $status.log_level() {
            ::relay_error::LogLevel::Debug => ::tracing::debug!($($arg)+),
            ::relay_error::LogLevel::Warn => ::tracing::warn!($($arg)+),
            ::relay_error::LogLevel::Error => ::tracing::error!($($arg)+),
        }
    };
}

pub(crate) use log_by_status;
