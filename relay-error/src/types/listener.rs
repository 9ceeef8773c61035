use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибка, которую возвращает обработчик слушателя.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// Обработчик вернул ошибку
    Failed { reason: String },
    /// Обработчик запаниковал
    Panicked { message: String },
}

impl ListenerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ListenerError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "Listener failed: {reason}"),
            Self::Panicked { message } => write!(f, "Listener panicked: {message}"),
        }
    }
}

impl std::error::Error for ListenerError {}

impl ErrorExt for ListenerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Failed { .. } => StatusCode::ListenerFailed,
            Self::Panicked { .. } => StatusCode::ListenerPanicked,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Сбой доставки конкретному слушателю конкретного клиента.
///
/// Логируется реестром и не влияет на остальных слушателей.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerDispatchError {
    pub client_id: String,
    pub channel: String,
    pub source: ListenerError,
}

impl std::fmt::Display for ListenerDispatchError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "Dispatch to listener of client '{}' on channel '{}' failed: {}",
            self.client_id, self.channel, self.source
        )
    }
}

impl std::error::Error for ListenerDispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl ErrorExt for ListenerDispatchError {
    fn status_code(&self) -> StatusCode {
        self.source.status_code()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", "listener_dispatch".to_string()),
            ("status_code", self.status_code().to_string()),
            ("client", self.client_id.clone()),
            ("channel", self.channel.clone()),
        ]
    }
}
