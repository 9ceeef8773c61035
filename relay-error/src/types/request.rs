use std::{any::Any, time::Duration};

use crate::{ErrorExt, StatusCode, TransportError};

/// Исход запроса с ожиданием ответа, отличный от успешного ответа.
///
/// `Timeout` является штатным результатом, а не сбоем: вызывающий код решает, что
/// с ним делать.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Ответ не пришёл до истечения дедлайна
    Timeout {
        correlation_id: String,
        channel: String,
        after: Duration,
    },
    /// Ожидание прервано (отмена или остановка менеджера)
    Cancelled { correlation_id: String },
    /// Запрос не удалось опубликовать
    Transport(TransportError),
}

impl RequestError {
    /// `true`, если запрос завершился по дедлайну.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Timeout {
                correlation_id,
                channel,
                after,
            } => write!(
                f,
                "Request {correlation_id} on channel '{channel}' timed out after {after:?}"
            ),
            Self::Cancelled { correlation_id } => {
                write!(f, "Request {correlation_id} was cancelled")
            }
            Self::Transport(err) => write!(f, "Request could not be sent: {err}"),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl ErrorExt for RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::RequestTimeout,
            Self::Cancelled { .. } => StatusCode::RequestCancelled,
            Self::Transport(err) => err.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "request".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Timeout { channel, .. } = self {
            tags.push(("channel", channel.clone()));
        }
        tags
    }
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что ошибка транспорта сохраняет свой статус.
    #[test]
    fn test_transport_status_passthrough() {
        let err: RequestError = TransportError::NotConnected.into();
        assert_eq!(err.status_code(), StatusCode::NotConnected);
        assert!(!err.is_timeout());
    }

    /// Тест проверяет текст сообщения о таймауте.
    #[test]
    fn test_timeout_display() {
        let err = RequestError::Timeout {
            correlation_id: "42".to_string(),
            channel: "unanswered".to_string(),
            after: Duration::from_millis(500),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Request 42 on channel 'unanswered' timed out after 500ms"
        );
    }
}
