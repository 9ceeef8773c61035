use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки кодирования/декодирования конверта сообщения.
///
/// На стороне приёма такая ошибка логируется, сообщение отбрасывается, а
/// цикл доставки продолжает работу.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Не удалось сериализовать конверт
    Encode { reason: String },
    /// Не удалось разобрать входящие байты
    Decode { channel: String, reason: String },
}

impl std::fmt::Display for CodecError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Encode { reason } => write!(f, "Envelope encoding failed: {reason}"),
            Self::Decode { channel, reason } => {
                write!(f, "Malformed envelope on channel '{channel}': {reason}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

impl ErrorExt for CodecError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Encode { .. } => StatusCode::SerializationFailed,
            Self::Decode { .. } => StatusCode::DeserializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "codec".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Decode { channel, .. } = self {
            tags.push(("channel", channel.clone()));
        }
        tags
    }
}
