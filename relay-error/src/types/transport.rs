use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспорта: соединение с брокером, публикация, подписка.
///
/// Возвращаются вызывающему коду как есть. Слой обмена сообщениями не
/// повторяет операции самостоятельно.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Соединение с брокером не было установлено
    NotConnected,
    /// Транспорт или менеджер уже закрыт
    Closed,
    /// Не удалось подключиться
    ConnectionFailed { address: String, reason: String },
    /// Таймаут подключения
    ConnectTimeout { address: String },
    /// Таймаут выполнения команды
    CommandTimeout { command: String },
    /// Ошибка ввода-вывода на установленном соединении
    Io { reason: String },
    /// Брокер отклонил команду
    Rejected { command: String, reason: String },
    /// Нарушение протокола брокера
    Protocol { reason: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Transport is not connected to the broker"),
            Self::Closed => write!(f, "Transport is closed"),
            Self::ConnectionFailed { address, reason } => {
                write!(f, "Failed to connect to {address}: {reason}")
            }
            Self::ConnectTimeout { address } => write!(f, "Connection timeout to {address}"),
            Self::CommandTimeout { command } => write!(f, "Command {command} timed out"),
            Self::Io { reason } => write!(f, "I/O error: {reason}"),
            Self::Rejected { command, reason } => {
                write!(f, "Broker rejected {command}: {reason}")
            }
            Self::Protocol { reason } => write!(f, "Protocol error: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::NotConnected,
            Self::Closed => StatusCode::ConnectionClosed,
            Self::ConnectionFailed { .. } => StatusCode::ConnectionFailed,
            Self::ConnectTimeout { .. } | Self::CommandTimeout { .. } => StatusCode::Timeout,
            Self::Io { .. } => StatusCode::Io,
            Self::Rejected { .. } => StatusCode::Rejected,
            Self::Protocol { .. } => StatusCode::ProtocolError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "transport".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::ConnectionFailed { address, .. } | Self::ConnectTimeout { address } => {
                tags.push(("address", address.clone()));
            }
            Self::CommandTimeout { command } | Self::Rejected { command, .. } => {
                tags.push(("command", command.clone()));
            }
            _ => {}
        }

        tags
    }
}

/// Конвертация из std::io::Error
impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Io {
                reason: err.to_string(),
            },
        }
    }
}
