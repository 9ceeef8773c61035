use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки регистрации
/// - 5xxx: Сериализация
/// - 6xxx: Сеть / транспорт
/// - 9xxx: Обмен сообщениями (запросы, слушатели)
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx: Общие ошибки ===
    Internal = 1003,

    // === 2xxx: Ошибки регистрации ===
    AlreadyExists = 2001,

    // === 5xxx: Сериализация ===
    SerializationFailed = 5003,
    DeserializationFailed = 5004,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    NotConnected = 6008,
    Rejected = 6009,

    // === 9xxx: Обмен сообщениями ===
    RequestTimeout = 9000,
    RequestCancelled = 9001,
    ListenerFailed = 9002,
    ListenerPanicked = 9003,
}

/// Уровень, на котором логируется ошибка с данным кодом.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            // Таймаут запроса является штатным исходом, а не сбоем.
            Self::RequestTimeout | Self::RequestCancelled => LogLevel::Debug,
            Self::AlreadyExists
            | Self::SerializationFailed
            | Self::DeserializationFailed
            | Self::Timeout
            | Self::ConnectionClosed
            | Self::ProtocolError
            | Self::Rejected
            | Self::ListenerFailed => LogLevel::Warn,
            Self::Internal
            | Self::Io
            | Self::ConnectionFailed
            | Self::NotConnected
            | Self::ListenerPanicked => LogLevel::Error,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
