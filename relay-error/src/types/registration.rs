use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Попытка повторно зарегистрировать клиента с уже занятым id.
///
/// Не является жёсткой ошибкой: менеджер возвращает существующий экземпляр
/// и пишет предупреждение в лог.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRegistration {
    /// Запрошенный id
    pub requested: String,
    /// Id уже зарегистрированного клиента (может отличаться регистром)
    pub existing: String,
}

impl std::fmt::Display for DuplicateRegistration {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "Client id '{}' is already registered as '{}'",
            self.requested, self.existing
        )
    }
}

impl std::error::Error for DuplicateRegistration {}

impl ErrorExt for DuplicateRegistration {
    fn status_code(&self) -> StatusCode {
        StatusCode::AlreadyExists
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
