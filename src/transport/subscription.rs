use std::sync::Arc;

use tokio::sync::broadcast;

use super::RawMessage;
use crate::error::RecvError;

/// Подписка на конкретный канал по имени.
///
/// Предоставляет async интерфейс для получения сообщений без обращения к
/// внутреннему `broadcast::Receiver`. Отписка происходит автоматически при
/// `Drop`.
#[derive(Debug)]
pub struct Subscription {
    /// Название канала, на который подписаны.
    pub channel: Arc<str>,
    /// Внутренний приёмник для входящих сообщений.
    pub(crate) inner: broadcast::Receiver<RawMessage>,
}

impl Subscription {
    pub(crate) fn new(
        channel: Arc<str>,
        inner: broadcast::Receiver<RawMessage>,
    ) -> Self {
        Self { channel, inner }
    }

    /// Асинхронно ожидает следующее сообщение из канала.
    ///
    /// # Возвращает
    /// - `Ok(RawMessage)` при успешном получении сообщения
    /// - `Err(RecvError::Closed)` если канал закрыт
    /// - `Err(RecvError::Lagged(n))` если приёмник отстал на `n` сообщений
    pub async fn recv(&mut self) -> Result<RawMessage, RecvError> {
        self.inner.recv().await.map_err(Into::into)
    }

    /// Возвращает имя канала, на который подписались.
    pub fn channel_name(&self) -> &Arc<str> {
        &self.channel
    }

    /// Проверяет, закрыт ли канал (нет активных отправителей).
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
