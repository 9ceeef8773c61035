//! Транспортный слой поверх pub/sub брокера.
//!
//! Ядру обмена сообщениями нужны только две возможности брокера:
//! `publish(channel, bytes)` и `subscribe(channel)`, с асинхронной доставкой
//! «как минимум один раз» без порядка между каналами:
//!
//! - `hub`: локальное веерное распределение входящих сообщений по подписчикам.
//! - `memory`: внутрипроцессный брокер (тесты, встраивание).
//! - `redis`: подключение к RESP-совместимому брокеру по TCP.
//! - `message`, `subscription`: сырые входящие сообщения и поток подписки.

pub mod hub;
pub mod memory;
pub mod message;
pub mod redis;
pub mod subscription;

use async_trait::async_trait;
use bytes::Bytes;
use relay_error::TransportError;

pub use hub::{Hub, HubStats};
pub use memory::{MemoryBroker, MemoryTransport};
pub use message::RawMessage;
pub use redis::{RedisConfig, RedisTransport};
pub use subscription::Subscription;

/// Возможности брокера, необходимые менеджеру.
///
/// Реализация обязана быть идемпотентной по подписке на канал с точки зрения
/// брокера; веерную рассылку по слушателям выполняет менеджер.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Публикует уже сериализованный конверт в канал.
    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Открывает поток входящих сообщений канала.
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Subscription, TransportError>;

    /// Есть ли рабочее соединение с брокером.
    fn is_connected(&self) -> bool;

    /// Освобождает соединения. Последующие вызовы завершаются
    /// `TransportError::Closed` или `NotConnected`.
    async fn close(&self);
}
