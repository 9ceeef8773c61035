//! Слушатели каналов и их реестр на клиенте.
//!
//! Слушатель привязан к одному каналу и получает каждый входящий конверт
//! этого канала (сообщения и запросы; ответы поглощаются корреляцией).
//! Конверты собственного процесса доходят только до слушателей с
//! `self_activating() == true`.

pub mod registry;

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use relay_error::{ListenerError, RelayResult};

pub use registry::{DispatchReport, ListenerRegistry};

use crate::{client::Client, envelope::Envelope};

/// Входящий конверт вместе с возможностью ответить на него.
#[derive(Clone)]
pub struct Delivery {
    envelope: Envelope,
    client: Client,
}

impl Delivery {
    pub(crate) fn new(
        envelope: Envelope,
        client: Client,
    ) -> Self {
        Self { envelope, client }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    pub fn payload(&self) -> &Bytes {
        &self.envelope.payload
    }

    /// Клиент, которому доставлен конверт.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Требует ли конверт ответа.
    pub fn is_request(&self) -> bool {
        self.envelope.is_request()
    }

    /// Отвечает на запрос. Для обычного сообщения ничего не отправляет и
    /// возвращает `Ok(false)`.
    pub async fn respond(
        &self,
        payload: impl Into<Bytes>,
    ) -> RelayResult<bool> {
        self.client.respond(&self.envelope, payload).await
    }
}

/// Обработчик входящих конвертов одного канала.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Канал, на который подписан слушатель.
    fn channel(&self) -> &str;

    /// Получать ли конверты, отправленные этим же процессом.
    fn self_activating(&self) -> bool {
        false
    }

    /// Обрабатывает входящий конверт. Ошибка логируется и не влияет на
    /// остальных слушателей.
    async fn on_receive(
        &self,
        delivery: Delivery,
    ) -> Result<(), ListenerError>;
}

/// Слушатель из замыкания.
pub struct FnListener<F> {
    channel: String,
    self_activating: bool,
    handler: F,
}

impl<F, Fut> FnListener<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    pub fn new(
        channel: impl Into<String>,
        self_activating: bool,
        handler: F,
    ) -> Self {
        Self {
            channel: channel.into(),
            self_activating,
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> Listener for FnListener<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    fn channel(&self) -> &str {
        &self.channel
    }

    fn self_activating(&self) -> bool {
        self.self_activating
    }

    async fn on_receive(
        &self,
        delivery: Delivery,
    ) -> Result<(), ListenerError> {
        (self.handler)(delivery).await
    }
}

/// Упаковывает замыкание в `Arc<dyn Listener>`.
pub fn listener_fn<F, Fut>(
    channel: impl Into<String>,
    self_activating: bool,
    handler: F,
) -> Arc<dyn Listener>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    Arc::new(FnListener::new(channel, self_activating, handler))
}
