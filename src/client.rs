use std::{
    fmt,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use relay_error::{ListenerError, RelayResult, ResultExt, TransportError};
use tracing::{debug, warn};

use crate::{
    correlation::PendingReply,
    envelope::Envelope,
    listener::{listener_fn, Delivery, DispatchReport, Listener, ListenerRegistry},
    manager::Shared,
};

/// Логический участник обмена внутри процесса.
///
/// Создаётся только через [`Manager::register_client`](crate::Manager::register_client).
/// Клон указывает на того же клиента. Клиент не продлевает жизнь
/// менеджера: после его остановки операции возвращают
/// `TransportError::Closed`.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    id: String,
    source_id: Arc<str>,
    registry: ListenerRegistry,
    shared: Weak<Shared>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Client {
    pub(crate) fn new(
        id: impl Into<String>,
        source_id: Arc<str>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                id: id.into(),
                source_id,
                registry: ListenerRegistry::new(),
                shared,
            }),
        }
    }

    /// Id клиента в том регистре, в котором он был зарегистрирован.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Source id процесса, от имени которого отправляются конверты.
    pub fn source_id(&self) -> &str {
        &self.inner.source_id
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    /// Каналы, на которых у клиента есть слушатели.
    pub fn channels(&self) -> Vec<String> {
        self.inner.registry.channels()
    }

    pub fn listener_count(
        &self,
        channel: &str,
    ) -> usize {
        self.inner.registry.listener_count(channel)
    }

    fn shared(&self) -> Result<Arc<Shared>, TransportError> {
        self.inner.shared.upgrade().ok_or(TransportError::Closed)
    }

    /// Публикует обычное сообщение (fire-and-forget).
    ///
    /// Ошибка транспорта возвращается вызывающему; повторов нет.
    pub async fn send_message(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
    ) -> RelayResult<()> {
        let shared = self.shared()?;
        let envelope = Envelope::message(self.source_id(), channel, payload);
        shared
            .publish(&envelope)
            .await
            .with_context(|| format!("client '{}' send_message", self.id()))
    }

    /// Регистрирует слушателя и при необходимости подписывает канал.
    ///
    /// Если подписку открыть не удалось, слушатель снимается и ошибка
    /// возвращается вызывающему.
    pub async fn register_listener(
        &self,
        listener: Arc<dyn Listener>,
    ) -> RelayResult<()> {
        let shared = self.shared()?;
        let channel = listener.channel().to_string();
        self.inner.registry.register(listener.clone());

        if let Err(err) = shared.ensure_route(&channel).await {
            self.inner.registry.remove(&listener);
            return Err(err.context(format!("subscribe channel '{channel}'")));
        }
        debug!(client = self.id(), %channel, "listener registered");
        Ok(())
    }

    /// Регистрирует слушателя-замыкание.
    pub async fn on<F, Fut>(
        &self,
        channel: &str,
        self_activating: bool,
        handler: F,
    ) -> RelayResult<()>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.register_listener(listener_fn(channel, self_activating, handler))
            .await
    }

    /// Снимает всех слушателей канала. Подписка на брокере остаётся.
    pub fn remove_listeners(
        &self,
        channel: &str,
    ) -> usize {
        self.inner.registry.remove_channel(channel)
    }

    /// Публикует запрос и возвращает ожидание ответа с дедлайном `timeout`.
    ///
    /// Запись корреляции создаётся до публикации, поэтому быстрый ответ
    /// не теряется. Ошибка публикации снимает запись и возвращается сразу.
    pub async fn send_timed_request(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> RelayResult<PendingReply> {
        let shared = self.shared()?;
        let reply_channel = shared.reply_channel();
        let reply_target = reply_channel.as_deref().unwrap_or(channel);
        shared
            .ensure_route(reply_target)
            .await
            .with_context(|| format!("subscribe reply channel '{reply_target}'"))?;

        let pending = shared.correlator().register(channel, timeout);
        let envelope = Envelope::request(
            self.source_id(),
            channel,
            payload,
            pending.correlation_id(),
            reply_channel,
        );

        if let Err(err) = shared.publish(&envelope).await {
            if let Some(transport) = err.downcast_ref::<TransportError>() {
                shared
                    .correlator()
                    .fail(pending.correlation_id(), transport.clone());
            }
            return Err(err.context(format!("client '{}' send_timed_request", self.id())));
        }
        Ok(pending)
    }

    /// Запрос с таймаутом из настроек менеджера.
    pub async fn send_timed_request_default(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
    ) -> RelayResult<PendingReply> {
        let timeout = self.shared()?.settings().request_timeout();
        self.send_timed_request(channel, payload, timeout).await
    }

    /// Запрос с ожиданием ответа; таймаут возвращается как ошибка
    /// `RequestError::Timeout`.
    pub async fn request(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> RelayResult<Bytes> {
        let pending = self.send_timed_request(channel, payload, timeout).await?;
        Ok(pending.await?)
    }

    /// Отвечает на запрос `request`.
    ///
    /// Возвращает `Ok(false)` без публикации, если `request` не является
    /// запросом.
    pub async fn respond(
        &self,
        request: &Envelope,
        payload: impl Into<Bytes>,
    ) -> RelayResult<bool> {
        let shared = self.shared()?;
        let Some(response) = Envelope::response_to(request, self.source_id(), payload) else {
            warn!(
                client = self.id(),
                channel = %request.channel,
                "respond called for an envelope that is not a request"
            );
            return Ok(false);
        };
        shared
            .publish(&response)
            .await
            .with_context(|| format!("client '{}' respond", self.id()))?;
        Ok(true)
    }

    pub(crate) async fn dispatch(
        &self,
        envelope: &Envelope,
    ) -> DispatchReport {
        self.inner.registry.dispatch(envelope, self).await
    }
}

impl PartialEq for Client {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Client {}

impl fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("source_id", &self.inner.source_id)
            .field("channels", &self.channels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что клиент без менеджера отказывает в операциях.
    #[tokio::test]
    async fn test_detached_client_is_closed() {
        let client = Client::new("svc", Arc::from("node-a"), Weak::new());

        let err = client.send_message("news", "hi").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TransportError>(),
            Some(&TransportError::Closed)
        );
        assert!(client
            .send_timed_request("ping", "x", Duration::from_secs(1))
            .await
            .is_err());
        assert!(client
            .on("ping", false, |_d: Delivery| async { Ok::<(), ListenerError>(()) })
            .await
            .is_err());
    }

    /// Тест проверяет, что клоны указывают на того же клиента.
    #[test]
    fn test_clone_identity() {
        let a = Client::new("svc", Arc::from("node-a"), Weak::new());
        let b = Client::new("svc", Arc::from("node-a"), Weak::new());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.id(), "svc");
        assert_eq!(a.source_id(), "node-a");
    }
}
