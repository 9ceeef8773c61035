//! Менеджер обмена сообщениями: одна идентичность процесса, одно
//! подключение к брокеру, набор клиентов и таблица корреляции.

mod router;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use relay_error::{DuplicateRegistration, ErrorExt, RelayResult, ResultExt, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use self::router::Router;
use crate::{
    client::Client,
    config::{ReplyPolicy, Settings},
    correlation::Correlator,
    envelope::{self, Envelope, EnvelopeKind},
    error::SettingsError,
    logging::log_by_status,
    transport::{RawMessage, RedisConfig, RedisTransport, Transport},
};

/// Клиенты в порядке регистрации с поиском без учёта регистра.
#[derive(Default)]
struct ClientSet {
    ordered: Vec<Client>,
    index: HashMap<String, usize>,
}

impl ClientSet {
    fn key(id: &str) -> String {
        id.to_lowercase()
    }

    fn get(
        &self,
        id: &str,
    ) -> Option<&Client> {
        self.index.get(&Self::key(id)).map(|&i| &self.ordered[i])
    }

    fn insert(
        &mut self,
        client: Client,
    ) {
        self.index.insert(Self::key(client.id()), self.ordered.len());
        self.ordered.push(client);
    }
}

/// Состояние менеджера, общее с клиентами (через `Weak`) и фоновыми
/// задачами маршрутов.
pub(crate) struct Shared {
    source_id: Arc<str>,
    settings: Settings,
    reply_policy: ReplyPolicy,
    transport: Option<Arc<dyn Transport>>,
    clients: RwLock<ClientSet>,
    correlator: Arc<Correlator>,
    router: Router,
    debug: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Выделенный канал ответов этого процесса, если он используется.
    pub(crate) fn reply_channel(&self) -> Option<String> {
        self.reply_policy.reply_channel(&self.source_id)
    }

    pub(crate) fn transport(&self) -> Result<&Arc<dyn Transport>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.transport.as_ref().ok_or(TransportError::NotConnected)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Конверт целиком: на `info` в режиме отладки, иначе на `trace`.
    fn trace_envelope(
        &self,
        what: &'static str,
        envelope: &Envelope,
    ) {
        let correlation_id = envelope.correlation_id.as_deref().unwrap_or("");
        if self.is_debug() {
            info!(
                channel = %envelope.channel,
                source = %envelope.source_id,
                kind = ?envelope.kind(),
                correlation_id,
                payload = %envelope.payload_lossy(),
                "{what}"
            );
        } else {
            trace!(
                channel = %envelope.channel,
                source = %envelope.source_id,
                kind = ?envelope.kind(),
                correlation_id,
                "{what}"
            );
        }
    }

    pub(crate) fn clients_snapshot(&self) -> Vec<Client> {
        self.clients.read().ordered.clone()
    }

    /// Сериализует и публикует конверт.
    pub(crate) async fn publish(
        &self,
        envelope: &Envelope,
    ) -> RelayResult<()> {
        let transport = self.transport()?;
        let bytes = envelope::encode(envelope)?;
        self.trace_envelope("outbound envelope", envelope);

        transport
            .publish(&envelope.channel, bytes)
            .await
            .with_context(|| format!("publish to channel '{}'", envelope.channel))
    }

    /// Гарантирует, что канал подписан и обслуживается маршрутом.
    pub(crate) async fn ensure_route(
        self: &Arc<Self>,
        channel: &str,
    ) -> RelayResult<()> {
        self.router.ensure(self, channel).await?;
        Ok(())
    }

    /// Разбирает входящее сообщение канала.
    ///
    /// Некорректный конверт логируется и отбрасывается. Ответ отдаётся
    /// коррелятору и слушателям не показывается; остальное уходит в
    /// очередь слушателей канала.
    fn route_inbound(
        &self,
        raw: RawMessage,
        to_listeners: &mpsc::UnboundedSender<Envelope>,
    ) {
        let mut envelope = match envelope::decode(&raw.channel, &raw.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                log_by_status!(
                    err.status_code(),
                    channel = %raw.channel,
                    error = %err,
                    "dropping malformed envelope"
                );
                return;
            }
        };
        if envelope.channel != *raw.channel {
            debug!(
                channel = %raw.channel,
                declared = %envelope.channel,
                "envelope declares another channel, routing by subscription"
            );
            envelope.channel = raw.channel.to_string();
        }

        self.trace_envelope("inbound envelope", &envelope);

        if envelope.kind() == EnvelopeKind::Response {
            if let Some(correlation_id) = envelope.correlation_id.as_deref() {
                if !self.correlator.resolve(correlation_id, envelope.payload.clone()) {
                    trace!(
                        channel = %envelope.channel,
                        correlation_id,
                        "response for another process or already settled"
                    );
                }
            }
            return;
        }
        // Получатель пропадает только при остановке маршрута.
        let _ = to_listeners.send(envelope);
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.router.close();
        let cancelled = self.correlator.cancel_all();
        debug!(cancelled, "manager closed");
        true
    }
}

/// Менеджер обмена сообщениями процесса.
///
/// Создаётся явно и передаётся туда, где нужен. Клиенты, полученные из
/// [`Manager::register_client`], держат на него только слабую ссылку.
pub struct Manager {
    shared: Arc<Shared>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Manager {
    /// Подключается к брокеру по настройкам.
    ///
    /// Неудачное подключение не является ошибкой конструирования: оно
    /// логируется, менеджер остаётся в деградированном состоянии, и любая
    /// публикация или подписка возвращает `TransportError::NotConnected`.
    pub async fn connect(settings: Settings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let config = RedisConfig::from(&settings);

        let transport: Option<Arc<dyn Transport>> = match RedisTransport::connect(config).await {
            Ok(transport) => Some(Arc::new(transport)),
            Err(err) => {
                error!(
                    address = %settings.address(),
                    error = %err,
                    "unable to connect to the message broker; messaging is disabled until the process is restarted with a reachable broker"
                );
                None
            }
        };
        Ok(Self::build(settings, transport))
    }

    /// Менеджер поверх готового транспорта.
    pub fn with_transport(
        settings: Settings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self::build(settings, Some(transport)))
    }

    fn build(
        settings: Settings,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            source_id: Arc::from(settings.source_id.as_str()),
            reply_policy: settings.reply_policy(),
            debug: AtomicBool::new(settings.debug),
            settings,
            transport,
            clients: RwLock::new(ClientSet::default()),
            correlator: Arc::new(Correlator::new()),
            router: Router::default(),
            closed: AtomicBool::new(false),
        });
        info!(
            source_id = %shared.source_id,
            connected = shared.transport.is_some(),
            "messaging manager created"
        );
        Self { shared }
    }

    pub fn source_id(&self) -> &str {
        &self.shared.source_id
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Есть ли рабочее соединение с брокером.
    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
            && self
                .shared
                .transport
                .as_ref()
                .is_some_and(|t| t.is_connected())
    }

    /// Регистрирует клиента или возвращает уже существующего.
    ///
    /// Id сравниваются без учёта регистра; повторная регистрация пишет
    /// предупреждение в лог.
    pub fn register_client(
        &self,
        id: impl Into<String>,
    ) -> Client {
        let (client, duplicate) = self.register(id.into());
        if let Some(dup) = duplicate {
            warn!(error = %dup, "duplicate client registration, returning existing client");
        }
        client
    }

    /// Регистрирует клиента; занятый id возвращается как ошибка.
    pub fn try_register_client(
        &self,
        id: impl Into<String>,
    ) -> Result<Client, DuplicateRegistration> {
        match self.register(id.into()) {
            (client, None) => Ok(client),
            (_, Some(dup)) => Err(dup),
        }
    }

    fn register(
        &self,
        id: String,
    ) -> (Client, Option<DuplicateRegistration>) {
        let mut clients = self.shared.clients.write();
        if let Some(existing) = clients.get(&id) {
            let dup = DuplicateRegistration {
                requested: id,
                existing: existing.id().to_string(),
            };
            return (existing.clone(), Some(dup));
        }

        let client = Client::new(
            id,
            self.shared.source_id.clone(),
            Arc::downgrade(&self.shared),
        );
        clients.insert(client.clone());
        debug!(client = client.id(), "client registered");
        (client, None)
    }

    /// Клиент по id (без учёта регистра).
    pub fn client(
        &self,
        id: &str,
    ) -> Option<Client> {
        self.shared.clients.read().get(id).cloned()
    }

    /// Клиенты в порядке регистрации.
    pub fn clients(&self) -> Vec<Client> {
        self.shared.clients_snapshot()
    }

    pub fn set_debug(
        &self,
        enabled: bool,
    ) {
        self.shared.debug.store(enabled, Ordering::Relaxed);
        info!(enabled, "envelope debug logging toggled");
    }

    pub fn is_debug(&self) -> bool {
        self.shared.is_debug()
    }

    /// Количество запросов, ожидающих ответа.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Каналы, на которые менеджер подписан у брокера.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.shared.router.channels()
    }

    /// Останавливает маршруты, отменяет ожидающие запросы и закрывает
    /// соединение с брокером. Повторный вызов ничего не делает.
    pub async fn shutdown(&self) {
        if !self.shared.close() {
            return;
        }
        if let Some(transport) = &self.shared.transport {
            transport.close().await;
        }
        info!(source_id = %self.shared.source_id, "messaging manager shut down");
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shared.close();
    }
}
