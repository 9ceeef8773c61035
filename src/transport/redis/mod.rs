//! Транспорт поверх RESP2-брокера (Redis и совместимые).
//!
//! Публикации идут через пул командных соединений, входящие сообщения
//! читает одно выделенное подписочное соединение и раскладывает их по
//! локальным подпискам через [`Hub`]. Фоновая задача с периодом
//! `ping_interval` проверяет живость пула и переоткрывает оборванное
//! подписочное соединение, повторяя `SUBSCRIBE` для всех локальных
//! подписок.

pub mod connection;
pub mod pool;
pub mod resp;

#[cfg(test)]
pub(crate) mod testing;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use relay_error::TransportError;
use tokio::{
    sync::{oneshot, Mutex},
    task::AbortHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};

pub use connection::Connection;
pub use pool::Pool;

use self::connection::{CommandWriter, FrameReader};
use super::{Hub, HubStats, Subscription, Transport};
use crate::config::Settings;

/// Параметры подключения к брокеру.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// Пустой пароль равнозначен отсутствию пароля.
    pub password: Option<String>,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub min_idle: usize,
    pub pool_size: usize,
    /// Ёмкость буфера каждой локальной подписки.
    pub channel_capacity: usize,
}

impl RedisConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        Connection::connect(
            &self.address(),
            self.password(),
            self.connect_timeout,
            self.command_timeout,
        )
        .await
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for RedisConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            password: settings.password().map(str::to_string),
            ping_interval: settings.ping_interval(),
            connect_timeout: settings.connect_timeout(),
            command_timeout: settings.command_timeout(),
            min_idle: settings.min_idle,
            pool_size: settings.pool_size,
            channel_capacity: settings.channel_capacity,
        }
    }
}

/// Состояние соединений, общее для транспорта и его фоновых задач.
#[derive(Default)]
struct LinkState {
    closed: AtomicBool,
    subscriber_alive: AtomicBool,
    pool_alive: AtomicBool,
}

type AckWaiters = HashMap<String, Vec<oneshot::Sender<()>>>;

/// Подписочное соединение: писатель команд, задача чтения и ожидающие
/// подтверждения `SUBSCRIBE`.
///
/// После обрыва локальные подписки остаются открытыми; фоновая задача
/// открывает соединение заново и повторяет `SUBSCRIBE` для всех каналов
/// [`Hub`].
struct Subscriber {
    config: Arc<RedisConfig>,
    hub: Arc<Hub>,
    state: Arc<LinkState>,
    writer: Mutex<CommandWriter>,
    reader: parking_lot::Mutex<Option<AbortHandle>>,
    acks: parking_lot::Mutex<AckWaiters>,
}

impl Subscriber {
    fn start(
        config: Arc<RedisConfig>,
        state: Arc<LinkState>,
        connection: Connection,
    ) -> Arc<Self> {
        let (reader, writer) = connection.into_split();
        let subscriber = Arc::new(Self {
            hub: Arc::new(Hub::new(config.channel_capacity)),
            config,
            state,
            writer: Mutex::new(writer),
            reader: parking_lot::Mutex::new(None),
            acks: parking_lot::Mutex::new(HashMap::new()),
        });
        subscriber.state.subscriber_alive.store(true, Ordering::Release);
        subscriber.spawn_reader(reader);
        subscriber
    }

    fn spawn_reader(
        self: &Arc<Self>,
        reader: FrameReader,
    ) {
        let task = tokio::spawn(read_loop(reader, Arc::downgrade(self)));
        if let Some(previous) = self.reader.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Отправляет `SUBSCRIBE` и ждёт подтверждения брокера.
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.acks
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);

        let limit = self.config.command_timeout;
        let sent = {
            let mut writer = self.writer.lock().await;
            timeout(limit, writer.send(&[b"SUBSCRIBE", channel.as_bytes()])).await
        };
        let result = match sent {
            Err(_) => Err(subscribe_timeout()),
            Ok(Err(err)) => Err(err),
            Ok(Ok(())) => match timeout(limit, rx).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(TransportError::NotConnected),
                Err(_) => Err(subscribe_timeout()),
            },
        };
        if result.is_err() {
            self.acks.lock().remove(channel);
        }
        result
    }

    fn acknowledge(
        &self,
        channel: &str,
    ) {
        let waiters = self.acks.lock().remove(channel);
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(());
        }
    }

    /// Открывает новое подписочное соединение и повторяет `SUBSCRIBE` для
    /// каждого канала с локальными подписками. Возвращает число каналов.
    async fn reconnect(self: &Arc<Self>) -> Result<usize, TransportError> {
        let (reader, mut fresh) = self.config.open().await?.into_split();

        let mut writer = self.writer.lock().await;
        let channels = self.hub.channels();
        for channel in &channels {
            timeout(
                self.config.command_timeout,
                fresh.send(&[b"SUBSCRIBE", channel.as_bytes()]),
            )
            .await
            .map_err(|_| subscribe_timeout())??;
        }
        *writer = fresh;
        self.state.subscriber_alive.store(true, Ordering::Release);
        self.spawn_reader(reader);
        Ok(channels.len())
    }

    fn stop(&self) {
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
        self.acks.lock().clear();
    }
}

fn subscribe_timeout() -> TransportError {
    TransportError::CommandTimeout {
        command: "SUBSCRIBE".to_string(),
    }
}

/// Подключение к RESP2-брокеру.
pub struct RedisTransport {
    config: Arc<RedisConfig>,
    pool: Arc<Pool>,
    subscriber: Arc<Subscriber>,
    state: Arc<LinkState>,
    maintenance: AbortHandle,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RedisTransport {
    /// Подключается к брокеру: пул командных соединений и подписочное
    /// соединение. Любая ошибка подключения возвращается без повторов.
    pub async fn connect(config: RedisConfig) -> Result<Self, TransportError> {
        let config = Arc::new(config);
        let pool = Arc::new(Pool::connect(config.clone()).await?);
        let connection = config.open().await?;

        let state = Arc::new(LinkState::default());
        state.pool_alive.store(true, Ordering::Release);
        let subscriber = Subscriber::start(config.clone(), state.clone(), connection);

        let maintenance = tokio::spawn(maintenance_loop(
            Arc::downgrade(&pool),
            Arc::downgrade(&subscriber),
            config.ping_interval,
        ));

        info!(address = %config.address(), "connected to broker");
        Ok(Self {
            config,
            pool,
            subscriber,
            state,
            maintenance: maintenance.abort_handle(),
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Счётчики локальной раздачи входящих сообщений.
    pub fn stats(&self) -> HubStats {
        self.subscriber.hub.stats()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.state.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let receivers = self
            .pool
            .execute(&[b"PUBLISH", channel.as_bytes(), &payload])
            .await?;
        trace!(channel, ?receivers, "published");
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        if !self.state.subscriber_alive.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }

        let hub = &self.subscriber.hub;
        let (subscription, created) = hub.subscribe(channel);
        if created {
            if let Err(err) = self.subscriber.subscribe(channel).await {
                hub.remove(channel);
                warn!(channel, error = %err, "broker subscription failed");
                return Err(err);
            }
            debug!(channel, "subscribed on broker");
        }
        Ok(subscription)
    }

    fn is_connected(&self) -> bool {
        !self.state.closed.load(Ordering::Acquire)
            && self.state.subscriber_alive.load(Ordering::Acquire)
            && self.state.pool_alive.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.maintenance.abort();
        self.subscriber.stop();
        self.pool.close().await;
        let stats = self.subscriber.hub.stats();
        self.subscriber.hub.close();
        info!(
            address = %self.config.address(),
            delivered = stats.published,
            undelivered = stats.send_errors,
            "broker connection closed"
        );
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.maintenance.abort();
        self.subscriber.stop();
    }
}

/// Читает push-сообщения подписочного соединения и раздаёт их локальным
/// подпискам.
async fn read_loop(
    mut reader: FrameReader,
    subscriber: Weak<Subscriber>,
) {
    loop {
        let frame = reader.read_frame().await;
        let Some(subscriber) = subscriber.upgrade() else {
            break;
        };
        match frame {
            Ok(frame) => {
                if let Some(channel) = frame.subscribed_channel() {
                    subscriber.acknowledge(&channel);
                } else if let Some((channel, payload)) = frame.into_pubsub_message() {
                    subscriber.hub.publish(&channel, payload);
                } else {
                    trace!("subscription control frame");
                }
            }
            Err(err) => {
                let state = &subscriber.state;
                state.subscriber_alive.store(false, Ordering::Release);
                // Ожидающие подтверждения получат `NotConnected`.
                subscriber.acks.lock().clear();
                if !state.closed.load(Ordering::Acquire) {
                    error!(error = %err, "subscriber connection lost");
                }
                break;
            }
        }
    }
}

/// Раз в `period` проверяет пул и восстанавливает подписочное соединение.
async fn maintenance_loop(
    pool: Weak<Pool>,
    subscriber: Weak<Subscriber>,
    period: Duration,
) {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let (Some(pool), Some(subscriber)) = (pool.upgrade(), subscriber.upgrade()) else {
            break;
        };
        let state = &subscriber.state;
        if state.closed.load(Ordering::Acquire) {
            break;
        }

        let alive = pool.check_liveness().await;
        let was_alive = state.pool_alive.swap(alive, Ordering::AcqRel);
        match (was_alive, alive) {
            (true, false) => warn!("broker stopped answering liveness checks"),
            (false, true) => info!("broker answers liveness checks again"),
            _ => {}
        }

        if !state.subscriber_alive.load(Ordering::Acquire) {
            match subscriber.reconnect().await {
                Ok(channels) => info!(channels, "subscriber connection restored"),
                Err(err) => debug!(error = %err, "subscriber reconnect failed"),
            }
        }
    }
}
