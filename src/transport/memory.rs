use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use relay_error::TransportError;
use tracing::trace;

use super::{Hub, HubStats, Subscription, Transport};

/// Внутрипроцессный брокер.
///
/// Несколько менеджеров, подключённых к одному `MemoryBroker` через
/// [`MemoryBroker::transport`], ведут себя как отдельные процессы на общем
/// брокере.
#[derive(Clone)]
pub struct MemoryBroker {
    hub: Arc<Hub>,
}

/// Подключение одного менеджера к [`MemoryBroker`].
pub struct MemoryTransport {
    hub: Arc<Hub>,
    connected: AtomicBool,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub::new(capacity)),
        }
    }

    /// Новое подключение к брокеру.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.hub.clone(),
            connected: AtomicBool::new(true),
        }
    }

    /// Публикует произвольные байты в обход кодека (например, заведомо
    /// некорректный конверт).
    pub fn publish_raw(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
    ) -> usize {
        self.hub.publish(channel, payload.into())
    }

    /// Общий распределитель брокера.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Счётчики публикаций брокера.
    pub fn stats(&self) -> HubStats {
        self.hub.stats()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MemoryTransport {
    /// Имитирует потерю или восстановление соединения с брокером.
    pub fn set_connected(
        &self,
        connected: bool,
    ) {
        self.connected.store(connected, Ordering::Release);
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let receivers = self.hub.publish(channel, payload);
        trace!(channel, receivers, "memory publish");
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        let (subscription, _) = self.hub.subscribe(channel);
        Ok(subscription)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.set_connected(false);
    }
}
