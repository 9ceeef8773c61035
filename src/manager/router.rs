use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use dashmap::DashMap;
use relay_error::TransportError;
use tokio::{
    sync::{mpsc, Mutex},
    task::AbortHandle,
};
use tracing::{debug, info, warn};

use super::Shared;
use crate::{envelope::Envelope, error::RecvError, transport::Subscription};

/// Открытый маршрут канала: задача разбора входящих и задача вызова
/// слушателей.
struct Route {
    id: u64,
    dispatch: AbortHandle,
    listeners: AbortHandle,
}

impl Route {
    fn abort(&self) {
        self.dispatch.abort();
        self.listeners.abort();
    }
}

/// Подписки менеджера: не более одной на канал.
///
/// Задача разбора читает подписку, разрешает ответы в корреляторе сразу и
/// передаёт остальные конверты задаче слушателей через неограниченную
/// очередь. Поэтому слушатель, ожидающий ответа на собственный запрос в том
/// же канале, не блокирует доставку этого ответа.
///
/// Когда подписка закрывается без остановки менеджера, маршрут снимается и
/// открывается заново. Если переподписаться не удалось, канала больше нет в
/// [`Router::channels`], и его откроет следующая регистрация или запрос.
#[derive(Default)]
pub(crate) struct Router {
    routes: DashMap<Arc<str>, Route>,
    subscribe_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl Router {
    /// Открывает маршрут канала, если его ещё нет. Возвращает `true`, если
    /// подписка была создана этим вызовом.
    pub(crate) async fn ensure(
        &self,
        shared: &Arc<Shared>,
        channel: &str,
    ) -> Result<bool, TransportError> {
        if self.routes.contains_key(channel) {
            return Ok(false);
        }

        let _guard = self.subscribe_lock.lock().await;
        if self.routes.contains_key(channel) {
            return Ok(false);
        }

        let subscription = shared.transport()?.subscribe(channel).await?;
        let (to_listeners, queue) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(shared);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let listeners = tokio::spawn(listener_loop(weak.clone(), queue));
        let dispatch = tokio::spawn(dispatch_loop(weak, subscription, to_listeners, id));

        self.routes.insert(
            Arc::from(channel),
            Route {
                id,
                dispatch: dispatch.abort_handle(),
                listeners: listeners.abort_handle(),
            },
        );
        debug!(channel, "route opened");
        Ok(true)
    }

    pub(crate) fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.routes.iter().map(|r| r.key().to_string()).collect();
        channels.sort();
        channels
    }

    /// Снимает маршрут `id`, если канал всё ещё обслуживает он.
    async fn forget(
        &self,
        channel: &str,
        id: u64,
    ) -> bool {
        let _guard = self.subscribe_lock.lock().await;
        self.routes.remove_if(channel, |_, route| route.id == id).is_some()
    }

    /// Останавливает все маршруты.
    pub(crate) fn close(&self) {
        for route in self.routes.iter() {
            route.value().abort();
        }
        self.routes.clear();
    }
}

/// Читает подписку канала до её закрытия или остановки менеджера.
async fn dispatch_loop(
    shared: Weak<Shared>,
    mut subscription: Subscription,
    to_listeners: mpsc::UnboundedSender<Envelope>,
    id: u64,
) {
    let channel = subscription.channel_name().clone();
    loop {
        let raw = match subscription.recv().await {
            Ok(raw) => raw,
            Err(RecvError::Lagged(skipped)) => {
                warn!(%channel, skipped, "subscription lagged, envelopes dropped");
                continue;
            }
            Err(RecvError::Closed) => {
                debug!(%channel, "subscription closed");
                let Some(strong) = shared.upgrade() else {
                    break;
                };
                if strong.router.forget(&channel, id).await && !strong.is_closed() {
                    tokio::spawn(reopen(strong, channel));
                }
                break;
            }
        };

        let Some(strong) = shared.upgrade() else {
            break;
        };
        strong.route_inbound(raw, &to_listeners);
    }
}

type RouteFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Заново подписывает канал, чья подписка закрылась.
fn reopen(
    shared: Arc<Shared>,
    channel: Arc<str>,
) -> RouteFuture {
    Box::pin(async move {
        match shared.router.ensure(&shared, &channel).await {
            Ok(_) => info!(%channel, "route reopened"),
            Err(err) => warn!(%channel, error = %err, "route dropped, resubscribe failed"),
        }
    })
}

/// Вызывает слушателей всех клиентов для каждого конверта канала.
///
/// Клиенты обходятся в порядке регистрации, слушатели клиента в порядке
/// их регистрации.
async fn listener_loop(
    shared: Weak<Shared>,
    mut queue: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = queue.recv().await {
        let Some(clients) = shared.upgrade().map(|s| s.clients_snapshot()) else {
            break;
        };
        for client in clients {
            client.dispatch(&envelope).await;
        }
    }
}
