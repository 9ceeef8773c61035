use std::{any::Any, collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use relay_error::{ErrorExt, ListenerDispatchError, ListenerError};
use tracing::trace;

use super::{Delivery, Listener};
use crate::{client::Client, envelope::Envelope, logging::log_by_status};

/// Итог доставки одного конверта слушателям клиента.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Слушатели, отработавшие без ошибки.
    pub delivered: usize,
    /// Слушатели, пропустившие собственный конверт процесса.
    pub skipped_own: usize,
    /// Слушатели, вернувшие ошибку или запаниковавшие.
    pub failed: usize,
}

/// Слушатели одного клиента, сгруппированные по каналам.
///
/// Внутри канала порядок вызова совпадает с порядком регистрации.
#[derive(Default)]
pub struct ListenerRegistry {
    bindings: RwLock<HashMap<Arc<str>, Vec<Arc<dyn Listener>>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет слушателя. Возвращает `true`, если это первый слушатель
    /// канала у данного клиента.
    pub fn register(
        &self,
        listener: Arc<dyn Listener>,
    ) -> bool {
        let mut bindings = self.bindings.write();
        let list = bindings.entry(Arc::from(listener.channel())).or_default();
        list.push(listener);
        list.len() == 1
    }

    /// Убирает конкретный экземпляр слушателя.
    pub fn remove(
        &self,
        listener: &Arc<dyn Listener>,
    ) -> bool {
        let mut bindings = self.bindings.write();
        let Some(list) = bindings.get_mut(listener.channel()) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !Arc::ptr_eq(l, listener));
        let removed = list.len() != before;
        if list.is_empty() {
            bindings.remove(listener.channel());
        }
        removed
    }

    /// Убирает всех слушателей канала, возвращает их количество.
    pub fn remove_channel(
        &self,
        channel: &str,
    ) -> usize {
        self.bindings
            .write()
            .remove(channel)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Снимок слушателей канала в порядке регистрации.
    pub fn listeners_for(
        &self,
        channel: &str,
    ) -> Vec<Arc<dyn Listener>> {
        self.bindings
            .read()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Каналы, на которых есть слушатели (по алфавиту).
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .bindings
            .read()
            .keys()
            .map(|c| c.to_string())
            .collect();
        channels.sort();
        channels
    }

    pub fn listener_count(
        &self,
        channel: &str,
    ) -> usize {
        self.bindings.read().get(channel).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Доставляет конверт слушателям его канала по очереди.
    ///
    /// Каждый вызов выполняется в отдельной задаче, поэтому паника
    /// слушателя ловится и превращается в `ListenerError::Panicked`.
    /// Конверт, отправленный этим процессом, получают только слушатели с
    /// `self_activating`.
    pub async fn dispatch(
        &self,
        envelope: &Envelope,
        client: &Client,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let own = envelope.is_from(client.source_id());

        for listener in self.listeners_for(&envelope.channel) {
            if own && !listener.self_activating() {
                report.skipped_own += 1;
                continue;
            }

            let delivery = Delivery::new(envelope.clone(), client.clone());
            let task = tokio::spawn(async move { listener.on_receive(delivery).await });
            let outcome = match task.await {
                Ok(result) => result,
                Err(join) if join.is_panic() => Err(ListenerError::Panicked {
                    message: panic_message(join.into_panic()),
                }),
                Err(join) => Err(ListenerError::failed(join.to_string())),
            };

            match outcome {
                Ok(()) => report.delivered += 1,
                Err(source) => {
                    report.failed += 1;
                    let err = ListenerDispatchError {
                        client_id: client.id().to_string(),
                        channel: envelope.channel.clone(),
                        source,
                    };
                    log_by_status!(
                        err.status_code(),
                        client = %err.client_id,
                        channel = %err.channel,
                        status = %err.status_code(),
                        error = %err,
                        "listener failed"
                    );
                }
            }
        }

        trace!(client = client.id(), channel = %envelope.channel, ?report, "dispatched");
        report
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use parking_lot::Mutex;

    use super::*;
    use crate::listener::listener_fn;

    fn detached_client(source_id: &str) -> Client {
        Client::new("svc", Arc::from(source_id), Weak::new())
    }

    fn recorder(
        channel: &str,
        self_activating: bool,
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn Listener> {
        listener_fn(channel, self_activating, move |d: Delivery| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{tag}:{}", d.envelope().payload_lossy()));
                Ok::<(), ListenerError>(())
            }
        })
    }

    /// Тест проверяет учёт первого слушателя канала и удаление.
    #[test]
    fn test_register_and_remove() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = recorder("ping", false, "a", log.clone());
        assert!(registry.register(a.clone()));
        assert!(!registry.register(recorder("ping", false, "b", log.clone())));
        assert!(registry.register(recorder("news", false, "c", log)));

        assert_eq!(registry.listener_count("ping"), 2);
        assert_eq!(registry.channels(), vec!["news", "ping"]);

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert_eq!(registry.listener_count("ping"), 1);
        assert_eq!(registry.remove_channel("ping"), 1);
        assert_eq!(registry.remove_channel("ping"), 0);
        assert_eq!(registry.channels(), vec!["news"]);
    }

    /// Тест проверяет порядок вызова и фильтрацию собственных конвертов.
    #[tokio::test]
    async fn test_dispatch_order_and_self_filter() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recorder("ping", false, "plain", log.clone()));
        registry.register(recorder("ping", true, "self", log.clone()));

        let client = detached_client("node-a");

        let foreign = Envelope::message("node-b", "ping", "x");
        let report = registry.dispatch(&foreign, &client).await;
        assert_eq!(report.delivered, 2);

        let own = Envelope::message("node-a", "ping", "y");
        let report = registry.dispatch(&own, &client).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped_own, 1);

        assert_eq!(*log.lock(), vec!["plain:x", "self:x", "self:y"]);
    }

    /// Тест проверяет, что ошибка и паника слушателя не мешают следующим.
    #[tokio::test]
    async fn test_failures_are_isolated() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.register(listener_fn("ping", false, |_d: Delivery| async {
            Err::<(), ListenerError>(ListenerError::failed("boom"))
        }));
        registry.register(listener_fn("ping", false, |_d: Delivery| async {
            if true {
                panic!("listener exploded");
            }
            Ok::<(), ListenerError>(())
        }));
        registry.register(recorder("ping", false, "after", log.clone()));

        let client = detached_client("node-a");
        let report = registry
            .dispatch(&Envelope::message("node-b", "ping", "z"), &client)
            .await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock(), vec!["after:z"]);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "non-string panic payload");
    }
}
