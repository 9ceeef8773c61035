use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use relay_error::{RequestError, TransportError};
use tokio::{
    sync::oneshot,
    task::AbortHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};
use uuid::Uuid;

use super::PendingReply;

pub(crate) type Resolution = Result<Bytes, RequestError>;

/// Незавершённый запрос.
struct PendingEntry {
    channel: Arc<str>,
    timeout: Duration,
    deadline: Instant,
    sender: oneshot::Sender<Resolution>,
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    fn finish(
        mut self,
        resolution: Resolution,
    ) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // Вызывающий мог уже отказаться от ожидания.
        let _ = self.sender.send(resolution);
    }
}

/// Таблица запросов, ожидающих ответа.
///
/// Вставку выполняет отправитель запроса, разрешение выполняет задача доставки
/// (ответ), задача-таймер (дедлайн) или `PendingReply` при отмене.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<String, PendingEntry>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует новый запрос в канал `channel` с дедлайном через
    /// `timeout` и запускает для него таймер.
    ///
    /// Должен вызываться внутри runtime Tokio.
    pub fn register(
        self: &Arc<Self>,
        channel: &str,
        timeout: Duration,
    ) -> PendingReply {
        let correlation_id = Uuid::new_v4().to_string();
        let deadline = deadline_after(timeout);
        let (sender, receiver) = oneshot::channel();

        self.pending.insert(
            correlation_id.clone(),
            PendingEntry {
                channel: Arc::from(channel),
                timeout,
                deadline,
                sender,
                timer: None,
            },
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let id = correlation_id.clone();
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            if let Some(correlator) = weak.upgrade() {
                correlator.expire(&id);
            }
        });

        // Таймер мог уже сработать при нулевом таймауте.
        if let Some(mut entry) = self.pending.get_mut(&correlation_id) {
            entry.timer = Some(timer.abort_handle());
        }

        trace!(%correlation_id, channel, ?timeout, "timed request registered");
        PendingReply::new(correlation_id, Arc::downgrade(self), receiver)
    }

    /// Разрешает запрос успешным ответом.
    ///
    /// Возвращает `false`, если запроса с таким id нет (уже разрешён, истёк
    /// или никогда не отправлялся этим процессом); такой ответ отбрасывается.
    pub fn resolve(
        &self,
        correlation_id: &str,
        payload: Bytes,
    ) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, entry)) => {
                trace!(
                    correlation_id,
                    channel = %entry.channel,
                    remaining = ?entry.deadline.saturating_duration_since(Instant::now()),
                    "timed request resolved"
                );
                entry.finish(Ok(payload));
                true
            }
            None => {
                trace!(correlation_id, "unmatched response discarded");
                false
            }
        }
    }

    /// Снимает запрос, от которого отказался вызывающий.
    pub fn cancel(
        &self,
        correlation_id: &str,
    ) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, entry)) => {
                trace!(correlation_id, channel = %entry.channel, "timed request cancelled");
                entry.finish(Err(RequestError::Cancelled {
                    correlation_id: correlation_id.to_string(),
                }));
                true
            }
            None => false,
        }
    }

    /// Снимает запрос, который не удалось опубликовать.
    pub fn fail(
        &self,
        correlation_id: &str,
        err: TransportError,
    ) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, entry)) => {
                entry.finish(Err(RequestError::Transport(err)));
                true
            }
            None => false,
        }
    }

    /// Отменяет все незавершённые запросы (остановка менеджера).
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Ожидает ли запрос с данным id ответа.
    pub fn contains(
        &self,
        correlation_id: &str,
    ) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Количество незавершённых запросов.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn expire(
        &self,
        correlation_id: &str,
    ) {
        if let Some((_, entry)) = self.pending.remove(correlation_id) {
            debug!(correlation_id, channel = %entry.channel, timeout = ?entry.timeout, "timed request expired");
            let err = RequestError::Timeout {
                correlation_id: correlation_id.to_string(),
                channel: entry.channel.to_string(),
                after: entry.timeout,
            };
            // Таймер уже отработал, abort не нужен.
            let _ = entry.sender.send(Err(err));
        }
    }
}

/// Дедлайн, который никогда не наступит за время жизни процесса.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Момент истечения запроса. Таймаут, не помещающийся в `Instant`
/// (например `Duration::MAX`), означает ожидание без дедлайна.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что ответ до дедлайна разрешает запрос и снимает
    /// запись.
    #[tokio::test(start_paused = true)]
    async fn test_resolve_before_deadline() {
        let correlator = Arc::new(Correlator::new());
        let reply = correlator.register("ping", Duration::from_secs(2));
        let id = reply.correlation_id().to_string();
        assert!(correlator.contains(&id));

        assert!(correlator.resolve(&id, Bytes::from_static(b"world")));
        assert_eq!(reply.await.unwrap(), Bytes::from_static(b"world"));
        assert!(correlator.is_empty());
    }

    /// Тест проверяет, что `Duration::MAX` означает ожидание без дедлайна,
    /// а не панику при сложении.
    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout() {
        let correlator = Arc::new(Correlator::new());
        let reply = correlator.register("forever", Duration::MAX);
        let id = reply.correlation_id().to_string();

        tokio::time::sleep(Duration::from_secs(86_400 * 365)).await;
        assert!(correlator.contains(&id));

        assert!(correlator.resolve(&id, Bytes::from_static(b"late")));
        assert_eq!(reply.await.unwrap(), Bytes::from_static(b"late"));
    }

    /// Тест проверяет таймаут и снятие записи после него.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let correlator = Arc::new(Correlator::new());
        let reply = correlator.register("unanswered", Duration::from_millis(500));
        let id = reply.correlation_id().to_string();

        let started = Instant::now();
        let err = reply.await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(!correlator.contains(&id));
    }

    /// Тест проверяет, что повторный и опоздавший ответы ничего не меняют.
    #[tokio::test(start_paused = true)]
    async fn test_duplicate_and_late_responses_are_noops() {
        let correlator = Arc::new(Correlator::new());

        let reply = correlator.register("ping", Duration::from_secs(1));
        let id = reply.correlation_id().to_string();
        assert!(correlator.resolve(&id, Bytes::from_static(b"first")));
        assert!(!correlator.resolve(&id, Bytes::from_static(b"second")));
        assert_eq!(reply.await.unwrap(), Bytes::from_static(b"first"));

        let late = correlator.register("ping", Duration::from_millis(10));
        let late_id = late.correlation_id().to_string();
        assert!(late.await.unwrap_err().is_timeout());
        assert!(!correlator.resolve(&late_id, Bytes::from_static(b"late")));
        assert!(!correlator.resolve("never-issued", Bytes::new()));
    }

    /// Тест проверяет, что параллельные запросы в один канал не мешают друг
    /// другу.
    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_same_channel() {
        let correlator = Arc::new(Correlator::new());
        let a = correlator.register("ping", Duration::from_secs(1));
        let b = correlator.register("ping", Duration::from_secs(1));
        assert_ne!(a.correlation_id(), b.correlation_id());

        let b_id = b.correlation_id().to_string();
        let a_id = a.correlation_id().to_string();
        correlator.resolve(&b_id, Bytes::from_static(b"for-b"));
        correlator.resolve(&a_id, Bytes::from_static(b"for-a"));

        assert_eq!(a.await.unwrap(), Bytes::from_static(b"for-a"));
        assert_eq!(b.await.unwrap(), Bytes::from_static(b"for-b"));
    }

    /// Тест проверяет, что отмена всех запросов будит ожидающих.
    #[tokio::test]
    async fn test_cancel_all() {
        let correlator = Arc::new(Correlator::new());
        let a = correlator.register("x", Duration::from_secs(60));
        let b = correlator.register("y", Duration::from_secs(60));

        assert_eq!(correlator.cancel_all(), 2);
        assert!(matches!(a.await, Err(RequestError::Cancelled { .. })));
        assert!(matches!(b.await, Err(RequestError::Cancelled { .. })));
        assert!(correlator.is_empty());
    }

    /// Тест проверяет, что ошибка публикации доставляется ожидающему.
    #[tokio::test]
    async fn test_fail_delivers_transport_error() {
        let correlator = Arc::new(Correlator::new());
        let reply = correlator.register("x", Duration::from_secs(60));
        let id = reply.correlation_id().to_string();

        assert!(correlator.fail(&id, TransportError::NotConnected));
        assert_eq!(
            reply.await.unwrap_err(),
            RequestError::Transport(TransportError::NotConnected)
        );
    }
}
