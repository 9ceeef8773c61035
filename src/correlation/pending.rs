use std::{
    future::Future,
    pin::Pin,
    sync::Weak,
    task::{Context, Poll},
};

use bytes::Bytes;
use relay_error::RequestError;
use tokio::sync::oneshot;

use super::{engine::Resolution, Correlator};

/// Ожидание ответа на отправленный запрос.
///
/// Разрешается телом ответа или `RequestError::Timeout`. Если вызывающий
/// отказался от ожидания (drop до разрешения), запись снимается из таблицы
/// корреляции и таймер гасится.
#[must_use = "a timed request is cancelled when its PendingReply is dropped"]
pub struct PendingReply {
    correlation_id: String,
    correlator: Weak<Correlator>,
    receiver: oneshot::Receiver<Resolution>,
    done: bool,
}

impl PendingReply {
    pub(crate) fn new(
        correlation_id: String,
        correlator: Weak<Correlator>,
        receiver: oneshot::Receiver<Resolution>,
    ) -> Self {
        Self {
            correlation_id,
            correlator,
            receiver,
            done: false,
        }
    }

    /// Id корреляции запроса.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Явно отменяет ожидание. Аналогично `drop(self)`.
    pub fn cancel(self) {}
}

impl std::fmt::Debug for PendingReply {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("correlation_id", &self.correlation_id)
            .field("done", &self.done)
            .finish()
    }
}

impl Future for PendingReply {
    type Output = Result<Bytes, RequestError>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(resolution)) => {
                this.done = true;
                Poll::Ready(resolution)
            }
            // Отправитель исчез вместе с таблицей корреляции.
            Poll::Ready(Err(_)) => {
                this.done = true;
                Poll::Ready(Err(RequestError::Cancelled {
                    correlation_id: this.correlation_id.clone(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(correlator) = self.correlator.upgrade() {
            correlator.cancel(&self.correlation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    /// Тест проверяет, что drop ожидания снимает запись из таблицы.
    #[tokio::test]
    async fn test_drop_removes_entry() {
        let correlator = Arc::new(Correlator::new());
        let reply = correlator.register("ping", Duration::from_secs(60));
        let id = reply.correlation_id().to_string();
        assert!(correlator.contains(&id));

        reply.cancel();
        assert!(!correlator.contains(&id));
        assert!(correlator.is_empty());
    }

    /// Тест проверяет отладочное представление ожидания.
    #[tokio::test]
    async fn test_debug_shows_correlation_id() {
        let correlator = Arc::new(Correlator::new());
        let reply = correlator.register("ping", Duration::from_secs(60));
        let shown = format!("{reply:?}");

        assert!(shown.starts_with("PendingReply"), "got: {shown}");
        assert!(shown.contains(reply.correlation_id()), "got: {shown}");
        assert!(shown.contains("done: false"), "got: {shown}");
    }

    /// Тест проверяет, что ожидание завершается, если таблица корреляции
    /// исчезла.
    #[tokio::test]
    async fn test_correlator_dropped() {
        let correlator = Arc::new(Correlator::new());
        let reply = correlator.register("ping", Duration::from_secs(60));
        drop(correlator);

        assert!(matches!(
            reply.await,
            Err(RequestError::Cancelled { .. })
        ));
    }
}
