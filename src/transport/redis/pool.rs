use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use relay_error::TransportError;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{connection::Connection, resp::Frame, RedisConfig};

/// Пул командных соединений (публикация, PING).
///
/// Слоты выбираются по кругу. Соединение, на котором произошла ошибка
/// ввода-вывода или таймаут, выбрасывается; слот переподключается лениво при
/// следующем обращении. Первые `min_idle` слотов открываются сразу.
pub struct Pool {
    config: Arc<RedisConfig>,
    slots: Vec<Mutex<Option<Connection>>>,
    next: AtomicUsize,
}

impl Pool {
    /// Открывает пул. Ошибка любого из начальных подключений возвращается
    /// вызывающему.
    pub async fn connect(config: Arc<RedisConfig>) -> Result<Self, TransportError> {
        let size = config.pool_size.max(1);
        let eager = config.min_idle.min(size);

        let mut slots = Vec::with_capacity(size);
        for i in 0..size {
            let conn = if i < eager {
                Some(config.open().await?)
            } else {
                None
            };
            slots.push(Mutex::new(conn));
        }
        debug!(size, eager, address = %config.address(), "connection pool ready");

        Ok(Self {
            config,
            slots,
            next: AtomicUsize::new(0),
        })
    }

    /// Выполняет команду на следующем по кругу соединении.
    pub async fn execute(
        &self,
        args: &[&[u8]],
    ) -> Result<Frame, TransportError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[idx].lock().await;

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.config.open().await?,
        };

        match conn.execute(args).await {
            Ok(frame) => {
                *slot = Some(conn);
                Ok(frame)
            }
            // Брокер ответил: соединение исправно.
            Err(err @ TransportError::Rejected { .. }) => {
                *slot = Some(conn);
                Err(err)
            }
            Err(err) => {
                warn!(slot = idx, error = %err, "dropping broken pooled connection");
                Err(err)
            }
        }
    }

    /// Проверяет открытые соединения командой PING и доводит число открытых
    /// до `min_idle`.
    ///
    /// Занятые в данный момент слоты пропускаются. Возвращает `true`, если
    /// после проверки в пуле есть хотя бы одно живое соединение.
    pub async fn check_liveness(&self) -> bool {
        let eager = self.config.min_idle.min(self.slots.len());
        let mut alive = 0usize;
        let mut busy = 0usize;

        for (idx, slot) in self.slots.iter().enumerate() {
            let Ok(mut slot) = slot.try_lock() else {
                busy += 1;
                continue;
            };

            if let Some(mut conn) = slot.take() {
                match conn.ping().await {
                    Ok(()) => {
                        *slot = Some(conn);
                        alive += 1;
                    }
                    Err(err) => warn!(slot = idx, error = %err, "liveness check failed"),
                }
            }

            if slot.is_none() && idx < eager {
                match self.config.open().await {
                    Ok(conn) => {
                        *slot = Some(conn);
                        alive += 1;
                    }
                    Err(err) => debug!(slot = idx, error = %err, "reconnect attempt failed"),
                }
            }
        }

        alive > 0 || busy > 0
    }

    /// Закрывает все соединения пула.
    pub async fn close(&self) {
        for slot in &self.slots {
            slot.lock().await.take();
        }
    }

    /// Количество открытых соединений (без ожидания занятых слотов).
    pub fn open_connections(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.try_lock().map(|s| s.is_some()).unwrap_or(true))
            .count()
    }
}
