use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{RawMessage, Subscription};

type ChannelKey = Arc<str>;

/// Локальное веерное распределение сообщений по подпискам.
///
/// Используется и внутрипроцессным брокером, и сетевым транспортом (куда
/// сообщения попадают из читающей задачи подписочного соединения).
///
/// Поддерживает:
/// - Точные подписки по имени канала
/// - Автоматическое удаление каналов без подписчиков
/// - Статистику публикаций и неудачных отправок
pub struct Hub {
    /// Каналы → `Sender`
    channels: DashMap<ChannelKey, broadcast::Sender<RawMessage>>,
    /// Ёмкость буфера каждого `broadcast::channel`
    capacity: usize,
    /// Общее количество вызовов `publish`
    publish_count: AtomicUsize,
    /// Количество неудачных `send` (нет подписчиков)
    send_error_count: AtomicUsize,
}

/// Снимок счётчиков [`Hub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    /// Вызовы `publish`, включая публикации в пустые каналы.
    pub published: usize,
    /// Публикации, не нашедшие ни одного получателя в существующем канале.
    pub send_errors: usize,
    /// Каналы, у которых сейчас есть отправитель.
    pub channels: usize,
}

impl Hub {
    /// Создаёт новый `Hub` с заданной буферной ёмкостью.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            publish_count: AtomicUsize::new(0),
            send_error_count: AtomicUsize::new(0),
        }
    }

    /// Подписка на конкретный канал (точное совпадение).
    ///
    /// Возвращает подписку и признак того, что канал появился впервые.
    pub fn subscribe(
        &self,
        channel: &str,
    ) -> (Subscription, bool) {
        let mut created = false;
        let entry = self
            .channels
            .entry(Arc::from(channel))
            .or_insert_with(|| {
                created = true;
                broadcast::channel(self.capacity).0
            });
        let key = entry.key().clone();
        let rx = entry.value().subscribe();
        drop(entry);
        (Subscription::new(key, rx), created)
    }

    /// Доставка сообщения подписчикам канала.
    ///
    /// Возвращает количество получателей. Если у канала не осталось
    /// подписчиков, увеличивает `send_error_count` и удаляет канал.
    pub fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = self.channels.get(channel) else {
            return 0;
        };
        let tx = entry.value().clone();
        let key = entry.key().clone();
        drop(entry);

        match tx.send(RawMessage::new(key.clone(), payload)) {
            Ok(receivers) => receivers,
            Err(_) => {
                self.send_error_count.fetch_add(1, Ordering::Relaxed);
                self.channels.remove_if(&key, |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }

    /// Есть ли у канала хотя бы один отправитель.
    pub fn has_channel(
        &self,
        channel: &str,
    ) -> bool {
        self.channels.contains_key(channel)
    }

    /// Имена всех каналов, у которых есть отправитель.
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().to_string()).collect()
    }

    /// Удаляет один канал; его подписки получат `Closed`.
    pub fn remove(
        &self,
        channel: &str,
    ) -> bool {
        self.channels.remove(channel).is_some()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            published: self.publish_count.load(Ordering::Relaxed),
            send_errors: self.send_error_count.load(Ordering::Relaxed),
            channels: self.channels.len(),
        }
    }

    /// Удаляет все каналы; открытые подписки получат `Closed`.
    pub fn close(&self) {
        self.channels.clear();
    }
}
