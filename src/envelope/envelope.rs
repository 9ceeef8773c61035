use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Единица передачи: кто отправил, в какой канал, что и (опционально)
/// метаданные корреляции.
///
/// Наличие `correlation_id` отличает запрос/ответ от обычного сообщения,
/// поэтому отсутствующие поля не сериализуются вовсе (ни `null`, ни `""`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Envelope {
    /// Источник сообщения (source id процесса-отправителя).
    pub source_id: String,
    /// Канал маршрутизации.
    pub channel: String,
    /// Непрозрачное тело сообщения.
    pub payload: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_request: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_response: Option<bool>,
    /// Канал, в который ожидается ответ (если не совпадает с `channel`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_channel: Option<String>,
    /// Время создания, миллисекунды Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Роль конверта в обмене.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Обычное сообщение (fire-and-forget)
    Message,
    /// Запрос, ожидающий ответа
    Request,
    /// Ответ на запрос
    Response,
}

impl Envelope {
    /// Обычное сообщение без метаданных корреляции.
    pub fn message(
        source_id: impl Into<String>,
        channel: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            channel: channel.into(),
            payload: payload.into(),
            correlation_id: None,
            is_request: None,
            is_response: None,
            reply_channel: None,
            timestamp: Some(now_millis()),
        }
    }

    /// Запрос с идентификатором корреляции.
    ///
    /// `reply_channel` указывается, только если ответ ожидается не в том же
    /// канале.
    pub fn request(
        source_id: impl Into<String>,
        channel: impl Into<String>,
        payload: impl Into<Bytes>,
        correlation_id: impl Into<String>,
        reply_channel: Option<String>,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            is_request: Some(true),
            reply_channel,
            ..Self::message(source_id, channel, payload)
        }
    }

    /// Ответ на `request` от имени `source_id`.
    ///
    /// Ответ публикуется в `reply_channel` запроса, а при его отсутствии
    /// в канал самого запроса. Возвращает `None`, если `request` не является
    /// запросом.
    pub fn response_to(
        request: &Envelope,
        source_id: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Option<Self> {
        if request.kind() != EnvelopeKind::Request {
            return None;
        }
        Some(Self {
            correlation_id: request.correlation_id.clone(),
            is_response: Some(true),
            ..Self::message(source_id, request.reply_target(), payload)
        })
    }

    /// Роль конверта: ответ, запрос или обычное сообщение.
    pub fn kind(&self) -> EnvelopeKind {
        match (&self.correlation_id, self.is_request, self.is_response) {
            (Some(_), _, Some(true)) => EnvelopeKind::Response,
            (Some(_), Some(true), _) => EnvelopeKind::Request,
            _ => EnvelopeKind::Message,
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind() == EnvelopeKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind() == EnvelopeKind::Response
    }

    /// Канал, в который нужно отправить ответ на этот конверт.
    pub fn reply_target(&self) -> &str {
        self.reply_channel.as_deref().unwrap_or(&self.channel)
    }

    /// Отправлен ли конверт источником `source_id`.
    pub fn is_from(
        &self,
        source_id: &str,
    ) -> bool {
        self.source_id == source_id
    }

    /// Тело сообщения как UTF-8 (с заменой невалидных последовательностей).
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что обычное сообщение не несёт метаданных корреляции.
    #[test]
    fn test_message_has_no_correlation() {
        let env = Envelope::message("node-a", "news", "hello");
        assert_eq!(env.kind(), EnvelopeKind::Message);
        assert!(env.correlation_id.is_none());
        assert!(env.is_request.is_none());
        assert!(env.is_response.is_none());
        assert!(env.timestamp.is_some());
    }

    /// Тест проверяет, что ответ наследует id корреляции и уходит в канал
    /// запроса.
    #[test]
    fn test_response_to_same_channel() {
        let req = Envelope::request("node-b", "ping", "hello", "cid-1", None);
        assert!(req.is_request());

        let resp = Envelope::response_to(&req, "node-a", "world").unwrap();
        assert!(resp.is_response());
        assert_eq!(resp.channel, "ping");
        assert_eq!(resp.source_id, "node-a");
        assert_eq!(resp.correlation_id.as_deref(), Some("cid-1"));
        assert!(resp.is_request.is_none());
    }

    /// Тест проверяет, что ответ уходит в выделенный канал, если он указан.
    #[test]
    fn test_response_to_dedicated_reply_channel() {
        let req = Envelope::request(
            "node-b",
            "ping",
            "hello",
            "cid-2",
            Some("relay:reply:node-b".to_string()),
        );
        let resp = Envelope::response_to(&req, "node-a", "world").unwrap();
        assert_eq!(resp.channel, "relay:reply:node-b");
        assert!(resp.reply_channel.is_none());
    }

    /// Тест проверяет, что на обычное сообщение ответить нельзя.
    #[test]
    fn test_response_to_plain_message_is_none() {
        let msg = Envelope::message("node-b", "ping", "hello");
        assert!(Envelope::response_to(&msg, "node-a", "world").is_none());
    }

    /// Тест проверяет, что флаг без id корреляции не делает конверт запросом.
    #[test]
    fn test_flag_without_correlation_is_message() {
        let mut env = Envelope::message("node-a", "c", "x");
        env.is_response = Some(true);
        assert_eq!(env.kind(), EnvelopeKind::Message);
    }
}
