use std::sync::Arc;

use bytes::Bytes;

/// Сырое входящее сообщение брокера: имя канала и ещё не разобранные байты.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub channel: Arc<str>,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(
        channel: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}
