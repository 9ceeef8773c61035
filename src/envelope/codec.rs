use bytes::Bytes;
use relay_error::CodecError;

use super::Envelope;

/// Сериализует конверт в каноническую JSON-форму.
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    serde_json::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
}

/// Разбирает конверт, пришедший из канала `channel`.
///
/// Помимо синтаксиса проверяется форма конверта: непустой источник, флаги
/// запроса/ответа только вместе с id корреляции и не одновременно.
pub fn decode(
    channel: &str,
    raw: &[u8],
) -> Result<Envelope, CodecError> {
    let malformed = |reason: String| CodecError::Decode {
        channel: channel.to_string(),
        reason,
    };

    let envelope: Envelope = serde_json::from_slice(raw).map_err(|e| malformed(e.to_string()))?;

    if envelope.source_id.is_empty() {
        return Err(malformed("empty sourceId".to_string()));
    }
    let flagged = envelope.is_request == Some(true) || envelope.is_response == Some(true);
    if flagged && envelope.correlation_id.is_none() {
        return Err(malformed(
            "request/response flag without correlationId".to_string(),
        ));
    }
    if envelope.is_request == Some(true) && envelope.is_response == Some(true) {
        return Err(malformed(
            "envelope flagged as both request and response".to_string(),
        ));
    }
    if envelope.correlation_id.as_deref() == Some("") {
        return Err(malformed("empty correlationId".to_string()));
    }
    Ok(envelope)
}
