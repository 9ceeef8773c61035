//! Property-based tests для JSON-формы конверта.

use proptest::prelude::*;
use pubsub_relay::{
    envelope::{decode, encode},
    Envelope, EnvelopeKind,
};

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    (
        "[a-z0-9-]{1,16}",
        "[a-z.]{1,24}",
        prop::collection::vec(any::<u8>(), 0..256),
        prop::option::of("[0-9a-f-]{1,36}"),
        prop::option::of("[a-z.]{1,24}"),
        0u8..3,
    )
        .prop_map(|(source, channel, payload, correlation, reply, kind)| {
            match (kind, correlation) {
                (1, Some(id)) => Envelope::request(source, channel, payload, id, reply),
                (2, Some(id)) => {
                    let request = Envelope::request("peer", channel, Vec::<u8>::new(), id, reply);
                    Envelope::response_to(&request, source, payload).unwrap()
                }
                _ => Envelope::message(source, channel, payload),
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Разбор сериализованного конверта возвращает тот же конверт и ту же роль.
    #[test]
    fn prop_encoded_envelope_decodes(envelope in arb_envelope()) {
        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&envelope.channel, &bytes).unwrap();
        prop_assert_eq!(decoded.kind(), envelope.kind());
        prop_assert_eq!(decoded, envelope);
    }

    /// Ответ уходит в канал ответа запроса, а без него в канал запроса.
    #[test]
    fn prop_response_targets_reply_channel(envelope in arb_envelope()) {
        if envelope.kind() == EnvelopeKind::Request {
            let response = Envelope::response_to(&envelope, "responder", "ok").unwrap();
            prop_assert_eq!(response.channel.as_str(), envelope.reply_target());
            prop_assert_eq!(&response.correlation_id, &envelope.correlation_id);
            prop_assert!(response.is_response());
        } else {
            prop_assert!(Envelope::response_to(&envelope, "responder", "ok").is_none());
        }
    }

    /// Произвольные байты никогда не приводят к панике разбора.
    #[test]
    fn prop_decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode("fuzz", &raw);
    }
}
