//! Envelope encoding and decoding.
//!
//! Outbound: `{"callId": <id>, "req": <request>}`.
//! Inbound: `{"callId": <id>, "payload": <payload>}` for replies and
//! `{"payload": <event>}` for unsolicited events.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{ResponsePayload, ServerEvent};

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A reply correlated to an earlier request.
    Reply {
        /// Correlation id of the originating request.
        call_id: u64,
        /// Reply payload.
        payload: ResponsePayload,
    },
    /// An unsolicited event.
    Event(ServerEvent),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    call_id: Option<u64>,
    payload: Option<Value>,
}

/// Encode a request with its correlation id into a frame body.
///
/// # Errors
///
/// Returns [`Error::Encode`] for malformed request input and
/// [`Error::Serialize`] if the envelope cannot be serialized.
pub fn encode(call_id: u64, request: &Request) -> Result<Vec<u8>> {
    let envelope = json!({
        "callId": call_id,
        "req": request.to_wire(call_id)?,
    });
    trace!(call_id, kind = request.kind(), "Encoding request");
    serde_json::to_vec(&envelope).map_err(Error::Serialize)
}

/// Decode a frame body into a reply or an event.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the body is not valid JSON and
/// [`Error::BadReply`] if an envelope with a call id carries a missing or
/// undecodable payload, so the waiting caller can be failed. Other
/// shape errors are [`Error::Decode`] or [`Error::Malformed`].
pub fn decode(body: &[u8]) -> Result<Inbound> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(Error::Decode)?;
    match envelope.call_id {
        Some(call_id) => {
            let bad_reply = |reason: String| Error::BadReply { call_id, reason };
            let payload = envelope
                .payload
                .ok_or_else(|| bad_reply("message has no payload".to_string()))?;
            if !has_typehint(&payload) {
                return Err(bad_reply("payload has no typehint".to_string()));
            }
            let payload = serde_json::from_value(payload).map_err(|e| bad_reply(e.to_string()))?;
            Ok(Inbound::Reply { call_id, payload })
        }
        None => {
            let payload = envelope
                .payload
                .ok_or_else(|| Error::Malformed("message has no payload".to_string()))?;
            if !has_typehint(&payload) {
                return Err(Error::Malformed("payload has no typehint".to_string()));
            }
            let event = serde_json::from_value(payload).map_err(Error::Decode)?;
            Ok(Inbound::Event(event))
        }
    }
}

fn has_typehint(payload: &Value) -> bool {
    payload.get("typehint").is_some_and(Value::is_string)
}

/// Encode a reply frame body. Used by servers and test doubles.
///
/// # Errors
///
/// Returns [`Error::Serialize`] if the payload cannot be serialized.
pub fn encode_reply(call_id: u64, payload: &ResponsePayload) -> Result<Vec<u8>> {
    serde_json::to_vec(&json!({ "callId": call_id, "payload": payload }))
        .map_err(Error::Serialize)
}

/// Encode an event frame body. Used by servers and test doubles.
///
/// # Errors
///
/// Returns [`Error::Serialize`] if the event cannot be serialized.
pub fn encode_event(event: &ServerEvent) -> Result<Vec<u8>> {
    serde_json::to_vec(&json!({ "payload": event })).map_err(Error::Serialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::CompletionInfoList;

    #[test]
    fn encode_wraps_request_with_call_id() {
        let body = encode(9, &Request::ConnectionInfo).unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["callId"], 9);
        assert_eq!(value["req"]["typehint"], "ConnectionInfoReq");
    }

    #[test]
    fn encode_propagates_input_errors() {
        let err = encode(1, &Request::TypeCheckFiles { files: vec![] }).unwrap_err();
        assert!(matches!(err, Error::Encode { .. }));
    }

    #[test]
    fn decode_reply_with_call_id() {
        let body = br#"{"callId":4,"payload":{"typehint":"VoidResponse"}}"#;
        assert_eq!(
            decode(body).unwrap(),
            Inbound::Reply {
                call_id: 4,
                payload: ResponsePayload::Void
            }
        );
    }

    #[test]
    fn decode_event_without_call_id() {
        let body = br#"{"payload":{"typehint":"IndexerReadyEvent"}}"#;
        assert_eq!(
            decode(body).unwrap(),
            Inbound::Event(ServerEvent::IndexerReady)
        );
    }

    #[test]
    fn decode_tolerates_unknown_envelope_fields() {
        let body = br#"{"callId":1,"protocolVersion":"9","payload":{"typehint":"TrueResponse"}}"#;
        assert!(matches!(
            decode(body).unwrap(),
            Inbound::Reply {
                payload: ResponsePayload::True,
                ..
            }
        ));
    }

    #[test]
    fn decode_unknown_event_is_unrecognized() {
        let body = br#"{"payload":{"typehint":"DebugVmStartEvent"}}"#;
        assert_eq!(
            decode(body).unwrap(),
            Inbound::Event(ServerEvent::Unrecognized)
        );
    }

    #[test]
    fn decode_rejects_invalid_json() {
        assert!(matches!(decode(b"{not json"), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_rejects_event_without_payload() {
        assert!(matches!(decode(br#"{"other":1}"#), Err(Error::Malformed(_))));
    }

    #[test]
    fn decode_rejects_untagged_event() {
        assert!(matches!(
            decode(br#"{"payload":{"text":"x"}}"#),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn decode_rejects_event_with_wrong_field_types() {
        let body = br#"{"payload":{"typehint":"SendBackgroundMessageEvent","detail":7}}"#;
        assert!(matches!(decode(body), Err(Error::Decode(_))));
    }

    #[test]
    fn bad_replies_keep_their_call_id() {
        for body in [
            &br#"{"callId":1}"#[..],
            br#"{"callId":1,"payload":{"text":"x"}}"#,
            br#"{"callId":1,"payload":{"typehint":"StringResponse","text":5}}"#,
        ] {
            let err = decode(body).unwrap_err();
            assert!(matches!(err, Error::BadReply { call_id: 1, .. }), "got {err:?}");
        }
    }

    #[test]
    fn reply_encoding_decodes_back() {
        let payload = ResponsePayload::Completions(CompletionInfoList {
            prefix: "fo".into(),
            completions: vec![],
        });
        let body = encode_reply(3, &payload).unwrap();

        assert_eq!(
            decode(&body).unwrap(),
            Inbound::Reply {
                call_id: 3,
                payload
            }
        );
    }
}
